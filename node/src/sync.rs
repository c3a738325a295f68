// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) KERYX NETWORK. All rights reserved.

mod bridge;
pub mod conf;
mod fetch;
mod ingest;
mod peers;
mod prober;
mod window;

use std::sync::Arc;

use async_trait::async_trait;
use node_data::ledger::Block;
use node_data::message::{AsyncQueue, Message, Payload, Topics};
use tokio::sync::{watch, RwLock};
use tracing::{info, warn};

use self::bridge::ChainBridge;
use self::fetch::FetchLoop;
use self::ingest::Ingest;
use self::peers::PeerSnapshot;
use self::prober::TipProber;
use crate::chain::ChainEngine;
use crate::database::Ledger;
use crate::{database, LongLivedService, Network};

const TOPICS: &[u8] = &[
    Topics::LastBlockNumber as u8,
    Topics::BlockResp as u8,
    Topics::Block as u8,
];

/// Commands from the ingest loop to the fetch loop.
#[derive(Debug, Clone)]
pub(crate) enum FetchCmd {
    /// Begin fetching from the given tips.
    Start { local_tip: u32, remote_tip: u32 },
    /// The remote tip regressed; shrink the active window.
    Clamp(u32),
    /// A body observed by the ingest loop, offered to the active window.
    Offer(Box<Block>),
}

/// Progress reports from the fetch loop back to the ingest loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SyncReport {
    /// A window drained; the local tip advanced to `number`.
    Committed { number: u32 },
    /// The fetch machinery went idle.
    WindowIdle,
}

/// The block synchronization service.
///
/// Keeps the local chain engine fed with the blocks it is missing. The
/// work is split over three long-lived tasks: a tip prober, an ingest
/// loop serializing peer observations, and a fetch loop driving the
/// header/body window. The tasks only ever talk through queues.
pub struct BlockSyncSrv {
    /// Inbound wire messages queue
    inbound: AsyncQueue<Message>,

    /// Heights committed by the local block producer
    local_committed: AsyncQueue<u32>,

    conf: conf::Params,
}

impl BlockSyncSrv {
    pub fn new(conf: conf::Params) -> Self {
        info!("BlockSyncSrv::new with conf {:?}", conf);
        Self {
            inbound: AsyncQueue::bounded(conf.max_queue_size, "sync_inbound"),
            local_committed: AsyncQueue::bounded(
                conf.max_queue_size,
                "sync_local_committed",
            ),
            conf,
        }
    }

    /// Handle through which the block producer announces committed
    /// heights.
    pub fn local_committed_queue(&self) -> AsyncQueue<u32> {
        self.local_committed.clone()
    }
}

#[async_trait]
impl<N: Network, DB: database::DB, C: ChainEngine> LongLivedService<N, DB, C>
    for BlockSyncSrv
{
    async fn execute(
        &mut self,
        network: Arc<RwLock<N>>,
        db: Arc<RwLock<DB>>,
        chain: Arc<RwLock<C>>,
    ) -> anyhow::Result<usize> {
        // Register routes
        LongLivedService::<N, DB, C>::add_routes(
            self,
            TOPICS,
            self.inbound.clone(),
            &network,
        )
        .await?;

        let headers_inbound =
            AsyncQueue::bounded(self.conf.max_queue_size, "sync_headers");
        network
            .write()
            .await
            .add_route(Topics::Headers as u8, headers_inbound.clone())
            .await?;

        // Restore the most recent height from the persisted ledger
        let local_tip = db.read().await.view(|t| t.tip_number())?;
        info!(event = "ledger tip loaded", number = local_tip);

        let cmds =
            AsyncQueue::bounded(self.conf.max_queue_size, "sync_fetch_cmds");
        let reports =
            AsyncQueue::bounded(self.conf.max_queue_size, "sync_reports");
        let (peers_tx, peers_rx) = watch::channel(PeerSnapshot::default());
        let (in_sync_tx, in_sync_rx) = watch::channel(false);

        let bridge = ChainBridge::new(chain, &self.conf);

        tokio::spawn(
            TipProber::new(
                network.clone(),
                in_sync_rx,
                self.conf.probe_unsynced_interval,
                self.conf.probe_synced_interval,
            )
            .run(),
        );

        tokio::spawn(
            FetchLoop::new(
                local_tip,
                &self.conf,
                cmds.clone(),
                headers_inbound,
                reports.clone(),
                peers_rx,
                network.clone(),
                bridge.clone(),
            )
            .run(),
        );

        let mut ingest = Ingest::new(
            local_tip,
            cmds,
            peers_tx,
            in_sync_tx,
            network.clone(),
            bridge,
        );

        let mut sweep = tokio::time::interval(self.conf.sweep_interval);
        // The first tick completes immediately
        sweep.tick().await;

        // Message loop of the ingest context
        loop {
            tokio::select! {
                biased;
                recv = reports.recv() => {
                    ingest.on_report(recv?);
                },
                recv = self.local_committed.recv() => {
                    ingest.on_local_committed(recv?);
                },
                recv = self.inbound.recv() => {
                    let msg = recv?;
                    let Some(peer) = msg.src_peer() else {
                        warn!("inbound message without transport metadata");
                        continue;
                    };

                    match msg.payload {
                        Payload::LastBlockNumber(p) => {
                            ingest.on_peer_tip(peer, p.number).await;
                        }
                        Payload::Block(blk) | Payload::BlockResp(blk) => {
                            ingest.on_block(peer, *blk).await;
                        }
                        _ => warn!("invalid inbound message"),
                    }
                },
                _ = sweep.tick() => {
                    ingest.on_sweep().await;
                },
            }
        }
    }

    /// Returns service name.
    fn name(&self) -> &'static str {
        "block_sync"
    }
}
