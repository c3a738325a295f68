// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) KERYX NETWORK. All rights reserved.

use std::sync::Arc;

use metrics::counter;
use node_data::ledger::{to_str, Block};
use node_data::message::{AsyncQueue, Message};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use super::bridge::ChainBridge;
use super::peers::{PeerRegistry, PeerSnapshot};
use super::{FetchCmd, SyncReport};
use crate::chain::ChainEngine;
use crate::Network;

/// Synchronization judgement state. Owned by the ingest loop alone; other
/// tasks learn of changes only through published messages.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SyncState {
    pub local_tip: u32,
    pub remote_tip: u32,
    pub in_sync: bool,
    pub ever_synced: bool,
}

impl SyncState {
    fn new(local_tip: u32) -> Self {
        Self {
            local_tip,
            remote_tip: 0,
            in_sync: false,
            ever_synced: false,
        }
    }
}

/// Serializes every peer-facing observation: tip advertisements, local
/// commits, unsolicited block arrivals and the liveness sweep. Owns the
/// peer registry and the judgement of whether the node lags the network.
pub(crate) struct Ingest<N: Network, C: ChainEngine> {
    state: SyncState,
    registry: PeerRegistry,

    /// Mirror of whether the fetch loop has an active window, maintained
    /// from its reports.
    fetching: bool,

    cmds: AsyncQueue<FetchCmd>,
    peers_tx: watch::Sender<PeerSnapshot>,
    in_sync_tx: watch::Sender<bool>,

    network: Arc<RwLock<N>>,
    bridge: ChainBridge<C>,
}

impl<N: Network, C: ChainEngine> Ingest<N, C> {
    pub fn new(
        local_tip: u32,
        cmds: AsyncQueue<FetchCmd>,
        peers_tx: watch::Sender<PeerSnapshot>,
        in_sync_tx: watch::Sender<bool>,
        network: Arc<RwLock<N>>,
        bridge: ChainBridge<C>,
    ) -> Self {
        Self {
            state: SyncState::new(local_tip),
            registry: PeerRegistry::default(),
            fetching: false,
            cmds,
            peers_tx,
            in_sync_tx,
            network,
            bridge,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// A peer advertised its tip height.
    pub async fn on_peer_tip(&mut self, peer: u16, number: u32) {
        self.registry.observe(peer, number);
        self.publish_peers();

        if number > self.state.remote_tip {
            debug!(event = "remote tip raised", number, peer);
            self.state.remote_tip = number;
        }

        self.judge().await;
    }

    /// The local producer committed a block.
    pub fn on_local_committed(&mut self, number: u32) {
        if number > self.state.local_tip {
            debug!(event = "local tip raised", number);
            self.state.local_tip = number;
        }
    }

    /// Progress report from the fetch loop.
    pub fn on_report(&mut self, report: SyncReport) {
        match report {
            SyncReport::Committed { number } => self.on_local_committed(number),
            SyncReport::WindowIdle => self.fetching = false,
        }
    }

    /// A block arrived outside of the header/body machinery: either the
    /// answer to a body request or a gossiped tip extension.
    pub async fn on_block(&mut self, peer: u16, blk: Block) {
        let number = blk.header().number;

        if number <= self.state.local_tip {
            debug!(event = "block dropped", reason = "stale height", number);
            return;
        }

        // A tip extension is applied on the spot, but only while no window
        // could be racing the same height
        if number == self.state.local_tip + 1
            && (self.state.in_sync || !self.fetching)
        {
            if self.bridge.submit(&blk).await {
                self.state.local_tip = number;
                if number > self.state.remote_tip {
                    self.state.remote_tip = number;
                }
                self.broadcast_committed(blk, peer).await;
            }
            return;
        }

        // The sender evidently knows this height; count it as an
        // advertisement
        self.registry.observe(peer, number);
        self.publish_peers();
        if number > self.state.remote_tip {
            self.state.remote_tip = number;
        }

        if self.state.in_sync {
            // Supposedly caught up, yet a block from the future arrived
            debug!(event = "block dropped", reason = "ahead of tip", number);
            self.judge().await;
        } else if self.fetching {
            self.cmds.try_send(FetchCmd::Offer(Box::new(blk)));
        } else {
            self.judge().await;
            debug!(event = "block dropped", reason = "no active window", number);
        }
    }

    /// Liveness sweep tick: age the registry and re-derive the remote tip
    /// from the surviving peers.
    pub async fn on_sweep(&mut self) {
        let remote = self.registry.sweep();
        self.publish_peers();

        if remote < self.state.remote_tip {
            warn!(
                event = "remote tip regressed",
                from = self.state.remote_tip,
                to = remote,
            );
            if remote > 0 {
                self.state.remote_tip = remote;
                if self.cmds.send(FetchCmd::Clamp(remote)).await.is_err() {
                    warn!("fetch cmds queue is closed");
                }
            }

            // Judged again on the next tick
            return;
        } else if remote > self.state.remote_tip {
            debug!(event = "remote tip raised", number = remote);
            self.state.remote_tip = remote;
        }

        self.judge().await;
    }

    /// The judgement policy: either declare the node caught up, or make
    /// sure exactly one fetch is in flight.
    async fn judge(&mut self) {
        if self.state.local_tip >= self.state.remote_tip {
            self.set_in_sync(true);
            return;
        }

        if !self.state.ever_synced {
            self.start_fetch().await;
            self.state.ever_synced = true;
        } else if self.state.in_sync {
            debug!(event = "falling behind", local = self.state.local_tip);
            self.set_in_sync(false);
            self.start_fetch().await;
        } else if !self.fetching {
            debug!(event = "continue sync", local = self.state.local_tip);
            self.start_fetch().await;
        }
    }

    async fn start_fetch(&mut self) {
        let cmd = FetchCmd::Start {
            local_tip: self.state.local_tip,
            remote_tip: self.state.remote_tip,
        };

        if self.cmds.send(cmd).await.is_err() {
            warn!("fetch cmds queue is closed");
            return;
        }

        self.fetching = true;
    }

    fn set_in_sync(&mut self, in_sync: bool) {
        if self.state.in_sync == in_sync {
            return;
        }

        let event = if in_sync { "node in sync" } else { "node out of sync" };
        info!(
            event,
            local = self.state.local_tip,
            remote = self.state.remote_tip,
        );

        self.state.in_sync = in_sync;
        self.in_sync_tx.send_replace(in_sync);
    }

    fn publish_peers(&self) {
        self.peers_tx.send_replace(self.registry.snapshot());
    }

    async fn broadcast_committed(&self, blk: Block, origin: u16) {
        counter!("keryx_blocks_accepted").increment(1);
        info!(
            event = "block accepted",
            number = blk.header().number,
            hash = to_str(&blk.header().hash),
        );

        let msg = Message::new_block(Box::new(blk));
        let net = self.network.read().await;
        if let Err(e) = net.broadcast_except(&msg, &[origin]).await {
            warn!("unable to broadcast block update: {e}");
        }
    }
}
