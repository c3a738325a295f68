// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) KERYX NETWORK. All rights reserved.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use node_data::message::{AsyncQueue, Message, Payload};
use tokio::sync::{watch, RwLock};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::bridge::ChainBridge;
use super::peers::PeerSnapshot;
use super::window::{BatchWindow, WindowState};
use super::{FetchCmd, SyncReport};
use crate::chain::ChainEngine;
use crate::sync::conf::Params;
use crate::Network;

/// Owner of the fetch window. Drives the header and block phases with
/// their request timers and drains completed windows into the chain
/// engine, strictly in height order.
pub(crate) struct FetchLoop<N: Network, C: ChainEngine> {
    window: BatchWindow,
    local_tip: u32,
    remote_tip: u32,

    cmds: AsyncQueue<FetchCmd>,
    headers_inbound: AsyncQueue<Message>,
    reports: AsyncQueue<SyncReport>,
    peers: watch::Receiver<PeerSnapshot>,

    network: Arc<RwLock<N>>,
    bridge: ChainBridge<C>,

    header_timeout: Duration,
    block_timeout: Duration,
    header_deadline: Instant,
    block_deadline: Instant,
}

impl<N: Network, C: ChainEngine> FetchLoop<N, C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_tip: u32,
        conf: &Params,
        cmds: AsyncQueue<FetchCmd>,
        headers_inbound: AsyncQueue<Message>,
        reports: AsyncQueue<SyncReport>,
        peers: watch::Receiver<PeerSnapshot>,
        network: Arc<RwLock<N>>,
        bridge: ChainBridge<C>,
    ) -> Self {
        Self {
            window: BatchWindow::default(),
            local_tip,
            remote_tip: 0,
            cmds,
            headers_inbound,
            reports,
            peers,
            network,
            bridge,
            header_timeout: conf.header_timeout,
            block_timeout: conf.block_timeout,
            header_deadline: Instant::now() + conf.header_timeout,
            block_deadline: Instant::now() + conf.block_timeout,
        }
    }

    pub async fn run(mut self) {
        debug!(event = "fetch loop started");

        let cmds = self.cmds.clone();
        let headers_inbound = self.headers_inbound.clone();

        loop {
            tokio::select! {
                biased;
                recv = cmds.recv() => {
                    match recv {
                        Ok(cmd) => self.on_cmd(cmd).await,
                        Err(_) => return,
                    }
                },
                recv = headers_inbound.recv() => {
                    match recv {
                        Ok(msg) => self.on_message(msg).await,
                        Err(_) => return,
                    }
                },
                _ = sleep_until(self.header_deadline) => {
                    self.on_header_timer().await;
                },
                _ = sleep_until(self.block_deadline) => {
                    self.on_block_timer().await;
                },
            }
        }
    }

    pub async fn on_cmd(&mut self, cmd: FetchCmd) {
        match cmd {
            FetchCmd::Start {
                local_tip,
                remote_tip,
            } => {
                self.local_tip = local_tip;
                self.remote_tip = remote_tip;
                self.start_window().await;
            }
            FetchCmd::Clamp(number) => {
                self.remote_tip = number;
                self.window.clamp_end(number);
            }
            FetchCmd::Offer(blk) => {
                if self.window.accept_block(*blk) {
                    self.drain().await;
                }
            }
        }
    }

    pub async fn on_message(&mut self, msg: Message) {
        match msg.payload {
            Payload::Headers(batch) => {
                if self.window.accept_headers(batch.headers) {
                    // Headers are locked in; move on to soliciting bodies
                    self.request_blocks().await;
                }
            }
            _ => warn!("invalid inbound message"),
        }
    }

    /// Header timer: an unanswered header request is re-planned and
    /// reissued. The window may have been clamped in the meantime.
    pub async fn on_header_timer(&mut self) {
        self.header_deadline = Instant::now() + self.header_timeout;

        if self.window.state() == WindowState::AwaitHeaders {
            self.start_window().await;
        }
    }

    /// Block timer: a window in the bodies phase either completes or gets
    /// its still-missing heights reissued.
    pub async fn on_block_timer(&mut self) {
        self.block_deadline = Instant::now() + self.block_timeout;

        if self.window.state() != WindowState::AwaitBlocks {
            return;
        }

        if self.window.is_complete() {
            self.drain().await;
        } else {
            self.request_blocks().await;
        }
    }

    /// Plans the window above the local tip and requests its header run.
    async fn start_window(&mut self) {
        if self.remote_tip <= self.local_tip {
            self.window.reset();
            self.report(SyncReport::WindowIdle).await;
            return;
        }

        self.window.plan(self.local_tip, self.remote_tip);
        self.request_headers().await;
        self.header_deadline = Instant::now() + self.header_timeout;
    }

    /// Requests the whole header run from a single peer: the first one in
    /// observation order that knows the window end. With no such peer the
    /// window stays in the headers phase and the header timer retries.
    async fn request_headers(&mut self) {
        let end = self.window.end();
        let source = self.peers.borrow().select_source(end);

        let Some(peer) = source else {
            debug!(event = "no header source", end);
            return;
        };

        counter!("keryx_header_requests").increment(1);
        debug!(
            event = "request headers",
            begin = self.window.begin(),
            end,
            peer,
        );

        let msg = Message::new_get_headers(self.window.begin(), end);
        if let Err(e) = self.network.read().await.send_to_peer(&msg, peer).await
        {
            warn!("unable to request headers: {e}");
        }
    }

    /// Solicits every missing body, spreading the requests round-robin
    /// over the peers that know each height, best-informed peers first.
    async fn request_blocks(&mut self) {
        let missing = self.window.missing_numbers();
        let peers = self.peers.borrow().ordered_by_tip_desc();

        let mut i = 0;
        'assign: for number in missing {
            if peers.is_empty() {
                break;
            }

            if i == peers.len() {
                i = 0;
            }

            while i < peers.len() {
                if peers[i].last >= number {
                    self.request_block(peers[i].index, number).await;
                    i += 1;
                    continue 'assign;
                }
                i += 1;
            }
        }

        self.block_deadline = Instant::now() + self.block_timeout;
    }

    async fn request_block(&self, peer: u16, number: u32) {
        debug!(event = "request block", number, peer);

        let msg = Message::new_get_block(number);
        if let Err(e) = self.network.read().await.send_to_peer(&msg, peer).await
        {
            warn!("unable to request block: {e}");
        }
    }

    /// Drains the completed window into the chain engine in ascending
    /// height order. A failed slot is cleared and re-solicited; slots the
    /// engine already took are never re-applied, so a resumed drain picks
    /// up right after the last success.
    async fn drain(&mut self) {
        let begin = self.window.begin();
        let end = self.window.end();

        if end < begin {
            // Clamped below its own start: nothing left to deliver
            self.window.reset();
            self.report(SyncReport::WindowIdle).await;
            return;
        }

        for number in begin.max(self.local_tip + 1)..=end {
            let Some(blk) = self.window.block_at(number) else {
                self.request_blocks().await;
                return;
            };

            if !self.bridge.submit(blk).await {
                self.window.void_slot(number);
                self.request_blocks().await;
                return;
            }

            self.local_tip = number;
        }

        counter!("keryx_windows_drained").increment(1);
        info!(event = "window drained", begin, end);

        self.window.reset();
        self.report(SyncReport::Committed { number: end }).await;

        if self.local_tip < self.remote_tip {
            self.start_window().await;
        } else {
            self.report(SyncReport::WindowIdle).await;
        }
    }

    async fn report(&self, report: SyncReport) {
        if self.reports.send(report).await.is_err() {
            warn!("sync reports queue is closed");
        }
    }

    #[cfg(test)]
    pub(crate) fn window(&self) -> &BatchWindow {
        &self.window
    }
}
