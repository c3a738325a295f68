// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) KERYX NETWORK. All rights reserved.

use std::sync::Arc;
use std::time::Duration;

use node_data::message::Message;
use tokio::sync::{watch, RwLock};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::Network;

/// Periodically asks the whole network for its tip height.
///
/// Probing runs at the fast cadence while the node believes it lags and
/// relaxes once it is caught up. A failed broadcast is simply lost; the
/// next tick retries.
pub(crate) struct TipProber<N: Network> {
    network: Arc<RwLock<N>>,
    in_sync: watch::Receiver<bool>,

    unsynced_interval: Duration,
    synced_interval: Duration,
}

impl<N: Network> TipProber<N> {
    pub fn new(
        network: Arc<RwLock<N>>,
        in_sync: watch::Receiver<bool>,
        unsynced_interval: Duration,
        synced_interval: Duration,
    ) -> Self {
        Self {
            network,
            in_sync,
            unsynced_interval,
            synced_interval,
        }
    }

    pub async fn run(self) {
        debug!(event = "tip prober started");

        loop {
            let interval = if *self.in_sync.borrow() {
                self.synced_interval
            } else {
                self.unsynced_interval
            };
            sleep(interval).await;

            let msg = Message::new_get_last_block_number();
            if let Err(e) = self.network.read().await.broadcast(&msg).await {
                warn!("unable to broadcast tip probe: {e}");
            }
        }
    }
}
