// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) KERYX NETWORK. All rights reserved.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use node_data::ledger::{to_str, Block};
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use crate::chain::{ChainEngine, SubmitResult};
use crate::sync::conf::Params;

/// Hands blocks to the chain engine one at a time, classifying the
/// response for the fetch machinery.
pub(crate) struct ChainBridge<C: ChainEngine> {
    chain: Arc<RwLock<C>>,

    deadline: Duration,
    attempts: u8,
    retry_backoff: Duration,
    stall_backoff: Duration,
}

impl<C: ChainEngine> Clone for ChainBridge<C> {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            deadline: self.deadline,
            attempts: self.attempts,
            retry_backoff: self.retry_backoff,
            stall_backoff: self.stall_backoff,
        }
    }
}

impl<C: ChainEngine> ChainBridge<C> {
    pub fn new(chain: Arc<RwLock<C>>, conf: &Params) -> Self {
        Self {
            chain,
            deadline: conf.submit_deadline,
            attempts: conf.submit_attempts,
            retry_backoff: conf.retry_backoff,
            stall_backoff: conf.stall_backoff,
        }
    }

    /// Submits one block, retrying deadline-exceeded attempts up to the
    /// attempt cap. A false return means the block did not land and its
    /// body should be solicited again.
    ///
    /// An unlinkable block parks the submitter for the stall back-off
    /// before failing: the remote prefix is incompatible and pushing
    /// harder will not help.
    pub async fn submit(&self, blk: &Block) -> bool {
        let number = blk.header().number;

        for _ in 0..self.attempts {
            let res = timeout(self.deadline, async {
                self.chain.read().await.submit(blk).await
            })
            .await;

            let res = match res {
                Ok(res) => res,
                Err(_) => {
                    warn!(event = "chain submit deadline exceeded", number);
                    sleep(self.retry_backoff).await;
                    continue;
                }
            };

            match res {
                Ok(SubmitResult::Success) => {
                    counter!("keryx_blocks_submitted").increment(1);
                    info!(
                        event = "block submitted",
                        number,
                        hash = to_str(&blk.header().hash),
                    );
                    return true;
                }
                Ok(SubmitResult::GeneralError) => {
                    error!(event = "block submit failed", number);
                    return false;
                }
                Ok(SubmitResult::NotLinked) => {
                    counter!("keryx_chain_stalls").increment(1);
                    error!(
                        event = "block not linked",
                        number,
                        backoff = ?self.stall_backoff,
                    );
                    sleep(self.stall_backoff).await;
                    return false;
                }
                Ok(SubmitResult::Unknown(code)) => {
                    error!(event = "block submit failed", number, code);
                    return false;
                }
                Err(e) => {
                    error!(event = "chain engine error", number, ?e);
                    return false;
                }
            }
        }

        error!(event = "chain submit attempts exhausted", number);
        false
    }
}
