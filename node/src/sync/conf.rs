// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) KERYX NETWORK. All rights reserved.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Copy, Clone, Debug)]
pub struct Params {
    /// Tip probe cadence while the node lags the network.
    #[serde(
        with = "humantime_serde",
        default = "default_probe_unsynced_interval"
    )]
    pub probe_unsynced_interval: Duration,

    /// Tip probe cadence while the node is caught up.
    #[serde(with = "humantime_serde", default = "default_probe_synced_interval")]
    pub probe_synced_interval: Duration,

    /// Cadence of the peer liveness sweep.
    #[serde(with = "humantime_serde", default = "default_sweep_interval")]
    pub sweep_interval: Duration,

    /// How long a header request may stay unanswered before it is reissued.
    #[serde(with = "humantime_serde", default = "default_header_timeout")]
    pub header_timeout: Duration,

    /// How long block requests may stay unanswered before the still-missing
    /// heights are reissued.
    #[serde(with = "humantime_serde", default = "default_block_timeout")]
    pub block_timeout: Duration,

    /// Per-call deadline of a chain engine submission.
    #[serde(with = "humantime_serde", default = "default_submit_deadline")]
    pub submit_deadline: Duration,

    /// Submission attempts before a block is given up on.
    #[serde(default = "default_submit_attempts")]
    pub submit_attempts: u8,

    /// Pause between deadline-exceeded submission attempts.
    #[serde(with = "humantime_serde", default = "default_retry_backoff")]
    pub retry_backoff: Duration,

    /// Pause after the engine reports an unlinkable block.
    #[serde(with = "humantime_serde", default = "default_stall_backoff")]
    pub stall_backoff: Duration,

    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

const fn default_probe_unsynced_interval() -> Duration {
    Duration::from_secs(1)
}
const fn default_probe_synced_interval() -> Duration {
    Duration::from_secs(4)
}
const fn default_sweep_interval() -> Duration {
    Duration::from_secs(7)
}
const fn default_header_timeout() -> Duration {
    Duration::from_secs(2)
}
const fn default_block_timeout() -> Duration {
    Duration::from_secs(2)
}
const fn default_submit_deadline() -> Duration {
    Duration::from_millis(500)
}
const fn default_submit_attempts() -> u8 {
    5
}
const fn default_retry_backoff() -> Duration {
    Duration::from_millis(10)
}
const fn default_stall_backoff() -> Duration {
    Duration::from_secs(5 * 60)
}
const fn default_max_queue_size() -> usize {
    10
}

impl Default for Params {
    fn default() -> Self {
        Self {
            probe_unsynced_interval: default_probe_unsynced_interval(),
            probe_synced_interval: default_probe_synced_interval(),
            sweep_interval: default_sweep_interval(),
            header_timeout: default_header_timeout(),
            block_timeout: default_block_timeout(),
            submit_deadline: default_submit_deadline(),
            submit_attempts: default_submit_attempts(),
            retry_backoff: default_retry_backoff(),
            stall_backoff: default_stall_backoff(),
            max_queue_size: default_max_queue_size(),
        }
    }
}
