// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) KERYX NETWORK. All rights reserved.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Copy, Clone, Debug)]
pub struct Params {
    #[serde(default = "default_max_header_entries")]
    pub max_header_entries: usize,
    #[serde(default = "default_max_ongoing_requests")]
    pub max_ongoing_requests: usize,
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

const fn default_max_header_entries() -> usize {
    10
}
const fn default_max_ongoing_requests() -> usize {
    1000
}
const fn default_max_queue_size() -> usize {
    1000
}

impl Default for Params {
    fn default() -> Self {
        Self {
            max_header_entries: default_max_header_entries(),
            max_ongoing_requests: default_max_ongoing_requests(),
            max_queue_size: default_max_queue_size(),
        }
    }
}
