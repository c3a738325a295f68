// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) KERYX NETWORK. All rights reserved.

use async_trait::async_trait;
use node_data::ledger::Block;

/// Classification of a block submission, as reported by the chain engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitResult {
    /// The block extends the chain and is now the tip.
    Success,
    /// The block was rejected; retrying the same body is pointless but a
    /// fresh copy may pass.
    GeneralError,
    /// The block does not link to the local chain prefix.
    NotLinked,
    /// A classification this node does not know about.
    Unknown(i32),
}

/// The chain-engine seam.
///
/// The engine accepts blocks one at a time, in strict height order, and is
/// the single writer of the persisted chain.
#[async_trait]
pub trait ChainEngine: Send + Sync + 'static {
    /// Applies one block on top of the current tip.
    ///
    /// Outcomes are reported through [`SubmitResult`]; `Err` is reserved
    /// for an engine breakdown.
    async fn submit(&self, blk: &Block) -> anyhow::Result<SubmitResult>;
}
