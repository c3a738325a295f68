// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) KERYX NETWORK. All rights reserved.

use anyhow::Result;
use node_data::ledger;

/// The persisted-ledger seam.
///
/// Writing blocks is the chain engine's business; the node services only
/// ever read, so the seam exposes read transactions alone.
pub trait DB: Send + Sync + 'static {
    type P<'a>: Ledger;

    /// Provides a managed execution of a read-only isolated transaction.
    fn view<F, T>(&self, f: F) -> T
    where
        F: for<'a> FnOnce(Self::P<'a>) -> T;
}

/// Read transaction over the persisted chain.
pub trait Ledger {
    /// Number of the highest persisted block.
    fn tip_number(&self) -> Result<u32>;

    fn fetch_header_by_number(
        &self,
        number: u32,
    ) -> Result<Option<ledger::Header>>;

    fn fetch_block_by_number(
        &self,
        number: u32,
    ) -> Result<Option<ledger::Block>>;
}
