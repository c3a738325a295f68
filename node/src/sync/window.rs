// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) KERYX NETWORK. All rights reserved.

use node_data::ledger::{Block, Header};
use tracing::{debug, warn};

/// Max number of blocks fetched by a single window.
pub(crate) const BATCH_CAPACITY: usize = 10;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WindowState {
    #[default]
    Idle,
    AwaitHeaders,
    AwaitBlocks,
}

/// One in-flight fetch window over the heights `begin..=end`.
///
/// A window locks the header run in first; block bodies are then matched
/// slot-by-slot against the locked headers, so a divergent body for a
/// height can never be accepted.
pub(crate) struct BatchWindow {
    begin: u32,
    end: u32,
    headers: [Option<Header>; BATCH_CAPACITY],
    blocks: [Option<Block>; BATCH_CAPACITY],
    state: WindowState,
}

const NO_HEADER: Option<Header> = None;
const NO_BLOCK: Option<Block> = None;

impl Default for BatchWindow {
    fn default() -> Self {
        Self {
            begin: 0,
            end: 0,
            headers: [NO_HEADER; BATCH_CAPACITY],
            blocks: [NO_BLOCK; BATCH_CAPACITY],
            state: WindowState::Idle,
        }
    }
}

impl BatchWindow {
    pub fn state(&self) -> WindowState {
        self.state
    }

    pub fn begin(&self) -> u32 {
        self.begin
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    /// Lays out the next window right above the local tip and moves to the
    /// headers phase. No-op while the remote tip is not ahead.
    pub fn plan(&mut self, local_tip: u32, remote_tip: u32) -> bool {
        if remote_tip <= local_tip {
            return false;
        }

        self.reset();
        self.begin = local_tip + 1;
        self.end = remote_tip.min(local_tip + BATCH_CAPACITY as u32);
        self.state = WindowState::AwaitHeaders;

        debug!(event = "window planned", begin = self.begin, end = self.end);
        true
    }

    /// Locks in the header run. The response must be the exact ascending
    /// sequence `begin..=end`; anything else clears the header slots and
    /// leaves the window waiting for the next attempt.
    pub fn accept_headers(&mut self, seq: Vec<Header>) -> bool {
        if self.state != WindowState::AwaitHeaders {
            warn!(event = "headers dropped", reason = "no headers expected");
            return false;
        }

        if self.end < self.begin {
            return false;
        }

        if seq.len() != self.len() {
            warn!(
                event = "headers dropped",
                reason = "length mismatch",
                len = seq.len(),
                expected = self.len(),
            );
            self.clear_headers();
            return false;
        }

        for (i, header) in seq.iter().enumerate() {
            if header.number != self.begin + i as u32 {
                warn!(
                    event = "headers dropped",
                    reason = "number mismatch",
                    number = header.number,
                    expected = self.begin + i as u32,
                );
                self.clear_headers();
                return false;
            }
        }

        for (i, header) in seq.into_iter().enumerate() {
            self.headers[i] = Some(header);
        }

        self.state = WindowState::AwaitBlocks;
        true
    }

    /// Offers a block body to the window. The body lands in the slot whose
    /// locked header describes the very same block; duplicates are
    /// idempotent, unmatched bodies are dropped.
    ///
    /// Returns true when the window has just become complete.
    pub fn accept_block(&mut self, blk: Block) -> bool {
        if self.state != WindowState::AwaitBlocks {
            debug!(
                event = "block dropped",
                reason = "no bodies expected",
                number = blk.header().number,
            );
            return false;
        }

        if self.end < self.begin {
            return true;
        }

        if blk.header().number > self.end {
            debug!(
                event = "block dropped",
                reason = "beyond window end",
                number = blk.header().number,
                end = self.end,
            );
            return false;
        }

        let slot = (0..self.len()).find(|i| {
            self.headers[*i]
                .as_ref()
                .is_some_and(|h| h.same_identity(blk.header()))
        });

        match slot {
            Some(i) => self.blocks[i] = Some(blk),
            None => debug!(
                event = "block dropped",
                reason = "no matching header",
                number = blk.header().number,
            ),
        }

        self.is_complete()
    }

    /// True when every slot of the window holds a body.
    pub fn is_complete(&self) -> bool {
        if self.end < self.begin {
            return true;
        }

        (0..self.len()).all(|i| self.blocks[i].is_some())
    }

    /// Lowers the window end after a remote tip regression.
    pub fn clamp_end(&mut self, new_end: u32) {
        if self.state != WindowState::Idle && new_end < self.end {
            debug!(event = "window end clamped", from = self.end, to = new_end);
            self.end = new_end;
        }
    }

    /// Heights of the slots still missing a body.
    pub fn missing_numbers(&self) -> Vec<u32> {
        if self.end < self.begin {
            return vec![];
        }

        (0..self.len())
            .filter(|i| self.blocks[*i].is_none())
            .map(|i| self.begin + i as u32)
            .collect()
    }

    pub fn block_at(&self, number: u32) -> Option<&Block> {
        let slot = number.checked_sub(self.begin)? as usize;
        self.blocks.get(slot)?.as_ref()
    }

    /// Clears a single body slot so the height is solicited again.
    pub fn void_slot(&mut self, number: u32) {
        if let Some(slot) = number.checked_sub(self.begin) {
            if let Some(blk) = self.blocks.get_mut(slot as usize) {
                *blk = None;
            }
        }
    }

    pub fn reset(&mut self) {
        self.state = WindowState::Idle;
        self.begin = 0;
        self.end = 0;
        self.clear_headers();
        self.clear_blocks();
    }

    fn clear_headers(&mut self) {
        self.headers = [NO_HEADER; BATCH_CAPACITY];
    }

    fn clear_blocks(&mut self) {
        self.blocks = [NO_BLOCK; BATCH_CAPACITY];
    }

    /// Slot count. Callers ensure `begin <= end`.
    fn len(&self) -> usize {
        (self.end - self.begin + 1) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(number: u32) -> Header {
        Header {
            version: 1,
            number,
            timestamp: 1_700_000_000 + number as u64,
            prev_block_hash: [number as u8; 32],
            merkle_root: [(number % 251) as u8; 32],
            hash: [0; 32],
        }
    }

    fn block(number: u32) -> Block {
        Block::new(header(number), vec![]).expect("valid block")
    }

    fn headers(begin: u32, end: u32) -> Vec<Header> {
        (begin..=end).map(header).collect()
    }

    #[test]
    fn test_plan_boundaries() {
        let mut window = BatchWindow::default();

        // Remote not ahead: no window
        assert!(!window.plan(10, 10));
        assert_eq!(window.state(), WindowState::Idle);

        // One block behind: window of size 1
        assert!(window.plan(10, 11));
        assert_eq!((window.begin(), window.end()), (11, 11));

        // Far behind: window clamped to capacity
        assert!(window.plan(10, 100));
        assert_eq!((window.begin(), window.end()), (11, 20));
        assert_eq!(window.state(), WindowState::AwaitHeaders);
    }

    #[test]
    fn test_accept_headers_exact_run_only() {
        let mut window = BatchWindow::default();
        window.plan(0, 5);

        // Wrong length
        assert!(!window.accept_headers(headers(1, 4)));
        assert_eq!(window.state(), WindowState::AwaitHeaders);

        // Wrong numbering
        let mut seq = headers(1, 5);
        seq[2].number = 42;
        assert!(!window.accept_headers(seq));
        assert_eq!(window.state(), WindowState::AwaitHeaders);

        // Exact run
        assert!(window.accept_headers(headers(1, 5)));
        assert_eq!(window.state(), WindowState::AwaitBlocks);
    }

    #[test]
    fn test_accept_headers_after_reset_is_noop() {
        let mut window = BatchWindow::default();
        window.plan(0, 5);
        window.reset();

        assert!(!window.accept_headers(headers(1, 5)));
        assert_eq!(window.state(), WindowState::Idle);
    }

    #[test]
    fn test_accept_block_matches_locked_header() {
        let mut window = BatchWindow::default();
        window.plan(0, 3);
        assert!(window.accept_headers(headers(1, 3)));

        assert!(!window.accept_block(block(1)));
        assert!(!window.accept_block(block(2)));

        // Body beyond the window end is dropped
        assert!(!window.accept_block(block(4)));

        // A body with a diverging identity never lands in a slot
        let mut divergent = header(3);
        divergent.merkle_root = [0xaa; 32];
        let divergent = Block::new(divergent, vec![]).expect("valid block");
        assert!(!window.accept_block(divergent));

        // Duplicate is idempotent
        assert!(!window.accept_block(block(2)));

        assert!(window.accept_block(block(3)));
        assert!(window.is_complete());
    }

    #[test]
    fn test_missing_numbers_and_void_slot() {
        let mut window = BatchWindow::default();
        window.plan(0, 4);
        assert!(window.accept_headers(headers(1, 4)));

        window.accept_block(block(2));
        window.accept_block(block(4));
        assert_eq!(window.missing_numbers(), vec![1, 3]);

        window.accept_block(block(1));
        window.accept_block(block(3));
        assert!(window.is_complete());

        window.void_slot(3);
        assert_eq!(window.missing_numbers(), vec![3]);
        assert!(window.block_at(3).is_none());
        assert!(window.block_at(2).is_some());
    }

    #[test]
    fn test_clamp_end_shrinks_active_window() {
        let mut window = BatchWindow::default();
        window.plan(0, 10);
        assert_eq!(window.end(), 10);

        window.clamp_end(7);
        assert_eq!(window.end(), 7);

        // Raising is not a clamp
        window.clamp_end(9);
        assert_eq!(window.end(), 7);

        window.reset();
        window.clamp_end(3);
        assert_eq!(window.end(), 0);
    }

    #[test]
    fn test_complete_only_when_every_slot_filled() {
        let mut window = BatchWindow::default();
        window.plan(20, 23);
        assert!(window.accept_headers(headers(21, 23)));

        assert!(!window.is_complete());
        window.accept_block(block(21));
        window.accept_block(block(23));
        assert!(!window.is_complete());
        assert!(window.accept_block(block(22)));
    }
}
