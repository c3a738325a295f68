// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) KERYX NETWORK. All rights reserved.

use indexmap::IndexMap;

/// Number of consecutive liveness sweeps without any advertisement after
/// which a peer is considered gone.
const MAX_MISS_COUNT: i16 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PeerInfo {
    pub index: u16,
    pub last: u32,
    pub miss_count: i16,
}

/// Tracks each known peer's advertised tip height and liveness.
///
/// Iteration order is first-observation order, which keeps peer selection
/// deterministic and replayable.
#[derive(Default)]
pub(crate) struct PeerRegistry {
    peers: IndexMap<u16, PeerInfo>,
}

impl PeerRegistry {
    /// Registers a tip advertisement. A peer's advertised tip is monotonic;
    /// a smaller value only refreshes liveness.
    pub fn observe(&mut self, index: u16, last: u32) {
        match self.peers.get_mut(&index) {
            Some(peer) => {
                if last > peer.last {
                    peer.last = last;
                }
                peer.miss_count = 0;
            }
            None => {
                self.peers.insert(
                    index,
                    PeerInfo {
                        index,
                        last,
                        miss_count: 0,
                    },
                );
            }
        }
    }

    /// Ages every peer and evicts the expired ones. Returns the maximum
    /// advertised tip among the survivors, 0 when none are left.
    pub fn sweep(&mut self) -> u32 {
        self.peers.retain(|_, peer| {
            peer.miss_count += 1;
            peer.miss_count < MAX_MISS_COUNT
        });

        self.peers.values().map(|p| p.last).max().unwrap_or_default()
    }

    /// Point-in-time copy for publication to the fetch machinery.
    pub fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot(self.peers.values().copied().collect())
    }
}

/// Immutable view of the registry, as published to readers outside the
/// ingest loop.
#[derive(Debug, Default, Clone)]
pub(crate) struct PeerSnapshot(Vec<PeerInfo>);

impl PeerSnapshot {
    /// First peer in observation order that knows `height`.
    pub fn select_source(&self, height: u32) -> Option<u16> {
        self.0.iter().find(|p| p.last >= height).map(|p| p.index)
    }

    /// Peers sorted by advertised tip, highest first. The sort is stable,
    /// so ties keep observation order.
    pub fn ordered_by_tip_desc(&self) -> Vec<PeerInfo> {
        let mut peers = self.0.clone();
        peers.sort_by(|a, b| b.last.cmp(&a.last));
        peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_monotonic() {
        let mut registry = PeerRegistry::default();

        registry.observe(7, 100);
        registry.observe(7, 90);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.select_source(100), Some(7));

        registry.observe(7, 120);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.select_source(120), Some(7));
        assert_eq!(snapshot.select_source(121), None);
    }

    #[test]
    fn test_observe_is_idempotent() {
        let mut registry = PeerRegistry::default();

        registry.observe(1, 10);
        registry.observe(2, 20);
        let first = registry.snapshot().ordered_by_tip_desc();

        registry.observe(2, 20);
        let second = registry.snapshot().ordered_by_tip_desc();

        assert_eq!(first, second);
    }

    #[test]
    fn test_sweep_evicts_silent_peers() {
        let mut registry = PeerRegistry::default();

        registry.observe(1, 50);
        registry.observe(2, 30);

        // Peer 2 keeps refreshing, peer 1 goes silent
        for _ in 0..(MAX_MISS_COUNT - 1) {
            assert_eq!(registry.sweep(), 50);
            registry.observe(2, 30);
        }

        // Tenth consecutive miss expires peer 1
        assert_eq!(registry.sweep(), 30);
        assert_eq!(registry.snapshot().select_source(31), None);
    }

    #[test]
    fn test_sweep_empty_registry() {
        let mut registry = PeerRegistry::default();
        assert_eq!(registry.sweep(), 0);
    }

    #[test]
    fn test_select_source_takes_first_in_observation_order() {
        let mut registry = PeerRegistry::default();

        registry.observe(5, 80);
        registry.observe(3, 90);
        registry.observe(9, 95);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.select_source(70), Some(5));
        assert_eq!(snapshot.select_source(85), Some(3));
        assert_eq!(snapshot.select_source(92), Some(9));
        assert_eq!(snapshot.select_source(96), None);
    }

    #[test]
    fn test_ordered_by_tip_desc_keeps_ties_stable() {
        let mut registry = PeerRegistry::default();

        registry.observe(4, 60);
        registry.observe(2, 60);
        registry.observe(1, 75);

        let ordered = registry.snapshot().ordered_by_tip_desc();
        let indexes: Vec<u16> = ordered.iter().map(|p| p.index).collect();
        assert_eq!(indexes, vec![1, 4, 2]);
    }
}
