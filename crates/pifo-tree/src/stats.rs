// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tree counters.

use std::fmt;

use crate::telemetry::Telemetry;
use crate::NodeId;

/// Why an arrival was not enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// The ingress pipeline refused the packet.
    IngressDrop,
    /// A node's enqueue pipeline refused the packet.
    NodeDrop,
    /// Admitting the packet would exceed the queue limit.
    QueueLimitExceeded,
}

impl DropReason {
    /// Short tag used in logs and drop statistics.
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::IngressDrop => "P4 drop",
            DropReason::NodeDrop => "Node drop",
            DropReason::QueueLimitExceeded => "Queue limit exceeded",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate counters of a [`PifoTree`](crate::PifoTree).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub enqueued_packets: u64,
    pub enqueued_bytes: u64,
    pub dequeued_packets: u64,
    pub dequeued_bytes: u64,
    pub ingress_drops: u64,
    pub node_drops: u64,
    pub limit_drops: u64,
    /// Idle decay ticks applied.
    pub idle_ticks: u64,
    /// Announcements pushed into a parent.
    pub announcements: u64,
    /// Live announcements pulled back after the announced head moved.
    pub retractions: u64,
}

impl TreeStats {
    pub(crate) fn record_drop(&mut self, reason: DropReason) {
        match reason {
            DropReason::IngressDrop => self.ingress_drops += 1,
            DropReason::NodeDrop => self.node_drops += 1,
            DropReason::QueueLimitExceeded => self.limit_drops += 1,
        }
    }

    /// Drops for `reason`.
    pub fn drops_for(&self, reason: DropReason) -> u64 {
        match reason {
            DropReason::IngressDrop => self.ingress_drops,
            DropReason::NodeDrop => self.node_drops,
            DropReason::QueueLimitExceeded => self.limit_drops,
        }
    }

    /// All drops.
    pub fn drops(&self) -> u64 {
        self.ingress_drops + self.node_drops + self.limit_drops
    }
}

/// Per-node counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStats {
    pub id: NodeId,
    pub leaf: bool,
    /// Arrivals stored in this node's pifos.
    pub arrivals: u64,
    /// Entries extracted from this node's pifos.
    pub served: u64,
    /// Entries currently held.
    pub resident: usize,
    /// Latest pipeline telemetry.
    pub telemetry: Telemetry,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_accounting() {
        let mut s = TreeStats::default();
        s.record_drop(DropReason::IngressDrop);
        s.record_drop(DropReason::QueueLimitExceeded);
        s.record_drop(DropReason::QueueLimitExceeded);
        assert_eq!(s.drops(), 3);
        assert_eq!(s.drops_for(DropReason::QueueLimitExceeded), 2);
        assert_eq!(s.drops_for(DropReason::NodeDrop), 0);
        assert_eq!(DropReason::IngressDrop.to_string(), "P4 drop");
    }
}
