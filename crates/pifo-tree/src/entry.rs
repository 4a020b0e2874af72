// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Entries held inside a PIFO.

use crate::pipeline::FlowFields;
use crate::{Rank, Timestamp};

/// What a [`ScheduleEntry`] points at.
///
/// Leaf PIFOs hold the queued item itself; PIFOs of non-leaf nodes hold
/// announcements naming the child PIFO where the real entry lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryRef<T> {
    /// Queued item, owned by the entry until it is dequeued.
    Item(T),
    /// Announcement for pifo `pifo` of the child at position `local_id`.
    Child { local_id: usize, pifo: usize },
}

/// A single element of a PIFO.
///
/// The reference kind is fixed at construction: an entry is either an item
/// or an announcement for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry<T> {
    reference: EntryRef<T>,
    /// Scheduling rank, lower ranks leave first.
    pub rank: Rank,
    /// Absolute virtual time at which the entry becomes eligible.
    pub tx_time: Timestamp,
    /// Eligibility time relative to the previous entry pushed into the same PIFO.
    pub tx_delta: u64,
    /// Length of the underlying packet in bytes.
    pub pkt_len: u32,
    /// Flow fields of the underlying packet.
    pub flow: FlowFields,
}

impl<T> ScheduleEntry<T> {
    /// Create a leaf entry carrying `item`.
    pub fn item(item: T, rank: Rank, tx_time: Timestamp, pkt_len: u32) -> Self {
        Self {
            reference: EntryRef::Item(item),
            rank,
            tx_time,
            tx_delta: 0,
            pkt_len,
            flow: FlowFields::default(),
        }
    }

    /// Create an announcement entry for `pifo` of child `local_id`.
    pub fn announcement(
        local_id: usize,
        pifo: usize,
        rank: Rank,
        tx_time: Timestamp,
        pkt_len: u32,
    ) -> Self {
        Self {
            reference: EntryRef::Child { local_id, pifo },
            rank,
            tx_time,
            tx_delta: 0,
            pkt_len,
            flow: FlowFields::default(),
        }
    }

    /// Attach the flow fields of the underlying packet.
    pub fn with_flow(mut self, flow: FlowFields) -> Self {
        self.flow = flow;
        self
    }

    /// Borrow the reference.
    pub fn reference(&self) -> &EntryRef<T> {
        &self.reference
    }

    /// The queued item, if this is a leaf entry.
    pub fn as_item(&self) -> Option<&T> {
        match &self.reference {
            EntryRef::Item(item) => Some(item),
            EntryRef::Child { .. } => None,
        }
    }

    /// `(local_id, pifo)` of the announced child queue, if this is an announcement.
    pub fn child(&self) -> Option<(usize, usize)> {
        match self.reference {
            EntryRef::Child { local_id, pifo } => Some((local_id, pifo)),
            EntryRef::Item(_) => None,
        }
    }

    /// Whether the entry carries an item.
    pub fn is_item(&self) -> bool {
        matches!(self.reference, EntryRef::Item(_))
    }

    /// Consume the entry and hand over its reference.
    pub fn into_ref(self) -> EntryRef<T> {
        self.reference
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_entry() {
        let e = ScheduleEntry::item("pkt", 7, 100, 1500);
        assert!(e.is_item());
        assert_eq!(e.as_item(), Some(&"pkt"));
        assert_eq!(e.child(), None);
        assert_eq!(e.tx_delta, 0);
        assert!(e.flow.is_empty());

        let e = e.with_flow(FlowFields::new().with("flow", 4));
        assert_eq!(e.flow.get("flow"), Some(4));
    }

    #[test]
    fn test_announcement_entry() {
        let e: ScheduleEntry<u32> = ScheduleEntry::announcement(2, 1, 5, 0, 64);
        assert!(!e.is_item());
        assert_eq!(e.child(), Some((2, 1)));
        assert_eq!(e.as_item(), None);
        assert_eq!(e.into_ref(), EntryRef::Child { local_id: 2, pifo: 1 });
    }
}
