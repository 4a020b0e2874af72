// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Push-in first-out queue.
//!
//! A PIFO accepts entries at any position (decided by their rank) and always
//! releases the entry with the lowest rank. Ranks are fixed once pushed.
//!
//! # Tie-break
//!
//! Entries with equal rank leave in insertion order. Every push is stamped
//! with a per-PIFO sequence number which is the secondary heap key, so the
//! order does not depend on `BinaryHeap` internals.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::entry::ScheduleEntry;
use crate::Timestamp;

/// Heap slot: entry plus its insertion sequence.
#[derive(Debug)]
struct Slot<T> {
    seq: u64,
    entry: ScheduleEntry<T>,
}

// Min-heap on (rank, seq)
impl<T> Eq for Slot<T> {}

impl<T> PartialEq for Slot<T> {
    fn eq(&self, other: &Self) -> bool {
        self.entry.rank == other.entry.rank && self.seq == other.seq
    }
}

impl<T> Ord for Slot<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .entry
            .rank
            .cmp(&self.entry.rank)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for Slot<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Rank-ordered queue of [`ScheduleEntry`].
#[derive(Debug)]
pub struct Pifo<T> {
    heap: BinaryHeap<Slot<T>>,
    next_seq: u64,
    last_pop_time: Timestamp,
    last_push_tx_time: Option<Timestamp>,
    bytes: u64,
}

impl<T> Default for Pifo<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Pifo<T> {
    /// Create an empty PIFO.
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
            last_pop_time: 0,
            last_push_tx_time: None,
            bytes: 0,
        }
    }

    /// Insert an entry, stamping its `tx_delta`.
    pub fn push(&mut self, mut entry: ScheduleEntry<T>) {
        entry.tx_delta = self
            .last_push_tx_time
            .map_or(0, |prev| entry.tx_time.saturating_sub(prev));
        self.last_push_tx_time = Some(entry.tx_time);
        self.bytes += u64::from(entry.pkt_len);

        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Slot { seq, entry });
    }

    /// Remove the lowest-rank entry and record `now` as the last extraction.
    ///
    /// Returns `None` on an empty PIFO; the extraction time is left untouched.
    pub fn pop(&mut self, now: Timestamp) -> Option<ScheduleEntry<T>> {
        let slot = self.heap.pop()?;
        self.last_pop_time = now;
        self.bytes = self.bytes.saturating_sub(u64::from(slot.entry.pkt_len));
        Some(slot.entry)
    }

    /// Look at the lowest-rank entry.
    pub fn peek(&self) -> Option<&ScheduleEntry<T>> {
        self.heap.peek().map(|slot| &slot.entry)
    }

    /// Insertion sequence of the head, identifying it across pushes.
    pub fn head_seq(&self) -> Option<u64> {
        self.heap.peek().map(|slot| slot.seq)
    }

    /// Remove the first entry matching `pred`, wherever it sits.
    ///
    /// Linear in the PIFO length. The extraction time is left untouched.
    pub fn remove_where(
        &mut self,
        mut pred: impl FnMut(&ScheduleEntry<T>) -> bool,
    ) -> Option<ScheduleEntry<T>> {
        let mut slots = std::mem::take(&mut self.heap).into_vec();
        let found = slots
            .iter()
            .position(|slot| pred(&slot.entry))
            .map(|idx| slots.swap_remove(idx));
        self.heap = BinaryHeap::from(slots);

        let slot = found?;
        self.bytes = self.bytes.saturating_sub(u64::from(slot.entry.pkt_len));
        Some(slot.entry)
    }

    /// Entries in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &ScheduleEntry<T>> {
        self.heap.iter().map(|slot| &slot.entry)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether the PIFO holds no entries.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Sum of `pkt_len` over the held entries.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Time of the last successful [`pop`](Self::pop).
    pub fn last_pop_time(&self) -> Timestamp {
        self.last_pop_time
    }
}
