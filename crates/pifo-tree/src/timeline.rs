// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Virtual-time event queue.
//!
//! Events are ordered by `(time, insertion sequence)`, so two events due at
//! the same instant fire in the order they were scheduled. Cancellation is
//! lazy: cancelled ids are remembered and skipped when they reach the head.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use crate::Timestamp;

/// Handle returned by [`Timeline::schedule_after`], usable for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u64);

#[derive(Debug)]
struct Scheduled<E> {
    at: Timestamp,
    id: EventId,
    event: E,
}

impl<E> Eq for Scheduled<E> {}

impl<E> PartialEq for Scheduled<E> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.id == other.id
    }
}

impl<E> Ord for Scheduled<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse for min-heap
        other.at.cmp(&self.at).then_with(|| other.id.cmp(&self.id))
    }
}

impl<E> PartialOrd for Scheduled<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Single deterministic timeline.
#[derive(Debug)]
pub struct Timeline<E> {
    now: Timestamp,
    next_id: u64,
    queue: BinaryHeap<Scheduled<E>>,
    cancelled: HashSet<EventId>,
}

impl<E> Default for Timeline<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Timeline<E> {
    /// Create a timeline starting at time zero.
    pub fn new() -> Self {
        Self {
            now: 0,
            next_id: 0,
            queue: BinaryHeap::new(),
            cancelled: HashSet::new(),
        }
    }

    /// Current virtual time (ns).
    pub fn now(&self) -> Timestamp {
        self.now
    }

    /// Schedule `event` to fire `delay` ns from now.
    pub fn schedule_after(&mut self, delay: u64, event: E) -> EventId {
        self.schedule_at(self.now.saturating_add(delay), event)
    }

    /// Schedule `event` at absolute time `at` (clamped to now).
    pub fn schedule_at(&mut self, at: Timestamp, event: E) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        self.queue.push(Scheduled {
            at: at.max(self.now),
            id,
            event,
        });
        id
    }

    /// Cancel a pending event. Returns `false` if it already fired or was cancelled.
    pub fn cancel(&mut self, id: EventId) -> bool {
        if self.queue.iter().any(|s| s.id == id) {
            self.cancelled.insert(id)
        } else {
            false
        }
    }

    /// Time of the next live event.
    pub fn next_event_time(&mut self) -> Option<Timestamp> {
        self.discard_cancelled();
        self.queue.peek().map(|s| s.at)
    }

    /// Pop the next live event due at or before `limit`, advancing `now` to it.
    pub fn pop_due(&mut self, limit: Timestamp) -> Option<(EventId, E)> {
        self.discard_cancelled();
        if self.queue.peek()?.at > limit {
            return None;
        }
        let s = self.queue.pop()?;
        self.now = self.now.max(s.at);
        Some((s.id, s.event))
    }

    /// Move the clock forward without dispatching anything.
    ///
    /// Callers are expected to have drained events due before `to`.
    pub fn set_now(&mut self, to: Timestamp) {
        self.now = self.now.max(to);
    }

    /// Number of live pending events.
    pub fn pending(&self) -> usize {
        self.queue.len() - self.cancelled.len()
    }

    fn discard_cancelled(&mut self) {
        while let Some(head) = self.queue.peek() {
            if !self.cancelled.remove(&head.id) {
                break;
            }
            self.queue.pop();
        }
    }
}
