// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Queue capacity and occupancy accounting.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Maximum queue size, counted in packets or bytes.
///
/// Text form is a number followed by a unit: `"100p"` or `"150000B"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueSize {
    /// Limit on the number of packets.
    Packets(u64),
    /// Limit on the number of bytes.
    Bytes(u64),
}

impl Default for QueueSize {
    fn default() -> Self {
        QueueSize::Packets(1000)
    }
}

impl QueueSize {
    /// Numeric value regardless of unit.
    pub fn value(&self) -> u64 {
        match *self {
            QueueSize::Packets(n) | QueueSize::Bytes(n) => n,
        }
    }
}

impl fmt::Display for QueueSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueSize::Packets(n) => write!(f, "{}p", n),
            QueueSize::Bytes(n) => write!(f, "{}B", n),
        }
    }
}

impl FromStr for QueueSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (digits, ctor): (&str, fn(u64) -> QueueSize) = if let Some(d) = s.strip_suffix('p') {
            (d, QueueSize::Packets)
        } else if let Some(d) = s.strip_suffix('B') {
            (d, QueueSize::Bytes)
        } else {
            return Err(format!("queue size '{}' needs a 'p' or 'B' suffix", s));
        };
        digits
            .trim()
            .parse::<u64>()
            .map(ctor)
            .map_err(|e| format!("queue size '{}': {}", s, e))
    }
}

impl Serialize for QueueSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for QueueSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Packets and bytes currently held.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Occupancy {
    /// Resident packets.
    pub packets: u64,
    /// Resident bytes.
    pub bytes: u64,
}

impl Occupancy {
    /// Occupancy expressed in the unit of `limit`.
    pub fn in_unit_of(&self, limit: QueueSize) -> u64 {
        match limit {
            QueueSize::Packets(_) => self.packets,
            QueueSize::Bytes(_) => self.bytes,
        }
    }

    /// Whether admitting `pkt_len` more bytes would exceed `limit`.
    pub fn would_exceed(&self, limit: QueueSize, pkt_len: u32) -> bool {
        match limit {
            QueueSize::Packets(max) => self.packets + 1 > max,
            QueueSize::Bytes(max) => self.bytes + u64::from(pkt_len) > max,
        }
    }

    pub(crate) fn add(&mut self, pkt_len: u32) {
        self.packets += 1;
        self.bytes += u64::from(pkt_len);
    }

    pub(crate) fn remove(&mut self, pkt_len: u32) {
        self.packets = self.packets.saturating_sub(1);
        self.bytes = self.bytes.saturating_sub(u64::from(pkt_len));
    }

    /// Whether nothing is resident.
    pub fn is_empty(&self) -> bool {
        self.packets == 0
    }
}
