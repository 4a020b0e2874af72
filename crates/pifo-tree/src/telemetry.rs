// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Named telemetry values emitted by decision pipelines.

use std::collections::BTreeMap;

/// Open set of named numeric values.
///
/// Pipelines fill one per decision; nodes fold them into their own set where
/// the latest value per name wins.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Telemetry {
    values: BTreeMap<String, u64>,
}

impl Telemetry {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` to `value`.
    pub fn set(&mut self, name: impl Into<String>, value: u64) {
        self.values.insert(name.into(), value);
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, name: impl Into<String>, value: u64) -> Self {
        self.set(name, value);
        self
    }

    /// Read a value.
    pub fn get(&self, name: &str) -> Option<u64> {
        self.values.get(name).copied()
    }

    /// Fold `other` into `self`, overwriting existing names.
    pub fn merge(&mut self, other: &Telemetry) {
        for (k, v) in &other.values {
            self.values.insert(k.clone(), *v);
        }
    }

    /// Iterate in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Quantized queue-management state visible to every pipeline.
///
/// Each field is an integer code in `[0, 2^q_size_bits - 1]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueTelemetry {
    /// Average occupancy.
    pub avg_qsize: u32,
    /// Queueing latency estimate.
    pub latency: u32,
    /// Dequeue rate estimate.
    pub dq_rate: u32,
}
