// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Hierarchical PIFO Scheduling Tree
//!
//! Programmable packet scheduling built from a tree of push-in-first-out
//! queues, with adaptive queue management at the root.
//!
//! # Features
//!
//! - **PIFO tree**: nodes own one or more rank-ordered pifos; non-leaf pifos
//!   hold announcements of their children's heads, so a root dequeue costs
//!   `O(depth * log n)`
//! - **Decision pipelines**: per-node enqueue/dequeue strategies and an
//!   ingress admission stage, supplied as trait objects, closures or named
//!   built-in programs
//! - **Adaptive queue monitor**: EWMA occupancy kept correct through idle
//!   periods, dequeue-rate and latency estimates, quantized for pipelines
//! - **Deterministic virtual time**: one event timeline drives announcement
//!   refreshes and idle decay
//!
//! # Quick Start
//!
//! ```rust
//! use pifo_tree::pipeline::{FieldRank, FlowFields, QueueItem};
//! use pifo_tree::{MonitorParams, PifoTree, QueueSize};
//!
//! struct Packet {
//!     rank: u64,
//! }
//!
//! impl QueueItem for Packet {
//!     fn size(&self) -> u32 {
//!         1500
//!     }
//!     fn flow_fields(&self) -> FlowFields {
//!         FlowFields::new().with("rank", self.rank)
//!     }
//! }
//!
//! let mut tree = PifoTree::new(QueueSize::Packets(100), MonitorParams::default())?;
//! let leaf = tree.add_node(true)?;
//! tree.add_pifos(leaf, 1)?;
//! tree.set_enqueue_pipeline(leaf, FieldRank::new("rank"))?;
//! tree.activate()?;
//!
//! for rank in [30, 20, 10] {
//!     tree.enqueue(Packet { rank })?;
//! }
//! assert_eq!(tree.dequeue()?.map(|p| p.rank), Some(10));
//! # Ok::<(), pifo_tree::PifoError>(())
//! ```
//!
//! # Configuration File
//!
//! See [`config`] for the TOML layout loaded by [`TreeConfig`].

pub mod config;
pub mod entry;
pub mod error;
pub mod limits;
pub mod monitor;
pub mod node;
pub mod pifo;
pub mod pipeline;
pub mod stats;
pub mod telemetry;
pub mod timeline;
pub mod tree;

/// Stable global identifier of a tree node.
pub type NodeId = u32;

/// Virtual time in nanoseconds.
pub type Timestamp = u64;

/// Scheduling rank; lower ranks leave first.
pub type Rank = u64;

pub use config::{ConfigError, NodeConfig, QueueConfig, TreeConfig};
pub use entry::{EntryRef, ScheduleEntry};
pub use error::{PifoError, PipelineError, Result, TopologyError};
pub use limits::{Occupancy, QueueSize};
pub use monitor::{
    estimator, map_size, AdaptiveQueueMonitor, ArrivalSample, MonitorParams, MonitorSnapshot,
};
pub use node::{NodeState, SchedulingNode};
pub use pifo::Pifo;
pub use pipeline::{PipelineRegistry, ProgramSource, QueueItem};
pub use stats::{DropReason, NodeStats, TreeStats};
pub use telemetry::{QueueTelemetry, Telemetry};
pub use timeline::{EventId, Timeline};
pub use tree::{EnqueueOutcome, PifoTree};
