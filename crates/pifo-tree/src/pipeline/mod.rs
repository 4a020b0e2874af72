// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Decision pipelines.
//!
//! A pipeline is the per-node (or per-tree, for ingress) decision function:
//! metadata in, decision out. The tree never looks inside a pipeline; it only
//! calls `decide` and acts on the result.
//!
//! Three stages exist:
//!
//! | Stage | Called | Decides |
//! |-------|--------|---------|
//! | [`IngressPipeline`] | once per arrival, before the tree | accept / drop |
//! | [`EnqueuePipeline`] | per node on arrivals and announcements | target pifo, rank, readiness, or child to descend to |
//! | [`DequeuePipeline`] | per node on dequeue | which pifo to serve |
//!
//! Dequeue pipelines take `&self` so a dequeue decision can be replayed by
//! [`PifoTree::peek`](crate::PifoTree::peek) without side effects.
//!
//! Closures implement the traits directly:
//!
//! ```rust
//! use pifo_tree::pipeline::{EnqueueDecision, EnqueueMeta, EnqueuePipeline};
//!
//! let mut by_len = |meta: &EnqueueMeta| EnqueueDecision::push(0, u64::from(meta.pkt_len));
//! let _: &mut dyn EnqueuePipeline = &mut by_len;
//! ```

mod dequeue;
mod enqueue;
mod ingress;
mod program;

pub use dequeue::{LeastRecentlyServed, MinRank, StrictOrder};
pub use enqueue::{AnnounceRank, Classify, FieldRank, Fifo, Shaper, Stfq, StrictPriority};
pub use ingress::{AcceptAll, AvgThreshold};
pub use program::{Command, PipelineRegistry, ProgramSource};

use std::collections::BTreeMap;

use crate::limits::Occupancy;
use crate::telemetry::{QueueTelemetry, Telemetry};
use crate::{NodeId, Rank, Timestamp};

/// Flow-identifying fields of a packet (`"flow"`, `"priority"`, ...).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlowFields(BTreeMap<String, u64>);

impl FlowFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: u64) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: u64) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.0.get(name).copied()
    }

    /// Overwrite fields with those of `other`.
    pub fn merge(&mut self, other: &FlowFields) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), *v);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, u64)> for FlowFields {
    fn from_iter<I: IntoIterator<Item = (K, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Anything the tree can queue.
pub trait QueueItem {
    /// Length in bytes.
    fn size(&self) -> u32;

    /// Fields exposed to the pipelines.
    fn flow_fields(&self) -> FlowFields {
        FlowFields::default()
    }
}

/// Snapshot of one pifo as seen by a pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PifoState {
    /// Number of entries.
    pub len: usize,
    /// Bytes held.
    pub bytes: u64,
    /// Rank of the head entry.
    pub head_rank: Option<Rank>,
    /// Readiness time of the head entry.
    pub head_tx_time: Option<Timestamp>,
    /// Time of the last extraction.
    pub last_pop_time: Timestamp,
}

impl PifoState {
    /// Whether the head exists and is eligible at `now`.
    pub fn head_ready(&self, now: Timestamp) -> bool {
        self.head_tx_time.is_some_and(|t| t <= now)
    }
}

/// Metadata for the ingress stage.
#[derive(Clone, Debug, Default)]
pub struct IngressMeta {
    pub now: Timestamp,
    pub pkt_len: u32,
    pub flow: FlowFields,
    /// Raw resident packets/bytes in the whole tree.
    pub occupancy: Occupancy,
    /// Current occupancy, quantized.
    pub qsize: u32,
    /// Quantized queue-management estimates.
    pub telemetry: QueueTelemetry,
    /// Whether the tree was idle when the packet arrived.
    pub idle: bool,
}

/// Ingress verdict.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IngressDecision {
    pub drop: bool,
    /// Fields written into the packet metadata for downstream pipelines.
    pub fields: FlowFields,
    pub telemetry: Telemetry,
}

impl IngressDecision {
    pub fn accept() -> Self {
        Self::default()
    }

    pub fn drop() -> Self {
        Self {
            drop: true,
            ..Self::default()
        }
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }
}

/// Details of the child queue being announced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Announcement {
    /// Global id of the child.
    pub child: NodeId,
    /// Position of the child among its siblings.
    pub child_local: usize,
    /// Pifo of the child being announced.
    pub child_pifo: usize,
    /// Rank of the child pifo's head.
    pub head_rank: Rank,
    /// Readiness time of the child pifo's head.
    pub head_tx_time: Timestamp,
    /// Length of the child pifo's head.
    pub head_len: u32,
}

/// Why an enqueue pipeline is being invoked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueKind {
    /// A packet is arriving at this node.
    Arrival,
    /// A child is publishing the next entry of one of its pifos.
    Announcement(Announcement),
}

/// Metadata for a node's enqueue pipeline.
#[derive(Clone, Debug)]
pub struct EnqueueMeta {
    pub now: Timestamp,
    /// Node running the pipeline.
    pub node: NodeId,
    pub kind: EnqueueKind,
    pub pkt_len: u32,
    pub flow: FlowFields,
    /// State of each pifo owned by the node.
    pub pifos: Vec<PifoState>,
    /// Children by local id.
    pub children: Vec<NodeId>,
    pub telemetry: QueueTelemetry,
}

impl EnqueueMeta {
    /// The announcement details, if this is an announcement.
    pub fn announcement(&self) -> Option<&Announcement> {
        match &self.kind {
            EnqueueKind::Announcement(a) => Some(a),
            EnqueueKind::Arrival => None,
        }
    }
}

/// What the node should do with the entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueAction {
    /// Refuse the arrival (or decline to publish the announcement).
    Drop,
    /// Push into `pifo` with `rank`, eligible at `tx_time` (defaults to now).
    Push {
        pifo: usize,
        rank: Rank,
        tx_time: Option<Timestamp>,
    },
    /// Forward the arrival to child `child` (global id). Non-leaf arrivals only.
    Descend { child: NodeId },
}

/// Enqueue verdict.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnqueueDecision {
    pub action: EnqueueAction,
    pub telemetry: Telemetry,
}

impl EnqueueDecision {
    pub fn push(pifo: usize, rank: Rank) -> Self {
        Self {
            action: EnqueueAction::Push {
                pifo,
                rank,
                tx_time: None,
            },
            telemetry: Telemetry::new(),
        }
    }

    pub fn drop() -> Self {
        Self {
            action: EnqueueAction::Drop,
            telemetry: Telemetry::new(),
        }
    }

    pub fn descend(child: NodeId) -> Self {
        Self {
            action: EnqueueAction::Descend { child },
            telemetry: Telemetry::new(),
        }
    }

    /// Set the readiness time of a `Push`; no effect on other actions.
    pub fn at(mut self, when: Timestamp) -> Self {
        if let EnqueueAction::Push { tx_time, .. } = &mut self.action {
            *tx_time = Some(when);
        }
        self
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }
}

/// Metadata for a node's dequeue pipeline.
#[derive(Clone, Debug)]
pub struct DequeueMeta {
    pub now: Timestamp,
    pub node: NodeId,
    pub pifos: Vec<PifoState>,
}

/// Dequeue verdict: which pifo to serve, `None` when nothing should leave.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DequeueDecision {
    pub pifo: Option<usize>,
    pub telemetry: Telemetry,
}

impl DequeueDecision {
    pub fn serve(pifo: usize) -> Self {
        Self {
            pifo: Some(pifo),
            telemetry: Telemetry::new(),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

/// Ingress decision function.
pub trait IngressPipeline {
    fn decide(&mut self, meta: &IngressMeta) -> IngressDecision;

    /// Name used in logs.
    fn name(&self) -> &str {
        "custom"
    }
}

/// Per-node enqueue decision function.
pub trait EnqueuePipeline {
    fn decide(&mut self, meta: &EnqueueMeta) -> EnqueueDecision;

    /// Name used in logs.
    fn name(&self) -> &str {
        "custom"
    }
}

/// Per-node dequeue decision function.
pub trait DequeuePipeline {
    fn decide(&self, meta: &DequeueMeta) -> DequeueDecision;

    /// Name used in logs.
    fn name(&self) -> &str {
        "custom"
    }
}

impl<F> IngressPipeline for F
where
    F: FnMut(&IngressMeta) -> IngressDecision,
{
    fn decide(&mut self, meta: &IngressMeta) -> IngressDecision {
        self(meta)
    }
}

impl<F> EnqueuePipeline for F
where
    F: FnMut(&EnqueueMeta) -> EnqueueDecision,
{
    fn decide(&mut self, meta: &EnqueueMeta) -> EnqueueDecision {
        self(meta)
    }
}

impl<F> DequeuePipeline for F
where
    F: Fn(&DequeueMeta) -> DequeueDecision,
{
    fn decide(&self, meta: &DequeueMeta) -> DequeueDecision {
        self(meta)
    }
}

/// Candidate pifos whose head is eligible at `now`, with their index.
pub(crate) fn ready_pifos(
    pifos: &[PifoState],
    now: Timestamp,
) -> impl Iterator<Item = (usize, &PifoState)> {
    pifos
        .iter()
        .enumerate()
        .filter(move |(_, p)| p.head_ready(now))
}
