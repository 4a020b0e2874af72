// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Built-in enqueue programs.
//!
//! Every program handles both arrivals and announcements. Unless stated
//! otherwise an announcement keeps the announced head's rank, so ranks
//! compare meaningfully across levels.

use std::collections::{BTreeMap, HashMap};

use super::{
    Command, EnqueueDecision, EnqueueKind, EnqueueMeta, EnqueuePipeline, ProgramSource,
};
use crate::error::PipelineError;
use crate::telemetry::Telemetry;
use crate::{NodeId, Rank, Timestamp};

const NANOS_PER_SEC: u128 = 1_000_000_000;

fn pifo_arg(cmd: &Command) -> Result<usize, PipelineError> {
    cmd.expect_args(1)?;
    usize::try_from(cmd.u64_arg(0)?).map_err(|_| cmd.invalid("pifo index too large"))
}

/// Rank policy applied to announcements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnnounceRank {
    /// Keep the announced head's rank.
    #[default]
    HeadRank,
    /// Rank by the child's position: earlier children win.
    ChildPriority,
    /// Rank zero; equal ranks leave in announcement order.
    Fifo,
}

impl AnnounceRank {
    fn parse(cmd: &Command) -> Result<Self, PipelineError> {
        cmd.expect_args(1)?;
        match cmd.str_arg(0)? {
            "head-rank" => Ok(AnnounceRank::HeadRank),
            "child-priority" => Ok(AnnounceRank::ChildPriority),
            "fifo" => Ok(AnnounceRank::Fifo),
            other => Err(cmd.invalid(format!("unknown rank mode '{}'", other))),
        }
    }

    fn rank(&self, meta: &EnqueueMeta) -> Rank {
        match (self, meta.announcement()) {
            (AnnounceRank::HeadRank, Some(a)) => a.head_rank,
            (AnnounceRank::ChildPriority, Some(a)) => a.child_local as Rank,
            _ => 0,
        }
    }
}

/// Everything into one pifo with rank zero: first in, first out.
///
/// Commands: `pifo <n>`.
#[derive(Debug, Clone, Default)]
pub struct Fifo {
    pifo: usize,
}

impl Fifo {
    pub fn new(pifo: usize) -> Self {
        Self { pifo }
    }

    pub fn from_program(src: &ProgramSource) -> Result<Self, PipelineError> {
        let mut out = Self::default();
        for cmd in src.parsed()? {
            match cmd.name.as_str() {
                "pifo" => out.pifo = pifo_arg(&cmd)?,
                _ => return Err(cmd.unknown()),
            }
        }
        Ok(out)
    }
}

impl EnqueuePipeline for Fifo {
    fn decide(&mut self, _meta: &EnqueueMeta) -> EnqueueDecision {
        EnqueueDecision::push(self.pifo, 0)
    }

    fn name(&self) -> &str {
        "fifo"
    }
}

/// Rank taken straight from a flow field.
///
/// Commands: `field <name>`, `pifo <n>`, `default <rank>`.
#[derive(Debug, Clone)]
pub struct FieldRank {
    field: String,
    pifo: usize,
    default_rank: Rank,
}

impl FieldRank {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            pifo: 0,
            default_rank: Rank::MAX,
        }
    }

    pub fn from_program(src: &ProgramSource) -> Result<Self, PipelineError> {
        let mut out = Self::new("rank");
        for cmd in src.parsed()? {
            match cmd.name.as_str() {
                "field" => {
                    cmd.expect_args(1)?;
                    out.field = cmd.str_arg(0)?.to_string();
                }
                "pifo" => out.pifo = pifo_arg(&cmd)?,
                "default" => {
                    cmd.expect_args(1)?;
                    out.default_rank = cmd.u64_arg(0)?;
                }
                _ => return Err(cmd.unknown()),
            }
        }
        Ok(out)
    }
}

impl EnqueuePipeline for FieldRank {
    fn decide(&mut self, meta: &EnqueueMeta) -> EnqueueDecision {
        let rank = match meta.kind {
            EnqueueKind::Arrival => meta.flow.get(&self.field).unwrap_or(self.default_rank),
            EnqueueKind::Announcement(a) => a.head_rank,
        };
        EnqueueDecision::push(self.pifo, rank)
    }

    fn name(&self) -> &str {
        "field-rank"
    }
}

/// One pifo per priority level.
///
/// Arrivals go to the pifo named by the priority field (clamped to the last
/// pifo); announcements go to the pifo matching the child's position.
///
/// Commands: `field <name>`.
#[derive(Debug, Clone)]
pub struct StrictPriority {
    field: String,
}

impl Default for StrictPriority {
    fn default() -> Self {
        Self {
            field: "priority".into(),
        }
    }
}

impl StrictPriority {
    pub fn from_program(src: &ProgramSource) -> Result<Self, PipelineError> {
        let mut out = Self::default();
        for cmd in src.parsed()? {
            match cmd.name.as_str() {
                "field" => {
                    cmd.expect_args(1)?;
                    out.field = cmd.str_arg(0)?.to_string();
                }
                _ => return Err(cmd.unknown()),
            }
        }
        Ok(out)
    }
}

impl EnqueuePipeline for StrictPriority {
    fn decide(&mut self, meta: &EnqueueMeta) -> EnqueueDecision {
        let last = meta.pifos.len().saturating_sub(1);
        match meta.kind {
            EnqueueKind::Arrival => {
                let level = meta.flow.get(&self.field).unwrap_or(last as u64);
                let pifo = usize::try_from(level).unwrap_or(last).min(last);
                EnqueueDecision::push(pifo, 0)
            }
            EnqueueKind::Announcement(a) => {
                EnqueueDecision::push(a.child_local.min(last), a.child_local as Rank)
            }
        }
    }

    fn name(&self) -> &str {
        "strict-priority"
    }
}

/// Start-time fair queueing.
///
/// Each flow (keyed by a flow field) gets a virtual start tag
/// `max(virtual_time, last_finish[flow])`; the finish tag advances by
/// `pkt_len / weight`. The start tag is the rank. Virtual time follows the
/// head of the target pifo, and jumps to the largest finish tag once the
/// pifo drains.
///
/// Commands: `field <name>`, `pifo <n>`, `weight <flow> <w>`.
#[derive(Debug, Clone)]
pub struct Stfq {
    field: String,
    pifo: usize,
    weights: HashMap<u64, f64>,
    finish: HashMap<u64, u64>,
    virtual_time: u64,
    max_finish: u64,
}

impl Default for Stfq {
    fn default() -> Self {
        Self {
            field: "flow".into(),
            pifo: 0,
            weights: HashMap::new(),
            finish: HashMap::new(),
            virtual_time: 0,
            max_finish: 0,
        }
    }
}

impl Stfq {
    /// Set the weight of `flow` (minimum 0.1, as in weighted fair queueing).
    pub fn with_weight(mut self, flow: u64, weight: f64) -> Self {
        self.weights.insert(flow, weight.max(0.1));
        self
    }

    pub fn from_program(src: &ProgramSource) -> Result<Self, PipelineError> {
        let mut out = Self::default();
        for cmd in src.parsed()? {
            match cmd.name.as_str() {
                "field" => {
                    cmd.expect_args(1)?;
                    out.field = cmd.str_arg(0)?.to_string();
                }
                "pifo" => out.pifo = pifo_arg(&cmd)?,
                "weight" => {
                    cmd.expect_args(2)?;
                    let w = cmd.f64_arg(1)?;
                    if w.is_nan() || w <= 0.0 {
                        return Err(cmd.invalid("weight must be positive"));
                    }
                    out = out.with_weight(cmd.u64_arg(0)?, w);
                }
                _ => return Err(cmd.unknown()),
            }
        }
        Ok(out)
    }

    pub fn virtual_time(&self) -> u64 {
        self.virtual_time
    }
}

impl EnqueuePipeline for Stfq {
    fn decide(&mut self, meta: &EnqueueMeta) -> EnqueueDecision {
        let EnqueueKind::Arrival = meta.kind else {
            let rank = AnnounceRank::HeadRank.rank(meta);
            return EnqueueDecision::push(self.pifo, rank);
        };

        match meta.pifos.get(self.pifo).and_then(|p| p.head_rank) {
            Some(head) => self.virtual_time = self.virtual_time.max(head),
            None => self.virtual_time = self.virtual_time.max(self.max_finish),
        }

        let flow = meta.flow.get(&self.field).unwrap_or(0);
        let weight = self.weights.get(&flow).copied().unwrap_or(1.0);
        let last_finish = self.finish.get(&flow).copied().unwrap_or(0);
        let start = self.virtual_time.max(last_finish);
        let service = (f64::from(meta.pkt_len) / weight).ceil() as u64;
        let finish = start + service;
        self.finish.insert(flow, finish);
        self.max_finish = self.max_finish.max(finish);

        EnqueueDecision::push(self.pifo, start).with_telemetry(
            Telemetry::new()
                .with("virtual_time", self.virtual_time)
                .with("finish", finish),
        )
    }

    fn name(&self) -> &str {
        "stfq"
    }
}

/// Token-bucket pacing through `tx_time`.
///
/// Tracks a theoretical arrival time: an entry becomes eligible once the
/// bucket would hold enough tokens for it. Up to `burst` bytes may be
/// eligible immediately. Announcements are paced on the announced head
/// length and keep the child's head rank.
///
/// Commands: `rate <bits/s>` (required), `burst <bytes>`, `pifo <n>`.
#[derive(Debug, Clone)]
pub struct Shaper {
    rate_bps: u64,
    burst_bytes: u64,
    pifo: usize,
    tat: Timestamp,
}

impl Shaper {
    pub fn new(rate_bps: u64, burst_bytes: u64) -> Self {
        Self {
            rate_bps: rate_bps.max(1),
            burst_bytes,
            pifo: 0,
            tat: 0,
        }
    }

    pub fn from_program(src: &ProgramSource) -> Result<Self, PipelineError> {
        let mut rate = None;
        let mut out = Self::new(1, 0);
        for cmd in src.parsed()? {
            match cmd.name.as_str() {
                "rate" => {
                    cmd.expect_args(1)?;
                    let r = cmd.u64_arg(0)?;
                    if r == 0 {
                        return Err(cmd.invalid("rate must be positive"));
                    }
                    rate = Some(r);
                }
                "burst" => {
                    cmd.expect_args(1)?;
                    out.burst_bytes = cmd.u64_arg(0)?;
                }
                "pifo" => out.pifo = pifo_arg(&cmd)?,
                _ => return Err(cmd.unknown()),
            }
        }
        out.rate_bps = rate.ok_or_else(|| PipelineError::MissingCommand {
            program: src.program.clone(),
            command: "rate".into(),
        })?;
        Ok(out)
    }

    fn bytes_to_ns(&self, bytes: u64) -> u64 {
        let ns = u128::from(bytes) * 8 * NANOS_PER_SEC / u128::from(self.rate_bps);
        u64::try_from(ns).unwrap_or(u64::MAX)
    }
}

impl EnqueuePipeline for Shaper {
    fn decide(&mut self, meta: &EnqueueMeta) -> EnqueueDecision {
        let (len, rank) = match meta.kind {
            EnqueueKind::Arrival => (meta.pkt_len, 0),
            EnqueueKind::Announcement(a) => (a.head_len, a.head_rank),
        };
        let burst_ns = self.bytes_to_ns(self.burst_bytes);
        let tx_time = meta.now.max(self.tat.saturating_sub(burst_ns));
        self.tat = self.tat.max(meta.now) + self.bytes_to_ns(u64::from(len));

        EnqueueDecision::push(self.pifo, rank)
            .at(tx_time)
            .with_telemetry(Telemetry::new().with("backlog_ns", self.tat - meta.now))
    }

    fn name(&self) -> &str {
        "shaper"
    }
}

/// Non-leaf classifier.
///
/// Arrivals descend to the child mapped from a flow field (or the default
/// child; unmatched arrivals are dropped). Announcements are pushed into one
/// pifo, ranked per [`AnnounceRank`].
///
/// Commands: `match <field>`, `route <value> <child>`, `default <child>`,
/// `rank head-rank|child-priority|fifo`, `pifo <n>`.
#[derive(Debug, Clone)]
pub struct Classify {
    field: String,
    routes: BTreeMap<u64, NodeId>,
    default: Option<NodeId>,
    rank: AnnounceRank,
    pifo: usize,
}

impl Default for Classify {
    fn default() -> Self {
        Self {
            field: "class".into(),
            routes: BTreeMap::new(),
            default: None,
            rank: AnnounceRank::default(),
            pifo: 0,
        }
    }
}

impl Classify {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ..Self::default()
        }
    }

    pub fn route(mut self, value: u64, child: NodeId) -> Self {
        self.routes.insert(value, child);
        self
    }

    pub fn default_child(mut self, child: NodeId) -> Self {
        self.default = Some(child);
        self
    }

    pub fn rank(mut self, rank: AnnounceRank) -> Self {
        self.rank = rank;
        self
    }

    pub fn from_program(src: &ProgramSource) -> Result<Self, PipelineError> {
        let mut out = Self::default();
        let node_arg = |cmd: &Command, idx: usize| -> Result<NodeId, PipelineError> {
            NodeId::try_from(cmd.u64_arg(idx)?).map_err(|_| cmd.invalid("node id too large"))
        };
        for cmd in src.parsed()? {
            match cmd.name.as_str() {
                "match" => {
                    cmd.expect_args(1)?;
                    out.field = cmd.str_arg(0)?.to_string();
                }
                "route" => {
                    cmd.expect_args(2)?;
                    let child = node_arg(&cmd, 1)?;
                    out.routes.insert(cmd.u64_arg(0)?, child);
                }
                "default" => {
                    cmd.expect_args(1)?;
                    out.default = Some(node_arg(&cmd, 0)?);
                }
                "rank" => out.rank = AnnounceRank::parse(&cmd)?,
                "pifo" => out.pifo = pifo_arg(&cmd)?,
                _ => return Err(cmd.unknown()),
            }
        }
        Ok(out)
    }
}

impl EnqueuePipeline for Classify {
    fn decide(&mut self, meta: &EnqueueMeta) -> EnqueueDecision {
        match meta.kind {
            EnqueueKind::Arrival => {
                let target = meta
                    .flow
                    .get(&self.field)
                    .and_then(|v| self.routes.get(&v).copied())
                    .or(self.default);
                match target {
                    Some(child) => EnqueueDecision::descend(child),
                    None => EnqueueDecision::drop(),
                }
            }
            EnqueueKind::Announcement(_) => EnqueueDecision::push(self.pifo, self.rank.rank(meta)),
        }
    }

    fn name(&self) -> &str {
        "classify"
    }
}
