// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The assembled scheduling tree and its root queue disc.
//!
//! Nodes live in an arena indexed by [`NodeId`]. Arrivals descend from the
//! root to a leaf; every push into a pifo of a non-root node schedules a
//! refresh that publishes an announcement into the parent, so each non-empty
//! pifo keeps exactly one announcement upstream. When a push or a removal
//! moves the head of a pifo whose announcement is already live, that
//! announcement is pulled out of the parent and published again for the new
//! head. A root dequeue follows the announcements down to the owning leaf.
//!
//! All deferred work (announcement refreshes, idle decay ticks) goes through
//! one [`Timeline`]. Public operations dispatch events due at the current
//! instant after they finish; [`PifoTree::advance_to`] moves time forward.

use std::collections::VecDeque;
use std::fmt;

use crate::entry::{EntryRef, ScheduleEntry};
use crate::error::{PifoError, Result, TopologyError};
use crate::limits::{Occupancy, QueueSize};
use crate::monitor::{AdaptiveQueueMonitor, MonitorParams, MonitorSnapshot};
use crate::node::{Announce, NodeState, SchedulingNode};
use crate::pifo::Pifo;
use crate::pipeline::{
    AcceptAll, Announcement, DequeuePipeline, EnqueueAction, EnqueueKind, EnqueuePipeline,
    FlowFields, IngressMeta, IngressPipeline, PipelineRegistry, ProgramSource, QueueItem,
};
use crate::stats::{DropReason, NodeStats, TreeStats};
use crate::telemetry::{QueueTelemetry, Telemetry};
use crate::timeline::{EventId, Timeline};
use crate::{NodeId, Timestamp};

/// Result of [`PifoTree::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    Dropped(DropReason),
}

impl EnqueueOutcome {
    pub fn is_enqueued(&self) -> bool {
        matches!(self, EnqueueOutcome::Enqueued)
    }
}

#[derive(Debug, Clone)]
enum TreeEvent {
    IdleTick,
    Announce { node: NodeId, pifo: usize },
}

/// Hierarchical PIFO scheduler with adaptive queue management at the root.
pub struct PifoTree<T> {
    nodes: Vec<SchedulingNode<T>>,
    root: Option<NodeId>,
    active: bool,
    timeline: Timeline<TreeEvent>,
    ingress: Box<dyn IngressPipeline>,
    ingress_telemetry: Telemetry,
    limit: QueueSize,
    occupancy: Occupancy,
    monitor: AdaptiveQueueMonitor,
    stats: TreeStats,
}

impl<T> fmt::Debug for PifoTree<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PifoTree")
            .field("nodes", &self.nodes.len())
            .field("root", &self.root)
            .field("active", &self.active)
            .field("now", &self.timeline.now())
            .field("ingress", &self.ingress.name())
            .field("limit", &self.limit)
            .field("occupancy", &self.occupancy)
            .field("stats", &self.stats)
            .finish()
    }
}

fn invalid_decision(node: NodeId, reason: &str) -> PifoError {
    log::warn!("[pifo-tree] node {}: {}", node, reason);
    PifoError::InvalidDecision {
        node,
        reason: reason.to_string(),
    }
}

impl<T: QueueItem> PifoTree<T> {
    /// Empty, unconfigured tree holding at most `limit`.
    pub fn new(limit: QueueSize, params: MonitorParams) -> Result<Self> {
        params.validate().map_err(PifoError::InvalidParameter)?;
        if limit.value() == 0 {
            return Err(PifoError::InvalidParameter("queue limit must be > 0".into()));
        }
        let max_bytes = match limit {
            QueueSize::Packets(n) => n.saturating_mul(u64::from(params.mean_pkt_size)),
            QueueSize::Bytes(n) => n,
        };
        Ok(Self {
            nodes: Vec::new(),
            root: None,
            active: false,
            timeline: Timeline::new(),
            ingress: Box::new(AcceptAll),
            ingress_telemetry: Telemetry::new(),
            limit,
            occupancy: Occupancy::default(),
            monitor: AdaptiveQueueMonitor::new(params, limit.value(), max_bytes),
            stats: TreeStats::default(),
        })
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    fn ensure_configurable(&self) -> Result<()> {
        if self.active {
            Err(PifoError::AlreadyActive)
        } else {
            Ok(())
        }
    }

    fn node(&self, id: NodeId) -> Result<&SchedulingNode<T>> {
        self.nodes
            .get(id as usize)
            .ok_or(PifoError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut SchedulingNode<T>> {
        self.nodes
            .get_mut(id as usize)
            .ok_or(PifoError::UnknownNode(id))
    }

    /// Create a node and return its global id.
    pub fn add_node(&mut self, leaf: bool) -> Result<NodeId> {
        self.ensure_configurable()?;
        let id = NodeId::try_from(self.nodes.len())
            .map_err(|_| PifoError::InvalidParameter("too many nodes".into()))?;
        self.nodes.push(SchedulingNode::new(id, leaf));
        log::debug!("[pifo-tree] add node {} (leaf={})", id, leaf);
        Ok(id)
    }

    /// Give `node` `n` pifos. Only allowed once.
    pub fn add_pifos(&mut self, node: NodeId, n: usize) -> Result<()> {
        self.ensure_configurable()?;
        Ok(self.node_mut(node)?.add_pifos(n)?)
    }

    /// Install the enqueue pipeline built from `src`.
    pub fn set_enqueue_logic(
        &mut self,
        node: NodeId,
        src: &ProgramSource,
        registry: &PipelineRegistry,
    ) -> Result<()> {
        self.ensure_configurable()?;
        let pipeline = registry.build_enqueue(src)?;
        Ok(self.node_mut(node)?.set_enqueue(pipeline)?)
    }

    /// Install the dequeue pipeline built from `src`.
    pub fn set_dequeue_logic(
        &mut self,
        node: NodeId,
        src: &ProgramSource,
        registry: &PipelineRegistry,
    ) -> Result<()> {
        self.ensure_configurable()?;
        let pipeline = registry.build_dequeue(src)?;
        Ok(self.node_mut(node)?.set_dequeue(pipeline)?)
    }

    /// Install the ingress pipeline built from `src`.
    pub fn set_ingress_logic(&mut self, src: &ProgramSource, registry: &PipelineRegistry) -> Result<()> {
        self.ensure_configurable()?;
        self.ingress = registry.build_ingress(src)?;
        Ok(())
    }

    pub fn set_enqueue_pipeline(
        &mut self,
        node: NodeId,
        pipeline: impl EnqueuePipeline + 'static,
    ) -> Result<()> {
        self.ensure_configurable()?;
        Ok(self.node_mut(node)?.set_enqueue(Box::new(pipeline))?)
    }

    pub fn set_dequeue_pipeline(
        &mut self,
        node: NodeId,
        pipeline: impl DequeuePipeline + 'static,
    ) -> Result<()> {
        self.ensure_configurable()?;
        Ok(self.node_mut(node)?.set_dequeue(Box::new(pipeline))?)
    }

    pub fn set_ingress_pipeline(&mut self, pipeline: impl IngressPipeline + 'static) -> Result<()> {
        self.ensure_configurable()?;
        self.ingress = Box::new(pipeline);
        Ok(())
    }

    /// Append `child` to `parent`'s children. The child's local id is its
    /// position among its siblings.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.ensure_configurable()?;
        self.node(child)?;
        let p = self.node(parent)?;
        if parent == child {
            return Err(TopologyError::SelfEdge(child).into());
        }
        if p.state() != NodeState::Unconfigured {
            return Err(TopologyError::NotConfigurable {
                node: parent,
                state: p.state(),
            }
            .into());
        }

        // Walking up from `parent` must never meet `child`.
        let mut cursor = p.parent();
        while let Some(up) = cursor {
            if up == child {
                return Err(TopologyError::Cycle { parent, child }.into());
            }
            cursor = self.node(up)?.parent();
        }

        self.node_mut(child)?.set_parent(parent)?;
        let local = self.node_mut(parent)?.push_child(child)?;
        self.node_mut(child)?.set_local_id(local);
        log::debug!("[pifo-tree] edge {} -> {} (local {})", parent, child, local);
        Ok(())
    }

    /// Same edge as [`add_child`](Self::add_child), named from the child side.
    pub fn add_parent(&mut self, child: NodeId, parent: NodeId) -> Result<()> {
        self.add_child(parent, child)
    }

    /// Validate one node, moving it to `Configured`.
    pub fn validate_node(&mut self, node: NodeId) -> Result<()> {
        Ok(self.node_mut(node)?.validate()?)
    }

    /// Validate the whole tree and bring it into service.
    ///
    /// Nothing is activated unless every check passes.
    pub fn activate(&mut self) -> Result<()> {
        self.ensure_configurable()?;
        let roots: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|n| n.parent().is_none())
            .map(|n| n.id())
            .collect();
        let root = match roots.as_slice() {
            [] => return Err(TopologyError::NoRoot.into()),
            [root] => *root,
            _ => return Err(TopologyError::MultipleRoots(roots).into()),
        };

        let mut seen = vec![false; self.nodes.len()];
        let mut queue = VecDeque::from([root]);
        while let Some(id) = queue.pop_front() {
            if std::mem::replace(&mut seen[id as usize], true) {
                continue;
            }
            queue.extend(self.node(id)?.children().iter().copied());
        }
        if let Some(lost) = seen.iter().position(|s| !s) {
            return Err(TopologyError::Unreachable(lost as NodeId).into());
        }

        for node in &self.nodes {
            node.check()?;
        }
        for node in &mut self.nodes {
            node.validate()?;
            node.activate();
        }
        self.root = Some(root);
        self.active = true;
        log::debug!(
            "[pifo-tree] activated: {} nodes, root {}, limit {}",
            self.nodes.len(),
            root,
            self.limit
        );
        Ok(())
    }

    // ========================================================================
    // Root queue disc
    // ========================================================================

    fn root_id(&self) -> Result<NodeId> {
        match (self.active, self.root) {
            (true, Some(root)) => Ok(root),
            _ => Err(PifoError::NotActive),
        }
    }

    /// Offer `item` to the tree.
    ///
    /// Drops (ingress, node pipeline, capacity) are reported in the outcome;
    /// errors mean the tree or a pipeline is misconfigured.
    pub fn enqueue(&mut self, item: T) -> Result<EnqueueOutcome> {
        let root = self.root_id()?;
        let now = self.timeline.now();
        let pkt_len = item.size();
        let mut flow = item.flow_fields();
        let queued = self.occupancy.in_unit_of(self.limit);

        // committed once the outcome is known
        let sample = self.monitor.sample_arrival(now, queued);
        let telemetry = self.monitor.telemetry_with(&sample);
        let meta = IngressMeta {
            now,
            pkt_len,
            flow: flow.clone(),
            occupancy: self.occupancy,
            qsize: self.monitor.quantize_size(queued),
            telemetry,
            idle: self.monitor.is_idle(),
        };
        let decision = self.ingress.decide(&meta);
        self.ingress_telemetry.merge(&decision.telemetry);

        let outcome = if decision.drop {
            EnqueueOutcome::Dropped(DropReason::IngressDrop)
        } else if self.occupancy.would_exceed(self.limit, pkt_len) {
            EnqueueOutcome::Dropped(DropReason::QueueLimitExceeded)
        } else {
            flow.merge(&decision.fields);
            if self.enqueue_leaf(root, item, pkt_len, &flow, telemetry)? {
                EnqueueOutcome::Enqueued
            } else {
                EnqueueOutcome::Dropped(DropReason::NodeDrop)
            }
        };
        self.monitor.commit_arrival(sample);

        match outcome {
            EnqueueOutcome::Enqueued => {
                self.occupancy.add(pkt_len);
                self.stats.enqueued_packets += 1;
                self.stats.enqueued_bytes += u64::from(pkt_len);
                if let Some(timer) = self.monitor.on_busy() {
                    self.timeline.cancel(timer);
                }
                log::trace!("[pifo-tree] t={} enqueued {}B", now, pkt_len);
            }
            EnqueueOutcome::Dropped(reason) => {
                self.stats.record_drop(reason);
                log::trace!("[pifo-tree] t={} dropped {}B: {}", now, pkt_len, reason);
            }
        }

        self.dispatch_due()?;
        Ok(outcome)
    }

    /// Remove the next item chosen by the root's pipeline.
    ///
    /// `Ok(None)` when nothing is eligible right now.
    pub fn dequeue(&mut self) -> Result<Option<T>> {
        let root = self.root_id()?;
        let out = self.dequeue_node(root)?;
        self.finish_dequeue(out)
    }

    /// Remove the next item from root pifo `pifo`, bypassing the root's
    /// dequeue pipeline. Falls back to the pipeline when that pifo is empty.
    pub fn dequeue_from_pifo(&mut self, pifo: usize) -> Result<Option<T>> {
        let root = self.root_id()?;
        let out = self.dequeue_from(root, Some(pifo))?;
        self.finish_dequeue(out)
    }

    fn finish_dequeue(&mut self, out: Option<(T, u32)>) -> Result<Option<T>> {
        let item = match out {
            Some((item, pkt_len)) => {
                self.on_departure(pkt_len);
                Some(item)
            }
            None => None,
        };
        self.dispatch_due()?;
        Ok(item)
    }

    fn on_departure(&mut self, pkt_len: u32) {
        let now = self.timeline.now();
        self.occupancy.remove(pkt_len);
        self.stats.dequeued_packets += 1;
        self.stats.dequeued_bytes += u64::from(pkt_len);
        self.monitor.on_departure(now, pkt_len, self.occupancy.bytes);
        log::trace!("[pifo-tree] t={} dequeued {}B", now, pkt_len);

        if self.occupancy.is_empty() {
            if let Some(stale) = self.monitor.take_timer() {
                self.timeline.cancel(stale);
            }
            self.monitor.on_empty(now);
            let period = self.monitor.params().time_reference_ns;
            let timer = self.timeline.schedule_after(period, TreeEvent::IdleTick);
            self.monitor.arm(timer);
        }
    }

    /// The item the next [`dequeue`](Self::dequeue) would return, without
    /// touching any state.
    pub fn peek(&self) -> Result<Option<&T>> {
        let root = self.root_id()?;
        let node = self.node(root)?;
        let decision = node.peek_dequeue(&node.dequeue_meta(self.timeline.now()))?;
        let Some(mut pifo) = decision.pifo else {
            return Ok(None);
        };

        let mut id = root;
        loop {
            let node = self.node(id)?;
            match node.peek_entry(pifo)?.reference() {
                EntryRef::Item(item) => return Ok(Some(item)),
                EntryRef::Child {
                    local_id,
                    pifo: child_pifo,
                } => {
                    id = node.child_at(*local_id)?;
                    pifo = *child_pifo;
                }
            }
        }
    }

    // ========================================================================
    // Time
    // ========================================================================

    /// Current virtual time.
    pub fn now(&self) -> Timestamp {
        self.timeline.now()
    }

    /// Run every event due up to `t`, then set the clock to `t`.
    pub fn advance_to(&mut self, t: Timestamp) -> Result<()> {
        self.dispatch(t)?;
        self.timeline.set_now(t);
        Ok(())
    }

    pub fn advance(&mut self, delta: u64) -> Result<()> {
        self.advance_to(self.now().saturating_add(delta))
    }

    /// Earliest future instant at which something may change: a pending
    /// event or a root head becoming eligible.
    pub fn next_ready_time(&mut self) -> Option<Timestamp> {
        let now = self.timeline.now();
        let event = self.timeline.next_event_time();
        let head = self
            .root
            .and_then(|root| self.nodes.get(root as usize))
            .and_then(|root| {
                (0..root.pifo_count())
                    .filter_map(|i| root.pifo(i).and_then(Pifo::peek))
                    .map(|e| e.tx_time)
                    .filter(|&t| t > now)
                    .min()
            });
        [event, head].into_iter().flatten().min()
    }

    fn dispatch_due(&mut self) -> Result<()> {
        self.dispatch(self.timeline.now())
    }

    fn dispatch(&mut self, limit: Timestamp) -> Result<()> {
        while let Some((id, event)) = self.timeline.pop_due(limit) {
            match event {
                TreeEvent::IdleTick => self.on_idle_tick(),
                TreeEvent::Announce { node, pifo } => self.refresh_announcement(id, node, pifo)?,
            }
        }
        Ok(())
    }

    fn on_idle_tick(&mut self) {
        let now = self.timeline.now();
        if self.monitor.on_idle_tick(now) {
            self.stats.idle_ticks += 1;
            let period = self.monitor.params().time_reference_ns;
            let timer = self.timeline.schedule_after(period, TreeEvent::IdleTick);
            self.monitor.arm(timer);
        }
    }

    // ========================================================================
    // Node operations
    // ========================================================================

    /// Walk an arrival down from `start` until a leaf pushes it.
    /// Returns `false` when a pipeline drops it.
    fn enqueue_leaf(
        &mut self,
        start: NodeId,
        item: T,
        pkt_len: u32,
        flow: &FlowFields,
        telemetry: QueueTelemetry,
    ) -> Result<bool> {
        let now = self.timeline.now();
        let mut id = start;
        loop {
            let node = self.node_mut(id)?;
            let meta = node.enqueue_meta(now, EnqueueKind::Arrival, pkt_len, flow.clone(), telemetry);
            let decision = node.decide_enqueue(&meta)?;
            match decision.action {
                EnqueueAction::Drop => {
                    log::trace!("[pifo-tree] node {} dropped arrival", id);
                    return Ok(false);
                }
                EnqueueAction::Descend { child } => {
                    if node.is_leaf() {
                        return Err(invalid_decision(id, "leaf cannot descend"));
                    }
                    node.local_of(child)?;
                    id = child;
                }
                EnqueueAction::Push {
                    pifo,
                    rank,
                    tx_time,
                } => {
                    if !node.is_leaf() {
                        return Err(invalid_decision(
                            id,
                            "arrival pushed into a non-leaf node",
                        ));
                    }
                    let tx_time = tx_time.map_or(now, |t| t.max(now));
                    let prev_head = node.head_seq(pifo);
                    let entry =
                        ScheduleEntry::item(item, rank, tx_time, pkt_len).with_flow(flow.clone());
                    node.push(pifo, entry)?;
                    self.head_moved(id, pifo, prev_head)?;
                    return Ok(true);
                }
            }
        }
    }

    /// Let `parent` publish the head of one of its child's pifos. `flow`
    /// holds the fields of the packet behind that head.
    /// Returns `false` when the parent's pipeline declines.
    fn enqueue_announcement(
        &mut self,
        parent: NodeId,
        ann: Announcement,
        flow: FlowFields,
    ) -> Result<bool> {
        let now = self.timeline.now();
        let telemetry = self.monitor.telemetry();
        let node = self.node_mut(parent)?;
        let local = node.local_of(ann.child)?;
        let meta = node.enqueue_meta(
            now,
            EnqueueKind::Announcement(ann),
            ann.head_len,
            flow.clone(),
            telemetry,
        );
        let decision = node.decide_enqueue(&meta)?;
        match decision.action {
            EnqueueAction::Drop => Ok(false),
            EnqueueAction::Descend { .. } => {
                Err(invalid_decision(parent, "announcements cannot descend"))
            }
            EnqueueAction::Push {
                pifo,
                rank,
                tx_time,
            } => {
                let tx_time = tx_time.unwrap_or(ann.head_tx_time).max(now);
                let prev_head = node.head_seq(pifo);
                let entry =
                    ScheduleEntry::announcement(local, ann.child_pifo, rank, tx_time, ann.head_len)
                        .with_flow(flow);
                node.push(pifo, entry)?;
                self.head_moved(parent, pifo, prev_head)?;
                Ok(true)
            }
        }
    }

    /// Keep the parent's view of pifo `pifo` of `id` current after an entry
    /// went in or out. `prev_head` is the head before the change.
    fn head_moved(&mut self, id: NodeId, pifo: usize, prev_head: Option<u64>) -> Result<()> {
        let node = self.node(id)?;
        if node.head_seq(pifo) != prev_head && node.announce_state(pifo) == Announce::Live {
            self.retract_announcement(id, pifo)?;
        }
        self.schedule_next_announcement(id, pifo)
    }

    /// Pull the live announcement of pifo `pifo` of `id` out of the parent.
    fn retract_announcement(&mut self, id: NodeId, pifo: usize) -> Result<()> {
        let node = self.node(id)?;
        let local = node.local_id();
        let Some(parent) = node.parent() else {
            return Ok(());
        };
        self.node_mut(id)?.set_announce_state(pifo, Announce::Idle);

        let Some((parent_pifo, prev_head)) =
            self.node_mut(parent)?.remove_announcement(local, pifo)
        else {
            log::warn!(
                "[pifo-tree] node {} holds no announcement of {}/{}",
                parent,
                id,
                pifo
            );
            return Ok(());
        };
        self.stats.retractions += 1;
        log::trace!(
            "[pifo-tree] node {} retracted announcement of {}/{}",
            parent,
            id,
            pifo
        );
        self.head_moved(parent, parent_pifo, prev_head)
    }

    /// Make sure pifo `pifo` of `id` has an announcement on its way to the
    /// parent, due when the head becomes eligible.
    ///
    /// At most one announcement per pifo exists upstream: a live one is left
    /// alone and a pending one is only replaced by an earlier one.
    fn schedule_next_announcement(&mut self, id: NodeId, pifo: usize) -> Result<()> {
        let now = self.timeline.now();
        let node = self.node(id)?;
        if node.parent().is_none() {
            return Ok(());
        }
        let Some(head) = node.pifo(pifo).and_then(Pifo::peek) else {
            return Ok(());
        };
        let at = head.tx_time.max(now);

        match node.announce_state(pifo) {
            Announce::Live => return Ok(()),
            Announce::Pending { at: pending, .. } if pending <= at => return Ok(()),
            Announce::Pending { event, .. } => {
                self.timeline.cancel(event);
            }
            Announce::Idle => {}
        }

        let event = self.timeline.schedule_at(at, TreeEvent::Announce { node: id, pifo });
        self.node_mut(id)?
            .set_announce_state(pifo, Announce::Pending { event, at });
        log::trace!("[pifo-tree] node {} pifo {} refresh at {}", id, pifo, at);
        Ok(())
    }

    fn refresh_announcement(&mut self, event: EventId, id: NodeId, pifo: usize) -> Result<()> {
        let node = self.node(id)?;
        match node.announce_state(pifo) {
            Announce::Pending { event: pending, .. } if pending == event => {}
            _ => return Ok(()),
        }
        let Some(parent) = node.parent() else {
            return Ok(());
        };
        let head = node.pifo(pifo).and_then(Pifo::peek).map(|head| {
            let ann = Announcement {
                child: id,
                child_local: node.local_id(),
                child_pifo: pifo,
                head_rank: head.rank,
                head_tx_time: head.tx_time,
                head_len: head.pkt_len,
            };
            (ann, head.flow.clone())
        });

        self.node_mut(id)?.set_announce_state(pifo, Announce::Idle);
        let Some((ann, flow)) = head else {
            return Ok(());
        };
        if self.enqueue_announcement(parent, ann, flow)? {
            self.node_mut(id)?.set_announce_state(pifo, Announce::Live);
            self.stats.announcements += 1;
        } else {
            log::trace!("[pifo-tree] node {} declined announcement of {}/{}", parent, id, pifo);
        }
        Ok(())
    }

    /// Serve `id` through its dequeue pipeline.
    fn dequeue_node(&mut self, id: NodeId) -> Result<Option<(T, u32)>> {
        let now = self.timeline.now();
        let node = self.node_mut(id)?;
        let meta = node.dequeue_meta(now);
        match node.decide_dequeue(&meta)?.pifo {
            Some(pifo) => self.dequeue_pifo(id, pifo).map(Some),
            None => Ok(None),
        }
    }

    /// Serve pifo `pifo` of `id` directly when it holds something, otherwise
    /// fall back to the node's pipeline.
    fn dequeue_from(&mut self, id: NodeId, pifo: Option<usize>) -> Result<Option<(T, u32)>> {
        let direct = pifo.filter(|&p| {
            self.nodes
                .get(id as usize)
                .and_then(|n| n.pifo(p))
                .is_some_and(|q| !q.is_empty())
        });
        match direct {
            Some(p) => self.dequeue_pifo(id, p).map(Some),
            None => self.dequeue_node(id),
        }
    }

    /// Pop exactly pifo `pifo` of `id`, following announcements down to the leaf.
    fn dequeue_pifo(&mut self, id: NodeId, pifo: usize) -> Result<(T, u32)> {
        let now = self.timeline.now();
        let entry = self.node_mut(id)?.pop(pifo, now)?;
        let pkt_len = entry.pkt_len;
        match entry.into_ref() {
            EntryRef::Item(item) => Ok((item, pkt_len)),
            EntryRef::Child {
                local_id,
                pifo: child_pifo,
            } => {
                let child = self.node(id)?.child_at(local_id)?;
                let out = self.dequeue_pifo(child, child_pifo)?;
                self.node_mut(child)?
                    .set_announce_state(child_pifo, Announce::Idle);
                self.schedule_next_announcement(child, child_pifo)?;
                Ok(out)
            }
        }
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Look up a node.
    pub fn get_node(&self, id: NodeId) -> Option<&SchedulingNode<T>> {
        self.nodes.get(id as usize)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &SchedulingNode<T>> {
        self.nodes.iter()
    }

    pub fn limit(&self) -> QueueSize {
        self.limit
    }

    /// Items resident in the tree.
    pub fn occupancy(&self) -> Occupancy {
        self.occupancy
    }

    pub fn len(&self) -> usize {
        self.occupancy.packets as usize
    }

    pub fn is_empty(&self) -> bool {
        self.occupancy.is_empty()
    }

    pub fn stats(&self) -> &TreeStats {
        &self.stats
    }

    pub fn node_stats(&self) -> Vec<NodeStats> {
        self.nodes
            .iter()
            .map(|n| NodeStats {
                id: n.id(),
                leaf: n.is_leaf(),
                arrivals: n.arrivals(),
                served: n.served(),
                resident: n.len(),
                telemetry: n.telemetry().clone(),
            })
            .collect()
    }

    pub fn monitor(&self) -> &AdaptiveQueueMonitor {
        &self.monitor
    }

    pub fn monitor_snapshot(&self) -> MonitorSnapshot {
        self.monitor.snapshot()
    }

    /// Latest telemetry emitted by the ingress pipeline.
    pub fn ingress_telemetry(&self) -> &Telemetry {
        &self.ingress_telemetry
    }

    /// Live events waiting on the timeline.
    pub fn pending_events(&self) -> usize {
        self.timeline.pending()
    }
}
