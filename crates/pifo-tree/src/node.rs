// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! A single node of the scheduling tree.
//!
//! A node owns its pifos and its decision pipelines. Edges to other nodes are
//! plain [`NodeId`]s into the tree's arena; the tree drives every operation
//! that crosses a node boundary.

use std::collections::HashMap;
use std::fmt;

use crate::entry::ScheduleEntry;
use crate::error::{PifoError, Result, TopologyError};
use crate::pifo::Pifo;
use crate::pipeline::{
    DequeueDecision, DequeueMeta, DequeuePipeline, EnqueueDecision, EnqueueKind, EnqueueMeta,
    EnqueuePipeline, Fifo, FlowFields, MinRank, PifoState,
};
use crate::telemetry::{QueueTelemetry, Telemetry};
use crate::timeline::EventId;
use crate::{NodeId, Timestamp};

/// Lifecycle of a node. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Being wired; pifos, edges and pipelines may change.
    Unconfigured,
    /// Validation passed.
    Configured,
    /// Serving enqueue/dequeue. Topology is frozen.
    Active,
}

/// Whether the parent currently holds an announcement for one of our pifos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Announce {
    Idle,
    Pending { event: EventId, at: Timestamp },
    Live,
}

/// Tree node holding one or more pifos.
pub struct SchedulingNode<T> {
    id: NodeId,
    local_id: usize,
    leaf: bool,
    state: NodeState,
    pifos: Vec<Pifo<T>>,
    announce: Vec<Announce>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    global_to_local: HashMap<NodeId, usize>,
    enqueue: Option<Box<dyn EnqueuePipeline>>,
    dequeue: Option<Box<dyn DequeuePipeline>>,
    telemetry: Telemetry,
    arrivals: u64,
    served: u64,
}

impl<T> fmt::Debug for SchedulingNode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulingNode")
            .field("id", &self.id)
            .field("local_id", &self.local_id)
            .field("leaf", &self.leaf)
            .field("state", &self.state)
            .field("pifos", &self.pifos.iter().map(Pifo::len).collect::<Vec<_>>())
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("enqueue", &self.enqueue.as_ref().map(|p| p.name().to_string()))
            .field("dequeue", &self.dequeue.as_ref().map(|p| p.name().to_string()))
            .finish()
    }
}

impl<T> SchedulingNode<T> {
    pub(crate) fn new(id: NodeId, leaf: bool) -> Self {
        Self {
            id,
            local_id: 0,
            leaf,
            state: NodeState::Unconfigured,
            pifos: Vec::new(),
            announce: Vec::new(),
            parent: None,
            children: Vec::new(),
            global_to_local: HashMap::new(),
            enqueue: None,
            dequeue: None,
            telemetry: Telemetry::new(),
            arrivals: 0,
            served: 0,
        }
    }

    /// Stable global id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Position among the parent's children (0 for the root).
    pub fn local_id(&self) -> usize {
        self.local_id
    }

    pub fn is_leaf(&self) -> bool {
        self.leaf
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in local-id order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn pifo_count(&self) -> usize {
        self.pifos.len()
    }

    pub fn pifo(&self, idx: usize) -> Option<&Pifo<T>> {
        self.pifos.get(idx)
    }

    /// Entries held across all pifos of this node.
    pub fn len(&self) -> usize {
        self.pifos.iter().map(Pifo::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pifos.iter().all(Pifo::is_empty)
    }

    /// Latest telemetry emitted by this node's pipelines.
    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Arrivals accepted through this node.
    pub fn arrivals(&self) -> u64 {
        self.arrivals
    }

    /// Entries extracted from this node.
    pub fn served(&self) -> u64 {
        self.served
    }

    fn ensure_configurable(&self) -> std::result::Result<(), TopologyError> {
        match self.state {
            NodeState::Unconfigured => Ok(()),
            state => Err(TopologyError::NotConfigurable {
                node: self.id,
                state,
            }),
        }
    }

    pub(crate) fn add_pifos(&mut self, n: usize) -> std::result::Result<(), TopologyError> {
        self.ensure_configurable()?;
        if !self.pifos.is_empty() {
            return Err(TopologyError::PifosAlreadyAllocated(self.id));
        }
        if n == 0 {
            return Err(TopologyError::ZeroPifos(self.id));
        }
        self.pifos = (0..n).map(|_| Pifo::new()).collect();
        self.announce = vec![Announce::Idle; n];
        Ok(())
    }

    pub(crate) fn set_enqueue(
        &mut self,
        pipeline: Box<dyn EnqueuePipeline>,
    ) -> std::result::Result<(), TopologyError> {
        self.ensure_configurable()?;
        self.enqueue = Some(pipeline);
        Ok(())
    }

    pub(crate) fn set_dequeue(
        &mut self,
        pipeline: Box<dyn DequeuePipeline>,
    ) -> std::result::Result<(), TopologyError> {
        self.ensure_configurable()?;
        self.dequeue = Some(pipeline);
        Ok(())
    }

    pub(crate) fn set_parent(&mut self, parent: NodeId) -> std::result::Result<(), TopologyError> {
        self.ensure_configurable()?;
        if let Some(existing) = self.parent {
            return Err(TopologyError::DuplicateParent {
                child: self.id,
                existing,
            });
        }
        self.parent = Some(parent);
        Ok(())
    }

    /// Append `child`, returning the local id it was given.
    pub(crate) fn push_child(&mut self, child: NodeId) -> std::result::Result<usize, TopologyError> {
        self.ensure_configurable()?;
        if self.global_to_local.contains_key(&child) {
            return Err(TopologyError::DuplicateChild {
                parent: self.id,
                child,
            });
        }
        let local = self.children.len();
        self.children.push(child);
        self.global_to_local.insert(child, local);
        Ok(local)
    }

    pub(crate) fn set_local_id(&mut self, local_id: usize) {
        self.local_id = local_id;
    }

    /// Check the node's own shape without changing anything.
    pub(crate) fn check(&self) -> std::result::Result<(), TopologyError> {
        if self.state != NodeState::Unconfigured {
            return Ok(());
        }
        if self.pifos.is_empty() {
            return Err(TopologyError::NoPifos(self.id));
        }
        if self.leaf {
            if !self.children.is_empty() {
                return Err(TopologyError::LeafWithChildren(self.id));
            }
        } else {
            if self.children.is_empty() {
                return Err(TopologyError::InternalWithoutChildren(self.id));
            }
            if self.enqueue.is_none() {
                return Err(TopologyError::MissingEnqueueLogic(self.id));
            }
            if self.dequeue.is_none() {
                return Err(TopologyError::MissingDequeueLogic(self.id));
            }
        }
        Ok(())
    }

    /// [`check`](Self::check), then move to `Configured`.
    ///
    /// Leaves without pipelines get `fifo` on pifo 0 and `min-rank`.
    pub(crate) fn validate(&mut self) -> std::result::Result<(), TopologyError> {
        self.check()?;
        if self.state != NodeState::Unconfigured {
            return Ok(());
        }
        if self.enqueue.is_none() {
            self.enqueue = Some(Box::new(Fifo::new(0)));
        }
        if self.dequeue.is_none() {
            self.dequeue = Some(Box::new(MinRank));
        }
        self.state = NodeState::Configured;
        Ok(())
    }

    pub(crate) fn activate(&mut self) {
        if self.state == NodeState::Configured {
            self.state = NodeState::Active;
        }
    }

    /// Local id of child `child`.
    pub(crate) fn local_of(&self, child: NodeId) -> Result<usize> {
        self.global_to_local
            .get(&child)
            .copied()
            .ok_or(PifoError::UnknownChild {
                node: self.id,
                child,
            })
    }

    /// Global id of the child at `local_id`.
    pub(crate) fn child_at(&self, local_id: usize) -> Result<NodeId> {
        self.children
            .get(local_id)
            .copied()
            .ok_or_else(|| PifoError::InvalidDecision {
                node: self.id,
                reason: format!("announcement references missing child #{}", local_id),
            })
    }

    pub(crate) fn pifo_states(&self) -> Vec<PifoState> {
        self.pifos
            .iter()
            .map(|p| {
                let head = p.peek();
                PifoState {
                    len: p.len(),
                    bytes: p.bytes(),
                    head_rank: head.map(|e| e.rank),
                    head_tx_time: head.map(|e| e.tx_time),
                    last_pop_time: p.last_pop_time(),
                }
            })
            .collect()
    }

    pub(crate) fn enqueue_meta(
        &self,
        now: Timestamp,
        kind: EnqueueKind,
        pkt_len: u32,
        flow: FlowFields,
        telemetry: QueueTelemetry,
    ) -> EnqueueMeta {
        EnqueueMeta {
            now,
            node: self.id,
            kind,
            pkt_len,
            flow,
            pifos: self.pifo_states(),
            children: self.children.clone(),
            telemetry,
        }
    }

    pub(crate) fn dequeue_meta(&self, now: Timestamp) -> DequeueMeta {
        DequeueMeta {
            now,
            node: self.id,
            pifos: self.pifo_states(),
        }
    }

    /// Run the enqueue pipeline and keep its telemetry.
    pub(crate) fn decide_enqueue(&mut self, meta: &EnqueueMeta) -> Result<EnqueueDecision> {
        let pipeline = self
            .enqueue
            .as_mut()
            .ok_or(TopologyError::MissingEnqueueLogic(self.id))?;
        let decision = pipeline.decide(meta);
        self.telemetry.merge(&decision.telemetry);
        Ok(decision)
    }

    /// Run the dequeue pipeline without recording anything.
    pub(crate) fn peek_dequeue(&self, meta: &DequeueMeta) -> Result<DequeueDecision> {
        let pipeline = self
            .dequeue
            .as_ref()
            .ok_or(TopologyError::MissingDequeueLogic(self.id))?;
        Ok(pipeline.decide(meta))
    }

    /// Run the dequeue pipeline and keep its telemetry.
    pub(crate) fn decide_dequeue(&mut self, meta: &DequeueMeta) -> Result<DequeueDecision> {
        let decision = self.peek_dequeue(meta)?;
        self.telemetry.merge(&decision.telemetry);
        Ok(decision)
    }

    pub(crate) fn check_pifo(&self, pifo: usize) -> Result<()> {
        if pifo < self.pifos.len() {
            Ok(())
        } else {
            log::warn!(
                "[pifo-tree] node {} addressed pifo {} of {}",
                self.id,
                pifo,
                self.pifos.len()
            );
            Err(PifoError::InvalidPifo {
                node: self.id,
                pifo,
                count: self.pifos.len(),
            })
        }
    }

    pub(crate) fn push(&mut self, pifo: usize, entry: ScheduleEntry<T>) -> Result<()> {
        self.check_pifo(pifo)?;
        if entry.is_item() {
            self.arrivals += 1;
        }
        self.pifos[pifo].push(entry);
        Ok(())
    }

    pub(crate) fn pop(&mut self, pifo: usize, now: Timestamp) -> Result<ScheduleEntry<T>> {
        self.check_pifo(pifo)?;
        let entry = self.pifos[pifo].pop(now).ok_or_else(|| {
            log::warn!("[pifo-tree] node {} pop from empty pifo {}", self.id, pifo);
            PifoError::EmptyPifo {
                node: self.id,
                pifo,
            }
        })?;
        self.served += 1;
        Ok(entry)
    }

    pub(crate) fn head_seq(&self, pifo: usize) -> Option<u64> {
        self.pifos.get(pifo).and_then(Pifo::head_seq)
    }

    /// Take out the announcement for pifo `child_pifo` of the child at
    /// `local_id`. Returns the pifo it sat in and that pifo's head before
    /// the removal.
    pub(crate) fn remove_announcement(
        &mut self,
        local_id: usize,
        child_pifo: usize,
    ) -> Option<(usize, Option<u64>)> {
        self.pifos.iter_mut().enumerate().find_map(|(idx, p)| {
            let head = p.head_seq();
            p.remove_where(|e| e.child() == Some((local_id, child_pifo)))
                .map(|_| (idx, head))
        })
    }

    pub(crate) fn peek_entry(&self, pifo: usize) -> Result<&ScheduleEntry<T>> {
        self.check_pifo(pifo)?;
        self.pifos[pifo].peek().ok_or(PifoError::EmptyPifo {
            node: self.id,
            pifo,
        })
    }

    pub(crate) fn announce_state(&self, pifo: usize) -> Announce {
        self.announce.get(pifo).copied().unwrap_or(Announce::Idle)
    }

    pub(crate) fn set_announce_state(&mut self, pifo: usize, state: Announce) {
        if let Some(slot) = self.announce.get_mut(pifo) {
            *slot = state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{EnqueueAction, Stfq};

    #[test]
    fn test_add_pifos_once() {
        let mut n: SchedulingNode<u32> = SchedulingNode::new(3, true);
        assert_eq!(n.add_pifos(0), Err(TopologyError::ZeroPifos(3)));
        n.add_pifos(2).unwrap();
        assert_eq!(n.add_pifos(1), Err(TopologyError::PifosAlreadyAllocated(3)));
        assert_eq!(n.pifo_count(), 2);
    }

    #[test]
    fn test_validate_leaf_defaults() {
        let mut n: SchedulingNode<u32> = SchedulingNode::new(0, true);
        assert_eq!(n.validate(), Err(TopologyError::NoPifos(0)));
        n.add_pifos(1).unwrap();
        n.validate().unwrap();
        assert_eq!(n.state(), NodeState::Configured);

        let meta = n.enqueue_meta(0, EnqueueKind::Arrival, 10, FlowFields::new(), Default::default());
        let d = n.decide_enqueue(&meta).unwrap();
        assert_eq!(
            d.action,
            EnqueueAction::Push {
                pifo: 0,
                rank: 0,
                tx_time: None
            }
        );

        // frozen after validation
        assert!(matches!(
            n.set_enqueue(Box::new(Stfq::default())),
            Err(TopologyError::NotConfigurable { .. })
        ));
    }

    #[test]
    fn test_validate_internal() {
        let mut n: SchedulingNode<u32> = SchedulingNode::new(1, false);
        n.add_pifos(1).unwrap();
        assert_eq!(n.validate(), Err(TopologyError::InternalWithoutChildren(1)));
        n.push_child(7).unwrap();
        assert_eq!(n.validate(), Err(TopologyError::MissingEnqueueLogic(1)));
        n.set_enqueue(Box::new(Fifo::new(0))).unwrap();
        assert_eq!(n.validate(), Err(TopologyError::MissingDequeueLogic(1)));
        n.set_dequeue(Box::new(MinRank)).unwrap();
        n.validate().unwrap();
        n.activate();
        assert_eq!(n.state(), NodeState::Active);
    }

    #[test]
    fn test_edges() {
        let mut n: SchedulingNode<u32> = SchedulingNode::new(1, false);
        assert_eq!(n.push_child(4).unwrap(), 0);
        assert_eq!(n.push_child(9).unwrap(), 1);
        assert_eq!(
            n.push_child(4),
            Err(TopologyError::DuplicateChild {
                parent: 1,
                child: 4
            })
        );
        assert_eq!(n.local_of(9).unwrap(), 1);
        assert_eq!(
            n.local_of(5),
            Err(PifoError::UnknownChild { node: 1, child: 5 })
        );
        assert_eq!(n.child_at(0).unwrap(), 4);
        assert!(n.child_at(2).is_err());

        n.set_parent(0).unwrap();
        assert_eq!(
            n.set_parent(2),
            Err(TopologyError::DuplicateParent {
                child: 1,
                existing: 0
            })
        );
    }

    #[test]
    fn test_push_pop_addressing() {
        let mut n: SchedulingNode<u32> = SchedulingNode::new(2, true);
        n.add_pifos(1).unwrap();
        assert!(matches!(
            n.push(1, ScheduleEntry::item(1, 0, 0, 1)),
            Err(PifoError::InvalidPifo { pifo: 1, count: 1, .. })
        ));
        assert_eq!(n.pop(0, 0), Err(PifoError::EmptyPifo { node: 2, pifo: 0 }));

        n.push(0, ScheduleEntry::item(5, 3, 0, 100)).unwrap();
        let states = n.pifo_states();
        assert_eq!(states[0].len, 1);
        assert_eq!(states[0].bytes, 100);
        assert_eq!(states[0].head_rank, Some(3));
        assert_eq!(n.pop(0, 42).unwrap().as_item(), Some(&5));
        assert_eq!(n.pifo_states()[0].last_pop_time, 42);
        assert_eq!((n.arrivals(), n.served()), (1, 1));
    }

    #[test]
    fn test_remove_announcement() {
        let mut n: SchedulingNode<u32> = SchedulingNode::new(0, false);
        n.add_pifos(2).unwrap();
        n.push(1, ScheduleEntry::announcement(0, 0, 5, 0, 10)).unwrap();
        n.push(1, ScheduleEntry::announcement(1, 0, 2, 0, 10)).unwrap();
        let head = n.head_seq(1);

        assert_eq!(n.remove_announcement(0, 0), Some((1, head)));
        assert_eq!(n.head_seq(1), head);
        assert_eq!(n.remove_announcement(0, 0), None);
        assert_eq!(n.remove_announcement(1, 0), Some((1, head)));
        assert!(n.is_empty());
        assert_eq!(n.served(), 0);
    }
}
