// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the scheduling tree.
//!
//! Drops and empty dequeues are *not* errors: they are reported through
//! [`EnqueueOutcome`](crate::EnqueueOutcome) and `Ok(None)` respectively.
//! Everything in here is either a malformed tree (caught before activation)
//! or an addressing bug that must surface loudly.

use thiserror::Error;

use crate::node::NodeState;
use crate::NodeId;

/// Malformed tree detected while wiring or validating nodes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("node {0} already has pifos allocated")]
    PifosAlreadyAllocated(NodeId),

    #[error("node {node} cannot be reconfigured in state {state:?}")]
    NotConfigurable { node: NodeId, state: NodeState },

    #[error("node {0} cannot own zero pifos")]
    ZeroPifos(NodeId),

    #[error("node {child} already has parent {existing}")]
    DuplicateParent { child: NodeId, existing: NodeId },

    #[error("node {child} is already a child of node {parent}")]
    DuplicateChild { parent: NodeId, child: NodeId },

    #[error("node {0} cannot be its own parent")]
    SelfEdge(NodeId),

    #[error("edge {parent} -> {child} would create a cycle")]
    Cycle { parent: NodeId, child: NodeId },

    #[error("leaf node {0} has children")]
    LeafWithChildren(NodeId),

    #[error("non-leaf node {0} has no children")]
    InternalWithoutChildren(NodeId),

    #[error("node {0} has no pifos")]
    NoPifos(NodeId),

    #[error("non-leaf node {0} has no enqueue logic")]
    MissingEnqueueLogic(NodeId),

    #[error("non-leaf node {0} has no dequeue logic")]
    MissingDequeueLogic(NodeId),

    #[error("tree has no root node")]
    NoRoot,

    #[error("tree has several parentless nodes: {0:?}")]
    MultipleRoots(Vec<NodeId>),

    #[error("node {0} is not reachable from the root")]
    Unreachable(NodeId),
}

/// Failure to instantiate a decision pipeline from a program description.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("unknown {stage} program '{program}'")]
    UnknownProgram { stage: &'static str, program: String },

    #[error("program '{program}': invalid command '{command}': {reason}")]
    InvalidCommand {
        program: String,
        command: String,
        reason: String,
    },

    #[error("program '{program}': missing required command '{command}'")]
    MissingCommand { program: String, command: String },
}

impl PipelineError {
    pub(crate) fn invalid(program: &str, command: &str, reason: impl Into<String>) -> Self {
        PipelineError::InvalidCommand {
            program: program.to_string(),
            command: command.to_string(),
            reason: reason.into(),
        }
    }
}

/// Top-level error returned by tree operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PifoError {
    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("tree is not active")]
    NotActive,

    #[error("tree is already active")]
    AlreadyActive,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("node {node}: pifo {pifo} out of range ({count} pifos)")]
    InvalidPifo {
        node: NodeId,
        pifo: usize,
        count: usize,
    },

    #[error("node {node}: pop from empty pifo {pifo}")]
    EmptyPifo { node: NodeId, pifo: usize },

    #[error("node {node}: unknown child {child}")]
    UnknownChild { node: NodeId, child: NodeId },

    #[error("node {node}: invalid decision: {reason}")]
    InvalidDecision { node: NodeId, reason: String },
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, PifoError>;
