// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! File-based tree configuration.
//!
//! ```toml
//! [queue]
//! max_size = "1000p"
//!
//! [monitor]
//! q_size_bits = 16
//! link_bandwidth_bps = 10000000
//!
//! [ingress]
//! program = "avg-threshold"
//! commands = ["max_avg 40000"]
//!
//! [[nodes]]
//! id = 0
//! enqueue = { program = "classify", commands = ["match class", "route 0 1", "route 1 2"] }
//! dequeue = { program = "min-rank" }
//!
//! [[nodes]]
//! id = 1
//! leaf = true
//! parent = 0
//! ```
//!
//! Node ids are global tree ids: they must be `0..n` in declaration order,
//! and children are attached in declaration order.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::PifoError;
use crate::limits::QueueSize;
use crate::monitor::MonitorParams;
use crate::pipeline::{PipelineRegistry, ProgramSource, QueueItem};
use crate::tree::PifoTree;
use crate::NodeId;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Tree construction failed: {0}")]
    Tree(#[from] PifoError),
}

/// Root queue capacity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub max_size: QueueSize,
}

/// One tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: NodeId,

    #[serde(default)]
    pub leaf: bool,

    #[serde(default = "default_pifos")]
    pub pifos: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<NodeId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enqueue: Option<ProgramSource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dequeue: Option<ProgramSource>,
}

fn default_pifos() -> usize {
    1
}

impl NodeConfig {
    pub fn leaf(id: NodeId, parent: Option<NodeId>) -> Self {
        Self {
            id,
            leaf: true,
            pifos: 1,
            parent,
            enqueue: None,
            dequeue: None,
        }
    }

    pub fn internal(
        id: NodeId,
        parent: Option<NodeId>,
        enqueue: ProgramSource,
        dequeue: ProgramSource,
    ) -> Self {
        Self {
            id,
            leaf: false,
            pifos: 1,
            parent,
            enqueue: Some(enqueue),
            dequeue: Some(dequeue),
        }
    }

    pub fn with_enqueue(mut self, src: ProgramSource) -> Self {
        self.enqueue = Some(src);
        self
    }

    pub fn with_dequeue(mut self, src: ProgramSource) -> Self {
        self.dequeue = Some(src);
        self
    }

    pub fn with_pifos(mut self, n: usize) -> Self {
        self.pifos = n;
        self
    }
}

/// Whole-tree configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeConfig {
    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub monitor: MonitorParams,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<ProgramSource>,

    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

impl TreeConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Two traffic classes under a classifier: class 0 FIFO, class 1
    /// fair-queued by flow.
    pub fn example() -> Self {
        Self {
            queue: QueueConfig {
                max_size: QueueSize::Packets(1000),
            },
            monitor: MonitorParams {
                link_bandwidth_bps: 10_000_000,
                mean_pkt_size: 1000,
                ..MonitorParams::default()
            },
            ingress: Some(ProgramSource::new("avg-threshold").command("max_avg 52428")),
            nodes: vec![
                NodeConfig::internal(
                    0,
                    None,
                    ProgramSource::new("classify")
                        .command("match class")
                        .command("route 0 1")
                        .command("route 1 2")
                        .command("rank child-priority"),
                    ProgramSource::new("min-rank"),
                ),
                NodeConfig::leaf(1, Some(0)),
                NodeConfig::leaf(2, Some(0)).with_enqueue(ProgramSource::new("stfq")),
            ],
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.monitor.validate().map_err(ConfigError::Invalid)?;
        if self.queue.max_size.value() == 0 {
            return Err(ConfigError::Invalid("Queue max_size must be > 0".into()));
        }
        if self.nodes.is_empty() {
            return Err(ConfigError::Invalid("No nodes configured".into()));
        }

        let ids: HashSet<NodeId> = self.nodes.iter().map(|n| n.id).collect();
        let mut roots = 0;
        for (i, node) in self.nodes.iter().enumerate() {
            if node.id as usize != i {
                return Err(ConfigError::Invalid(format!(
                    "Node #{} has id {}; ids must be 0..n in declaration order",
                    i, node.id
                )));
            }
            if node.pifos == 0 {
                return Err(ConfigError::Invalid(format!("Node {} has no pifos", node.id)));
            }
            match node.parent {
                None => roots += 1,
                Some(p) if p == node.id => {
                    return Err(ConfigError::Invalid(format!(
                        "Node {} is its own parent",
                        node.id
                    )));
                }
                Some(p) if !ids.contains(&p) => {
                    return Err(ConfigError::Invalid(format!(
                        "Node {} has unknown parent {}",
                        node.id, p
                    )));
                }
                Some(_) => {}
            }
            if !node.leaf && (node.enqueue.is_none() || node.dequeue.is_none()) {
                return Err(ConfigError::Invalid(format!(
                    "Non-leaf node {} needs both enqueue and dequeue programs",
                    node.id
                )));
            }
        }
        if roots != 1 {
            return Err(ConfigError::Invalid(format!(
                "Expected exactly one root node, found {}",
                roots
            )));
        }
        Ok(())
    }

    /// Build and activate the tree.
    pub fn build<T: QueueItem>(&self, registry: &PipelineRegistry) -> Result<PifoTree<T>, ConfigError> {
        self.validate()?;
        let mut tree = PifoTree::new(self.queue.max_size, self.monitor.clone())?;

        for node in &self.nodes {
            let id = tree.add_node(node.leaf)?;
            tree.add_pifos(id, node.pifos)?;
            if let Some(src) = &node.enqueue {
                tree.set_enqueue_logic(id, src, registry)?;
            }
            if let Some(src) = &node.dequeue {
                tree.set_dequeue_logic(id, src, registry)?;
            }
        }
        for node in &self.nodes {
            if let Some(parent) = node.parent {
                tree.add_child(parent, node.id)?;
            }
        }
        if let Some(src) = &self.ingress {
            tree.set_ingress_logic(src, registry)?;
        }

        tree.activate()?;
        log::debug!("[pifo-tree] built tree from config: {} nodes", self.nodes.len());
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::FlowFields;

    struct Pkt(u64);

    impl QueueItem for Pkt {
        fn size(&self) -> u32 {
            1000
        }

        fn flow_fields(&self) -> FlowFields {
            FlowFields::new().with("class", self.0).with("flow", self.0)
        }
    }

    #[test]
    fn test_example_roundtrip() {
        let config = TreeConfig::example();
        let text = config.to_toml_string().expect("serialize");
        assert!(text.contains("max_size = \"1000p\""));
        let parsed = TreeConfig::from_toml_str(&text).expect("parse");
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_example_builds() {
        let mut tree: PifoTree<Pkt> = TreeConfig::example()
            .build(&PipelineRegistry::builtin())
            .expect("build");
        assert!(tree.is_active());
        assert!(tree.enqueue(Pkt(1)).unwrap().is_enqueued());
        assert!(tree.enqueue(Pkt(0)).unwrap().is_enqueued());
        // child-priority: class 0 (child #0) first
        assert_eq!(tree.dequeue().unwrap().map(|p| p.0), Some(0));
        assert_eq!(tree.dequeue().unwrap().map(|p| p.0), Some(1));
    }

    #[test]
    fn test_validation() {
        let mut config = TreeConfig::default();
        assert!(config.validate().is_err()); // No nodes

        config.nodes.push(NodeConfig::leaf(0, None));
        assert!(config.validate().is_ok());

        config.nodes.push(NodeConfig::leaf(2, Some(0)));
        assert!(config.validate().is_err()); // id gap

        config.nodes[1].id = 1;
        config.nodes[1].parent = Some(7);
        assert!(config.validate().is_err()); // unknown parent

        config.nodes[1].parent = None;
        assert!(config.validate().is_err()); // two roots

        config.nodes[1].parent = Some(0);
        assert!(config.validate().is_ok());
        // leaf 0 with a child: caught when the tree is built
        let err = config.build::<Pkt>(&PipelineRegistry::builtin()).unwrap_err();
        assert!(matches!(err, ConfigError::Tree(_)));
    }

    #[test]
    fn test_unknown_program() {
        let text = r#"
            [[nodes]]
            id = 0
            leaf = true
            enqueue = { program = "wfq2" }
        "#;
        let config = TreeConfig::from_toml_str(text).expect("parse");
        let err = config.build::<Pkt>(&PipelineRegistry::builtin()).unwrap_err();
        assert!(err.to_string().contains("wfq2"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tree.toml");
        std::fs::write(
            &path,
            r#"
            [queue]
            max_size = "3000B"

            [monitor]
            q_size_bits = 8

            [[nodes]]
            id = 0
            leaf = true
            pifos = 2
            enqueue = { program = "strict-priority", commands = ["field class"] }
            dequeue = { program = "strict" }
            "#,
        )
        .expect("write");

        let config = TreeConfig::from_file(&path).expect("load");
        assert_eq!(config.queue.max_size, QueueSize::Bytes(3000));
        assert_eq!(config.monitor.q_size_bits, 8);
        let mut tree: PifoTree<Pkt> = config.build(&PipelineRegistry::builtin()).expect("build");
        for class in [1, 0, 1] {
            assert!(tree.enqueue(Pkt(class)).unwrap().is_enqueued());
        }
        // third packet would exceed 3000 bytes
        assert!(!tree.enqueue(Pkt(0)).unwrap().is_enqueued());
        assert_eq!(tree.dequeue().unwrap().map(|p| p.0), Some(0));

        assert!(matches!(
            TreeConfig::from_file(dir.path().join("missing.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
