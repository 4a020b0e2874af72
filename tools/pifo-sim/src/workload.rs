// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Workload description: constant-bit-rate flows feeding the tree.
//!
//! ```toml
//! duration_ms = 1000
//!
//! [link]
//! rate_bps = 10000000
//!
//! [[flows]]
//! id = 1
//! rate_bps = 2000000
//! pkt_size = 1000
//! fields = { class = 0 }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Workload loading errors.
#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid workload: {0}")]
    Invalid(String),
}

/// Output link override.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Link rate in bits/s; defaults to the tree's monitor bandwidth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_bps: Option<u64>,
}

/// One constant-bit-rate flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowConfig {
    pub id: u32,
    pub rate_bps: u64,

    #[serde(default = "default_pkt_size")]
    pub pkt_size: u32,

    #[serde(default)]
    pub start_ms: u64,

    /// Last instant (exclusive) at which the flow sends; runs to the end
    /// when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_ms: Option<u64>,

    /// Extra fields exposed to the pipelines. `flow` is always set to `id`.
    #[serde(default)]
    pub fields: BTreeMap<String, u64>,
}

fn default_pkt_size() -> u32 {
    1000
}

fn default_duration_ms() -> u64 {
    1000
}

impl FlowConfig {
    /// Time between two packets, in nanoseconds.
    pub fn interval_ns(&self) -> u64 {
        let ns = u128::from(self.pkt_size) * 8 * 1_000_000_000 / u128::from(self.rate_bps.max(1));
        u64::try_from(ns).unwrap_or(u64::MAX).max(1)
    }
}

/// Whole workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,

    #[serde(default)]
    pub link: LinkConfig,

    #[serde(default)]
    pub flows: Vec<FlowConfig>,
}

impl Workload {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, WorkloadError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, WorkloadError> {
        let workload: Self = toml::from_str(content)?;
        workload.validate()?;
        Ok(workload)
    }

    pub fn to_toml_string(&self) -> Result<String, WorkloadError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Matches the example tree: one class-0 flow and two competing class-1
    /// flows, oversubscribing a 10 Mbps link.
    pub fn example() -> Self {
        let flow = |id, rate_bps, class| FlowConfig {
            id,
            rate_bps,
            pkt_size: 1000,
            start_ms: 0,
            stop_ms: None,
            fields: BTreeMap::from([("class".to_string(), class)]),
        };
        Self {
            duration_ms: 1000,
            link: LinkConfig {
                rate_bps: Some(10_000_000),
            },
            flows: vec![
                flow(1, 2_000_000, 0),
                flow(2, 6_000_000, 1),
                flow(3, 6_000_000, 1),
            ],
        }
    }

    pub fn validate(&self) -> Result<(), WorkloadError> {
        if self.duration_ms == 0 {
            return Err(WorkloadError::Invalid("duration_ms must be > 0".into()));
        }
        if self.link.rate_bps == Some(0) {
            return Err(WorkloadError::Invalid("link rate_bps must be > 0".into()));
        }
        let mut ids = HashSet::new();
        for flow in &self.flows {
            if !ids.insert(flow.id) {
                return Err(WorkloadError::Invalid(format!("Duplicate flow id {}", flow.id)));
            }
            if flow.rate_bps == 0 {
                return Err(WorkloadError::Invalid(format!("Flow {} has rate 0", flow.id)));
            }
            if flow.pkt_size == 0 {
                return Err(WorkloadError::Invalid(format!(
                    "Flow {} has packet size 0",
                    flow.id
                )));
            }
            if flow.stop_ms.is_some_and(|stop| stop <= flow.start_ms) {
                return Err(WorkloadError::Invalid(format!(
                    "Flow {} stops before it starts",
                    flow.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_roundtrip() {
        let workload = Workload::example();
        let text = workload.to_toml_string().expect("serialize");
        assert_eq!(Workload::from_toml_str(&text).expect("parse"), workload);
    }

    #[test]
    fn test_defaults_and_validation() {
        let w = Workload::from_toml_str(
            r#"
            [[flows]]
            id = 7
            rate_bps = 8000000
            "#,
        )
        .expect("parse");
        assert_eq!(w.duration_ms, 1000);
        assert_eq!(w.flows[0].pkt_size, 1000);
        assert_eq!(w.flows[0].interval_ns(), 1_000_000);

        let dup = r#"
            [[flows]]
            id = 1
            rate_bps = 1
            [[flows]]
            id = 1
            rate_bps = 1
        "#;
        assert!(matches!(
            Workload::from_toml_str(dup),
            Err(WorkloadError::Invalid(_))
        ));

        let backwards = r#"
            [[flows]]
            id = 1
            rate_bps = 1
            start_ms = 10
            stop_ms = 5
        "#;
        assert!(Workload::from_toml_str(backwards).is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("flows.toml");
        std::fs::write(&path, Workload::example().to_toml_string().expect("toml")).expect("write");
        assert_eq!(Workload::from_file(&path).expect("load").flows.len(), 3);
    }
}
