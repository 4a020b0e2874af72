// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Built-in ingress programs.

use super::{IngressDecision, IngressMeta, IngressPipeline, ProgramSource};
use crate::error::PipelineError;
use crate::telemetry::Telemetry;

/// Admits every packet.
#[derive(Debug, Clone, Default)]
pub struct AcceptAll;

impl AcceptAll {
    pub fn from_program(src: &ProgramSource) -> Result<Self, PipelineError> {
        if let Some(cmd) = src.parsed()?.first() {
            return Err(cmd.unknown());
        }
        Ok(Self)
    }
}

impl IngressPipeline for AcceptAll {
    fn decide(&mut self, _meta: &IngressMeta) -> IngressDecision {
        IngressDecision::accept()
    }

    fn name(&self) -> &str {
        "accept-all"
    }
}

/// Drops arrivals while the quantized average occupancy (and optionally the
/// quantized latency) is at or above a threshold.
///
/// Commands: `max_avg <code>`, `max_latency <code>`.
#[derive(Debug, Clone)]
pub struct AvgThreshold {
    max_avg: u32,
    max_latency: Option<u32>,
}

impl AvgThreshold {
    pub fn new(max_avg: u32) -> Self {
        Self {
            max_avg,
            max_latency: None,
        }
    }

    pub fn with_max_latency(mut self, code: u32) -> Self {
        self.max_latency = Some(code);
        self
    }

    pub fn from_program(src: &ProgramSource) -> Result<Self, PipelineError> {
        let mut max_avg = None;
        let mut max_latency = None;
        for cmd in src.parsed()? {
            match cmd.name.as_str() {
                "max_avg" => {
                    cmd.expect_args(1)?;
                    max_avg = Some(code_arg(&cmd)?);
                }
                "max_latency" => {
                    cmd.expect_args(1)?;
                    max_latency = Some(code_arg(&cmd)?);
                }
                _ => return Err(cmd.unknown()),
            }
        }
        let max_avg = max_avg.ok_or_else(|| PipelineError::MissingCommand {
            program: src.program.clone(),
            command: "max_avg".into(),
        })?;
        Ok(Self {
            max_avg,
            max_latency,
        })
    }
}

fn code_arg(cmd: &super::Command) -> Result<u32, PipelineError> {
    let v = cmd.u64_arg(0)?;
    u32::try_from(v).map_err(|_| cmd.invalid("code does not fit in 32 bits"))
}

impl IngressPipeline for AvgThreshold {
    fn decide(&mut self, meta: &IngressMeta) -> IngressDecision {
        let t = &meta.telemetry;
        let over_latency = self.max_latency.is_some_and(|max| t.latency >= max);
        let decision = if t.avg_qsize >= self.max_avg || over_latency {
            IngressDecision::drop()
        } else {
            IngressDecision::accept()
        };
        decision.with_telemetry(
            Telemetry::new()
                .with("avg_qsize", u64::from(t.avg_qsize))
                .with("latency", u64::from(t.latency))
                .with("dq_rate", u64::from(t.dq_rate)),
        )
    }

    fn name(&self) -> &str {
        "avg-threshold"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::QueueTelemetry;

    fn meta(avg: u32, latency: u32) -> IngressMeta {
        IngressMeta {
            telemetry: QueueTelemetry {
                avg_qsize: avg,
                latency,
                dq_rate: 0,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_avg_threshold() {
        let mut p = AvgThreshold::new(100);
        assert!(!p.decide(&meta(99, 0)).drop);
        let d = p.decide(&meta(100, 0));
        assert!(d.drop);
        assert_eq!(d.telemetry.get("avg_qsize"), Some(100));
    }

    #[test]
    fn test_avg_threshold_latency() {
        let mut p = AvgThreshold::new(100).with_max_latency(10);
        assert!(p.decide(&meta(0, 10)).drop);
        assert!(!p.decide(&meta(0, 9)).drop);
    }

    #[test]
    fn test_from_program() {
        let src = ProgramSource::new("avg-threshold")
            .command("max_avg 12")
            .command("max_latency 3");
        let mut p = AvgThreshold::from_program(&src).unwrap();
        assert!(p.decide(&meta(0, 3)).drop);

        assert!(AvgThreshold::from_program(&ProgramSource::new("avg-threshold")).is_err());
        let bad = ProgramSource::new("avg-threshold").command("max_avg x");
        assert!(AvgThreshold::from_program(&bad).is_err());
        let extra = ProgramSource::new("accept-all").command("max_avg 1");
        assert!(AcceptAll::from_program(&extra).is_err());
    }
}
