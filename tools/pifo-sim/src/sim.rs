// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discrete-event link simulation.
//!
//! Flows emit packets at constant bit rate into the tree; a single output
//! link pulls from the tree whenever it is free. Time jumps straight to the
//! next arrival, link completion, or tree event.

use std::collections::BTreeMap;

use pifo_tree::pipeline::FlowFields;
use pifo_tree::{DropReason, EnqueueOutcome, PifoError, PifoTree, QueueItem, Timestamp, TreeStats};

use crate::workload::{FlowConfig, Workload};

const NANOS_PER_MS: u64 = 1_000_000;

/// A packet in flight.
#[derive(Debug, Clone)]
pub struct SimPacket {
    pub flow: u32,
    pub len: u32,
    pub created: Timestamp,
    fields: FlowFields,
}

impl QueueItem for SimPacket {
    fn size(&self) -> u32 {
        self.len
    }

    fn flow_fields(&self) -> FlowFields {
        self.fields.clone()
    }
}

/// Per-flow counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowReport {
    pub sent: u64,
    pub enqueued: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub delivered_bytes: u64,
    pub total_delay_ns: u64,
    pub max_delay_ns: u64,
}

impl FlowReport {
    pub fn mean_delay_ns(&self) -> f64 {
        if self.delivered == 0 {
            0.0
        } else {
            self.total_delay_ns as f64 / self.delivered as f64
        }
    }
}

/// Outcome of a run.
#[derive(Debug, Clone)]
pub struct SimReport {
    pub duration_ns: u64,
    pub link_rate_bps: u64,
    pub flows: BTreeMap<u32, FlowReport>,
    pub drops: BTreeMap<&'static str, u64>,
    pub tree: TreeStats,
    pub left_in_queue: usize,
}

impl SimReport {
    /// Delivered throughput of `flow` in bits/s.
    pub fn throughput_bps(&self, flow: u32) -> f64 {
        let Some(report) = self.flows.get(&flow) else {
            return 0.0;
        };
        report.delivered_bytes as f64 * 8.0 * 1e9 / self.duration_ns.max(1) as f64
    }
}

struct Source {
    config: FlowConfig,
    fields: FlowFields,
    next: Timestamp,
    stop: Timestamp,
}

impl Source {
    fn new(config: &FlowConfig, end: Timestamp) -> Self {
        let mut fields = FlowFields::new().with("flow", u64::from(config.id));
        for (name, value) in &config.fields {
            fields.insert(name.clone(), *value);
        }
        let stop = config
            .stop_ms
            .map_or(end, |ms| ms.saturating_mul(NANOS_PER_MS).min(end));
        Self {
            next: config.start_ms.saturating_mul(NANOS_PER_MS),
            stop,
            fields,
            config: config.clone(),
        }
    }

    fn pending(&self) -> Option<Timestamp> {
        (self.next < self.stop).then_some(self.next)
    }

    fn emit(&mut self) -> SimPacket {
        let pkt = SimPacket {
            flow: self.config.id,
            len: self.config.pkt_size,
            created: self.next,
            fields: self.fields.clone(),
        };
        self.next = self.next.saturating_add(self.config.interval_ns());
        pkt
    }
}

/// Tree plus output link driven by a workload.
pub struct Simulation {
    tree: PifoTree<SimPacket>,
    sources: Vec<Source>,
    link_rate_bps: u64,
    link_free_at: Timestamp,
    end: Timestamp,
    flows: BTreeMap<u32, FlowReport>,
}

impl Simulation {
    pub fn new(tree: PifoTree<SimPacket>, workload: &Workload, link_rate_bps: u64) -> Self {
        let end = workload.duration_ms.saturating_mul(NANOS_PER_MS);
        let mut sources: Vec<Source> = workload.flows.iter().map(|f| Source::new(f, end)).collect();
        sources.sort_by_key(|s| s.config.id);
        let flows = sources
            .iter()
            .map(|s| (s.config.id, FlowReport::default()))
            .collect();
        Self {
            tree,
            sources,
            link_rate_bps: link_rate_bps.max(1),
            link_free_at: 0,
            end,
            flows,
        }
    }

    fn tx_ns(&self, len: u32) -> u64 {
        let ns = u128::from(len) * 8 * 1_000_000_000 / u128::from(self.link_rate_bps);
        u64::try_from(ns).unwrap_or(u64::MAX)
    }

    fn next_arrival(&self) -> Option<Timestamp> {
        self.sources.iter().filter_map(Source::pending).min()
    }

    /// Run to the end of the workload.
    pub fn run(mut self) -> Result<SimReport, PifoError> {
        loop {
            let now = self.tree.now();

            if now >= self.link_free_at {
                if let Some(pkt) = self.tree.dequeue()? {
                    self.deliver(now, &pkt);
                    self.link_free_at = now + self.tx_ns(pkt.len);
                    continue;
                }
            }

            let arrival = self.next_arrival();
            let link = (!self.tree.is_empty() && self.link_free_at > now).then_some(self.link_free_at);
            let tree_event = if self.tree.is_empty() {
                None
            } else {
                self.tree.next_ready_time()
            };
            let Some(next) = [arrival, link, tree_event].into_iter().flatten().min() else {
                break;
            };
            if next >= self.end {
                break;
            }

            self.tree.advance_to(next)?;
            if arrival == Some(next) {
                self.arrivals(next)?;
            }
        }

        self.tree.advance_to(self.end)?;
        let stats = self.tree.stats().clone();
        let drops = [
            DropReason::IngressDrop,
            DropReason::NodeDrop,
            DropReason::QueueLimitExceeded,
        ]
        .into_iter()
        .map(|r| (r.as_str(), stats.drops_for(r)))
        .collect();

        Ok(SimReport {
            duration_ns: self.end,
            link_rate_bps: self.link_rate_bps,
            flows: self.flows,
            drops,
            left_in_queue: self.tree.len(),
            tree: stats,
        })
    }

    fn arrivals(&mut self, now: Timestamp) -> Result<(), PifoError> {
        for i in 0..self.sources.len() {
            while self.sources[i].pending() == Some(now) {
                let pkt = self.sources[i].emit();
                let flow = pkt.flow;
                let outcome = self.tree.enqueue(pkt)?;
                let report = self.flows.entry(flow).or_default();
                report.sent += 1;
                match outcome {
                    EnqueueOutcome::Enqueued => report.enqueued += 1,
                    EnqueueOutcome::Dropped(reason) => {
                        report.dropped += 1;
                        tracing::trace!("t={} flow {} dropped: {}", now, flow, reason);
                    }
                }
            }
        }
        Ok(())
    }

    fn deliver(&mut self, now: Timestamp, pkt: &SimPacket) {
        let delay = now.saturating_sub(pkt.created);
        let report = self.flows.entry(pkt.flow).or_default();
        report.delivered += 1;
        report.delivered_bytes += u64::from(pkt.len);
        report.total_delay_ns += delay;
        report.max_delay_ns = report.max_delay_ns.max(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pifo_tree::{PipelineRegistry, TreeConfig};

    fn run(config: &TreeConfig, workload: &Workload) -> SimReport {
        let tree = config.build(&PipelineRegistry::builtin()).expect("tree");
        let rate = workload
            .link
            .rate_bps
            .unwrap_or(config.monitor.link_bandwidth_bps);
        Simulation::new(tree, workload, rate).run().expect("run")
    }

    #[test]
    fn test_underloaded_link_delivers_everything() {
        let mut workload = Workload::example();
        for flow in &mut workload.flows {
            flow.rate_bps = 1_000_000;
        }
        let report = run(&TreeConfig::example(), &workload);
        for flow in report.flows.values() {
            assert_eq!(flow.dropped, 0);
            assert!(flow.delivered + 1 >= flow.sent);
            // one packet per 8 ms, 0.8 ms on the wire
            assert!(flow.max_delay_ns <= 3 * 800_000);
        }
        assert_eq!(report.drops.values().sum::<u64>(), 0);
    }

    #[test]
    fn test_priority_class_keeps_its_share() {
        let report = run(&TreeConfig::example(), &Workload::example());
        // class 0 asks for 2 Mbps and is served first
        let prio = report.throughput_bps(1);
        assert!(prio > 1_800_000.0, "priority flow got {}", prio);
        // the two class-1 flows split the rest evenly
        let (a, b) = (report.throughput_bps(2), report.throughput_bps(3));
        assert!((a - b).abs() < 0.1 * a.max(b), "{} vs {}", a, b);
        assert!(a + b + prio <= 10_000_000.0 * 1.01);
    }
}
