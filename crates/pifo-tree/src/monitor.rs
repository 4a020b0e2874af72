// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Adaptive queue monitor.
//!
//! Keeps a RED-style exponentially weighted average of the root occupancy and
//! a PIE-style dequeue-rate estimate, and quantizes both (plus the derived
//! latency) for the decision pipelines.
//!
//! # Idle decay
//!
//! With no arrivals the average would freeze at its last value. While the
//! tree is idle, every mean-sized packet the link could have sent counts as
//! one synthetic empty sample. Packet times are counted from the start of the
//! idle period and each is applied once, so the average at a given instant
//! does not depend on how often the idle timer fires:
//!
//! ```text
//! ptc     = link_bandwidth_bps / (8 * mean_pkt_size)
//! m_total = floor((now - idle_since) * ptc / 1e9)
//! m       = m_total - m_applied
//!
//! tick:    q_avg = (1 - q_w)^m * q_avg
//! arrival: q_avg = (1 - q_w)^(m + 1) * q_avg + q_w * n_queued
//! ```

use serde::{Deserialize, Serialize};

use crate::telemetry::QueueTelemetry;
use crate::timeline::EventId;
use crate::Timestamp;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Tuning of the monitor. Immutable once the tree is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorParams {
    /// Width of the quantized telemetry codes (1..=32).
    pub q_size_bits: u32,
    /// Mean packet size in bytes, used to count idle packet times.
    pub mean_pkt_size: u32,
    /// Output link rate in bits/s.
    pub link_bandwidth_bps: u64,
    /// Output link propagation delay in ns.
    pub link_delay_ns: u64,
    /// EWMA weight of a new sample (0, 1].
    pub q_weight: f64,
    /// Backlog (bytes) that starts a dequeue-rate measurement cycle.
    pub dq_threshold: u64,
    /// Idle timer period in ns.
    pub time_reference_ns: u64,
}

impl Default for MonitorParams {
    fn default() -> Self {
        Self {
            q_size_bits: 16,
            mean_pkt_size: 500,
            link_bandwidth_bps: 1_500_000,
            link_delay_ns: 20_000_000,
            q_weight: 0.002,
            dq_threshold: 10_000,
            time_reference_ns: 10_000_000,
        }
    }
}

impl MonitorParams {
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=32).contains(&self.q_size_bits) {
            return Err(format!("q_size_bits must be in 1..=32, got {}", self.q_size_bits));
        }
        if self.mean_pkt_size == 0 {
            return Err("mean_pkt_size must be > 0".into());
        }
        if self.link_bandwidth_bps == 0 {
            return Err("link_bandwidth_bps must be > 0".into());
        }
        if !(self.q_weight > 0.0 && self.q_weight <= 1.0) {
            return Err(format!("q_weight must be in (0, 1], got {}", self.q_weight));
        }
        if self.dq_threshold == 0 {
            return Err("dq_threshold must be > 0".into());
        }
        if self.time_reference_ns == 0 {
            return Err("time_reference_ns must be > 0".into());
        }
        Ok(())
    }

    /// Mean-sized packets the link sends per second.
    pub fn packet_time_constant(&self) -> f64 {
        self.link_bandwidth_bps as f64 / (8.0 * f64::from(self.mean_pkt_size.max(1)))
    }
}

/// Averaging rule shared by arrivals and idle ticks.
///
/// `m = 0` is a plain EWMA step; `m > 0` additionally decays over `m` empty
/// samples.
pub fn estimator(n_queued: f64, m: u64, q_avg: f64, q_w: f64) -> f64 {
    (1.0 - q_w).powf(m as f64 + 1.0) * q_avg + q_w * n_queued
}

/// Rescale `value` from `[0, max]` to `[0, 2^bits - 1]`, clamping.
pub fn map_size(value: f64, max: f64, bits: u32) -> u32 {
    let top = (1u64 << bits.clamp(1, 32)) - 1;
    if max <= 0.0 || value.is_nan() || value <= 0.0 {
        return 0;
    }
    let ratio = (value / max).min(1.0);
    let code = (ratio * top as f64).floor() as u64;
    u32::try_from(code.min(top)).unwrap_or(u32::MAX)
}

/// Average an arrival would produce, computed but not yet applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArrivalSample {
    n_queued: u64,
    packet_times: u64,
    q_avg: f64,
}

impl ArrivalSample {
    /// The average once the sample is committed.
    pub fn q_avg(&self) -> f64 {
        self.q_avg
    }

    /// Idle packet times folded in with the sample.
    pub fn packet_times(&self) -> u64 {
        self.packet_times
    }
}

/// Point-in-time view of the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MonitorSnapshot {
    /// Average occupancy in the unit of the queue limit.
    pub avg_qsize: f64,
    /// Dequeue rate in bytes/s, 0 until the first measurement completes.
    pub dq_rate: f64,
    /// Latency estimate in ns.
    pub latency_ns: f64,
    pub idle: bool,
    pub in_measurement: bool,
}

/// Root-scoped occupancy and rate estimator.
#[derive(Debug, Clone)]
pub struct AdaptiveQueueMonitor {
    params: MonitorParams,
    ptc: f64,
    /// Queue limit, in its own unit.
    max_size: f64,
    /// Queue limit expressed in bytes.
    max_bytes: f64,

    q_avg: f64,
    idle: bool,
    idle_since: Timestamp,
    /// Idle packet times already folded into `q_avg`.
    idle_applied: u64,
    timer: Option<EventId>,

    in_measurement: bool,
    dq_start: Timestamp,
    dq_count: u64,
    avg_dq_rate: f64,
    latency_ns: f64,
}

impl AdaptiveQueueMonitor {
    /// `max_size` is the queue limit in its unit; `max_bytes` the same limit in bytes.
    pub fn new(params: MonitorParams, max_size: u64, max_bytes: u64) -> Self {
        Self {
            ptc: params.packet_time_constant(),
            params,
            max_size: max_size as f64,
            max_bytes: max_bytes as f64,
            q_avg: 0.0,
            idle: true,
            idle_since: 0,
            idle_applied: 0,
            timer: None,
            in_measurement: false,
            dq_start: 0,
            dq_count: 0,
            avg_dq_rate: 0.0,
            latency_ns: 0.0,
        }
    }

    pub fn params(&self) -> &MonitorParams {
        &self.params
    }

    pub fn avg_qsize(&self) -> f64 {
        self.q_avg
    }

    pub fn is_idle(&self) -> bool {
        self.idle
    }

    /// Start of the current idle period.
    pub fn idle_since(&self) -> Timestamp {
        self.idle_since
    }

    /// Idle packet times elapsed by `now` since the idle period began.
    fn idle_packet_times(&self, now: Timestamp) -> u64 {
        let elapsed = now.saturating_sub(self.idle_since);
        (elapsed as f64 * self.ptc / NANOS_PER_SEC).floor() as u64
    }

    /// Idle packet times not yet folded into the average.
    fn pending_packet_times(&self, now: Timestamp) -> u64 {
        if self.idle {
            self.idle_packet_times(now).saturating_sub(self.idle_applied)
        } else {
            0
        }
    }

    /// Compute the average after an arrival seeing `n_queued`, without
    /// applying it.
    pub fn sample_arrival(&self, now: Timestamp, n_queued: u64) -> ArrivalSample {
        let m = self.pending_packet_times(now);
        ArrivalSample {
            n_queued,
            packet_times: m,
            q_avg: estimator(n_queued as f64, m, self.q_avg, self.params.q_weight),
        }
    }

    /// Apply a sample taken by [`sample_arrival`](Self::sample_arrival).
    pub fn commit_arrival(&mut self, sample: ArrivalSample) {
        self.q_avg = sample.q_avg;
        if self.idle {
            self.idle_applied += sample.packet_times;
        }
        log::trace!(
            "[monitor] arrival n={} m={} q_avg={:.4}",
            sample.n_queued,
            sample.packet_times,
            self.q_avg
        );
    }

    /// Fold an arrival into the average. `n_queued` is the occupancy before it.
    pub fn on_arrival(&mut self, now: Timestamp, n_queued: u64) {
        let sample = self.sample_arrival(now, n_queued);
        self.commit_arrival(sample);
    }

    /// Leave idle after an accepted arrival; returns the idle timer to cancel.
    pub fn on_busy(&mut self) -> Option<EventId> {
        self.idle = false;
        self.take_timer()
    }

    /// Forget the pending idle timer, handing it back for cancellation.
    pub fn take_timer(&mut self) -> Option<EventId> {
        self.timer.take()
    }

    /// Account a departure of `pkt_len` bytes leaving `backlog` bytes behind.
    pub fn on_departure(&mut self, now: Timestamp, pkt_len: u32, backlog: u64) {
        let threshold = self.params.dq_threshold;
        if !self.in_measurement && backlog >= threshold {
            self.in_measurement = true;
            self.dq_start = now;
            self.dq_count = 0;
        }

        if self.in_measurement {
            self.dq_count += u64::from(pkt_len);
            let elapsed = now.saturating_sub(self.dq_start);
            if self.dq_count >= threshold && elapsed > 0 {
                let rate = self.dq_count as f64 * NANOS_PER_SEC / elapsed as f64;
                self.avg_dq_rate = if self.avg_dq_rate == 0.0 {
                    rate
                } else {
                    0.5 * self.avg_dq_rate + 0.5 * rate
                };
                log::trace!("[monitor] dq cycle done: rate={:.0} B/s", self.avg_dq_rate);

                self.dq_count = 0;
                self.dq_start = now;
                self.in_measurement = backlog >= threshold;
            }
        }

        self.latency_ns = if self.avg_dq_rate > 0.0 {
            backlog as f64 * NANOS_PER_SEC / self.avg_dq_rate
        } else {
            0.0
        };
    }

    /// Enter idle after the tree drained.
    pub fn on_empty(&mut self, now: Timestamp) {
        self.idle = true;
        self.idle_since = now;
        self.idle_applied = 0;
        self.latency_ns = 0.0;
        log::trace!("[monitor] idle at t={}", now);
    }

    /// Remember the pending idle timer.
    pub fn arm(&mut self, timer: EventId) {
        self.timer = Some(timer);
    }

    /// Apply the idle packet times elapsed since the last sample.
    /// Returns `false` when the tree is not idle.
    pub fn on_idle_tick(&mut self, now: Timestamp) -> bool {
        self.timer = None;
        if !self.idle {
            return false;
        }
        let m = self.pending_packet_times(now);
        if m > 0 {
            self.q_avg *= (1.0 - self.params.q_weight).powf(m as f64);
            self.idle_applied += m;
        }
        log::trace!("[monitor] idle tick t={} m={} q_avg={:.4}", now, m, self.q_avg);
        true
    }

    /// Quantized view for pipelines.
    ///
    /// Occupancy is scaled against the queue limit, latency against the time
    /// to drain a full queue at link rate, rate against the link rate.
    pub fn telemetry(&self) -> QueueTelemetry {
        self.quantize(self.q_avg)
    }

    /// [`telemetry`](Self::telemetry) as it will read once `sample` is committed.
    pub fn telemetry_with(&self, sample: &ArrivalSample) -> QueueTelemetry {
        self.quantize(sample.q_avg)
    }

    fn quantize(&self, q_avg: f64) -> QueueTelemetry {
        let bits = self.params.q_size_bits;
        let link_bytes_per_sec = self.params.link_bandwidth_bps as f64 / 8.0;
        let max_latency = self.max_bytes * NANOS_PER_SEC / link_bytes_per_sec;
        QueueTelemetry {
            avg_qsize: map_size(q_avg, self.max_size, bits),
            latency: map_size(self.latency_ns, max_latency, bits),
            dq_rate: map_size(self.avg_dq_rate, link_bytes_per_sec, bits),
        }
    }

    /// Quantize occupancy against the queue limit.
    pub fn quantize_size(&self, size: u64) -> u32 {
        map_size(size as f64, self.max_size, self.params.q_size_bits)
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            avg_qsize: self.q_avg,
            dq_rate: self.avg_dq_rate,
            latency_ns: self.latency_ns,
            idle: self.idle,
            in_measurement: self.in_measurement,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_estimator_plain_ewma() {
        let q = estimator(10.0, 0, 4.0, 0.25);
        assert!(close(q, 0.75 * 4.0 + 0.25 * 10.0));
    }

    #[test]
    fn test_estimator_decay() {
        let mut q = 100.0;
        for _ in 0..5 {
            q = estimator(0.0, 0, q, 0.1);
        }
        assert!(close(q, estimator(0.0, 4, 100.0, 0.1)));
        assert!(close(q, 100.0 * 0.9f64.powi(5)));
    }

    #[test]
    fn test_map_size_bounds() {
        assert_eq!(map_size(0.0, 1000.0, 8), 0);
        assert_eq!(map_size(1000.0, 1000.0, 8), 255);
        assert_eq!(map_size(5000.0, 1000.0, 8), 255);
        assert_eq!(map_size(-3.0, 1000.0, 8), 0);
        assert_eq!(map_size(10.0, 0.0, 8), 0);
        assert_eq!(map_size(1.0, 1.0, 32), u32::MAX);

        let mut prev = 0;
        for v in 0..=2000 {
            let code = map_size(f64::from(v), 1000.0, 10);
            assert!(code >= prev);
            prev = code;
        }
    }

    #[test]
    fn test_params_validation() {
        assert!(MonitorParams::default().validate().is_ok());
        let bad = MonitorParams {
            q_size_bits: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = MonitorParams {
            q_weight: 1.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    /// 8 Mbit/s, 1000 B packets: one packet time per millisecond.
    fn one_per_ms(q_weight: f64) -> MonitorParams {
        MonitorParams {
            mean_pkt_size: 1000,
            link_bandwidth_bps: 8_000_000,
            q_weight,
            ..Default::default()
        }
    }

    #[test]
    fn test_idle_tick_applies_each_packet_time_once() {
        let mut m = AdaptiveQueueMonitor::new(one_per_ms(0.5), 100, 100_000);
        m.on_arrival(0, 8);
        let _ = m.on_busy();
        assert!(close(m.avg_qsize(), 4.0));

        m.on_empty(0);
        assert!(m.on_idle_tick(2_000_000));
        // two packet times => 0.5^2
        assert!(close(m.avg_qsize(), 1.0));
        // nothing new elapsed
        assert!(m.on_idle_tick(2_000_000));
        assert!(m.on_idle_tick(2_900_000));
        assert!(close(m.avg_qsize(), 1.0));
        assert!(m.on_idle_tick(3_000_000));
        assert!(close(m.avg_qsize(), 0.5));

        let _ = m.on_busy();
        assert!(!m.on_idle_tick(4_000_000));
        assert!(close(m.avg_qsize(), 0.5));
    }

    #[test]
    fn test_idle_decay_independent_of_tick_period() {
        let end = 10_000_000;
        let mut results = vec![];
        for period in [None, Some(100_000), Some(250_000), Some(1_000_000), Some(3_000_000)] {
            let mut m = AdaptiveQueueMonitor::new(one_per_ms(0.1), 100, 100_000);
            m.on_arrival(0, 40);
            let _ = m.on_busy();
            m.on_empty(0);
            if let Some(period) = period {
                let mut t = period;
                while t < end {
                    assert!(m.on_idle_tick(t));
                    t += period;
                }
            }
            let sample = m.sample_arrival(end, 0);
            assert_eq!(sample.packet_times() + m.idle_applied, 10);
            results.push(sample.q_avg());
        }
        let expected = 4.0 * 0.9f64.powi(11);
        for q in results {
            assert!((q - expected).abs() < 1e-9, "{} != {}", q, expected);
        }
    }

    #[test]
    fn test_sample_is_applied_only_on_commit() {
        let mut m = AdaptiveQueueMonitor::new(one_per_ms(0.5), 100, 100_000);
        m.on_arrival(0, 8);
        m.on_empty(0);

        let sample = m.sample_arrival(2_000_000, 4);
        assert!(close(sample.q_avg(), 4.0 * 0.125 + 2.0));
        assert_eq!(m.telemetry_with(&sample).avg_qsize, map_size(2.5, 100.0, 16));
        // nothing moved yet
        assert!(close(m.avg_qsize(), 4.0));
        assert_eq!(m.telemetry().avg_qsize, map_size(4.0, 100.0, 16));

        m.commit_arrival(sample);
        assert!(close(m.avg_qsize(), 2.5));
        // the two packet times are spent
        assert!(m.on_idle_tick(2_000_000));
        assert!(close(m.avg_qsize(), 2.5));
    }

    #[test]
    fn test_dq_rate_measurement() {
        let params = MonitorParams {
            dq_threshold: 1000,
            link_bandwidth_bps: 8_000_000,
            ..Default::default()
        };
        let mut m = AdaptiveQueueMonitor::new(params, 100, 100_000);
        // backlog below threshold: no cycle
        m.on_departure(0, 500, 500);
        assert!(!m.snapshot().in_measurement);

        m.on_departure(0, 500, 5000);
        assert!(m.snapshot().in_measurement);
        // 1000 bytes in 1 ms => 1e6 B/s
        m.on_departure(1_000_000, 500, 4500);
        assert!(close(m.snapshot().dq_rate, 1_000_000.0));
        // latency = 4500 B / 1e6 B/s = 4.5 ms
        assert!(close(m.snapshot().latency_ns, 4_500_000.0));

        let t = m.telemetry();
        assert_eq!(t.dq_rate, map_size(1_000_000.0, 1_000_000.0, 16));
    }
}
