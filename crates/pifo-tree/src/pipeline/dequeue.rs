// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Built-in dequeue programs. Only pifos whose head is eligible are
//! candidates; ties go to the lowest pifo index.

use super::{ready_pifos, DequeueDecision, DequeueMeta, DequeuePipeline, ProgramSource};
use crate::error::PipelineError;

fn no_commands(src: &ProgramSource) -> Result<(), PipelineError> {
    match src.parsed()?.first() {
        Some(cmd) => Err(cmd.unknown()),
        None => Ok(()),
    }
}

/// Serve the pifo whose head has the smallest rank.
#[derive(Debug, Clone, Default)]
pub struct MinRank;

impl MinRank {
    pub fn from_program(src: &ProgramSource) -> Result<Self, PipelineError> {
        no_commands(src)?;
        Ok(Self)
    }
}

impl DequeuePipeline for MinRank {
    fn decide(&self, meta: &DequeueMeta) -> DequeueDecision {
        ready_pifos(&meta.pifos, meta.now)
            .min_by_key(|(idx, p)| (p.head_rank, *idx))
            .map_or_else(DequeueDecision::none, |(idx, _)| DequeueDecision::serve(idx))
    }

    fn name(&self) -> &str {
        "min-rank"
    }
}

/// Serve the first non-empty pifo in a fixed order (index order by default).
///
/// Commands: `order <pifo> <pifo> ...`.
#[derive(Debug, Clone, Default)]
pub struct StrictOrder {
    order: Option<Vec<usize>>,
}

impl StrictOrder {
    pub fn with_order(order: Vec<usize>) -> Self {
        Self { order: Some(order) }
    }

    pub fn from_program(src: &ProgramSource) -> Result<Self, PipelineError> {
        let mut out = Self::default();
        for cmd in src.parsed()? {
            match cmd.name.as_str() {
                "order" => {
                    if cmd.args.is_empty() {
                        return Err(cmd.invalid("expected at least one pifo"));
                    }
                    let order = (0..cmd.args.len())
                        .map(|i| {
                            let v = cmd.u64_arg(i)?;
                            usize::try_from(v).map_err(|_| cmd.invalid("pifo index too large"))
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    out.order = Some(order);
                }
                _ => return Err(cmd.unknown()),
            }
        }
        Ok(out)
    }
}

impl DequeuePipeline for StrictOrder {
    fn decide(&self, meta: &DequeueMeta) -> DequeueDecision {
        let pick = match &self.order {
            Some(order) => order
                .iter()
                .copied()
                .find(|&i| meta.pifos.get(i).is_some_and(|p| p.head_ready(meta.now))),
            None => ready_pifos(&meta.pifos, meta.now).map(|(i, _)| i).next(),
        };
        pick.map_or_else(DequeueDecision::none, DequeueDecision::serve)
    }

    fn name(&self) -> &str {
        "strict"
    }
}

/// Round-robin by age: serve the pifo extracted from longest ago.
#[derive(Debug, Clone, Default)]
pub struct LeastRecentlyServed;

impl LeastRecentlyServed {
    pub fn from_program(src: &ProgramSource) -> Result<Self, PipelineError> {
        no_commands(src)?;
        Ok(Self)
    }
}

impl DequeuePipeline for LeastRecentlyServed {
    fn decide(&self, meta: &DequeueMeta) -> DequeueDecision {
        ready_pifos(&meta.pifos, meta.now)
            .min_by_key(|(idx, p)| (p.last_pop_time, *idx))
            .map_or_else(DequeueDecision::none, |(idx, _)| DequeueDecision::serve(idx))
    }

    fn name(&self) -> &str {
        "least-recently-served"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PifoState;
    use crate::Timestamp;

    fn pifo(rank: u64, tx: Timestamp, last_pop: Timestamp) -> PifoState {
        PifoState {
            len: 1,
            bytes: 100,
            head_rank: Some(rank),
            head_tx_time: Some(tx),
            last_pop_time: last_pop,
        }
    }

    fn meta(now: Timestamp, pifos: Vec<PifoState>) -> DequeueMeta {
        DequeueMeta { now, node: 0, pifos }
    }

    #[test]
    fn test_min_rank() {
        let m = meta(10, vec![pifo(5, 0, 0), pifo(3, 0, 0), pifo(3, 0, 0)]);
        assert_eq!(MinRank.decide(&m).pifo, Some(1));

        // head of pifo 1 not yet eligible
        let m = meta(10, vec![pifo(5, 0, 0), pifo(3, 20, 0)]);
        assert_eq!(MinRank.decide(&m).pifo, Some(0));

        let m = meta(10, vec![PifoState::default(), pifo(1, 11, 0)]);
        assert_eq!(MinRank.decide(&m).pifo, None);
    }

    #[test]
    fn test_strict_order() {
        let m = meta(0, vec![PifoState::default(), pifo(9, 0, 0), pifo(0, 0, 0)]);
        assert_eq!(StrictOrder::default().decide(&m).pifo, Some(1));
        assert_eq!(StrictOrder::with_order(vec![2, 1]).decide(&m).pifo, Some(2));
        assert_eq!(StrictOrder::with_order(vec![0, 7]).decide(&m).pifo, None);
    }

    #[test]
    fn test_least_recently_served() {
        let m = meta(100, vec![pifo(0, 0, 50), pifo(0, 0, 20), pifo(0, 0, 20)]);
        assert_eq!(LeastRecentlyServed.decide(&m).pifo, Some(1));
    }

    #[test]
    fn test_from_program() {
        let src = ProgramSource::new("strict").command("order 2 0 1");
        let p = StrictOrder::from_program(&src).unwrap();
        let m = meta(0, vec![pifo(0, 0, 0), PifoState::default(), pifo(0, 0, 0)]);
        assert_eq!(p.decide(&m).pifo, Some(2));

        assert!(StrictOrder::from_program(&ProgramSource::new("strict").command("order")).is_err());
        assert!(MinRank::from_program(&ProgramSource::new("min-rank").command("x")).is_err());
        assert!(LeastRecentlyServed::from_program(&ProgramSource::new("lrs")).is_ok());
    }
}
