// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Program descriptions and the registry that turns them into pipelines.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{
    AcceptAll, AvgThreshold, Classify, DequeuePipeline, EnqueuePipeline, FieldRank, Fifo,
    IngressPipeline, LeastRecentlyServed, MinRank, Shaper, Stfq, StrictOrder, StrictPriority,
};
use crate::error::PipelineError;

/// Externally supplied program: a program name plus its command list.
///
/// Commands are whitespace-separated words, e.g. `"route 1 4"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramSource {
    pub program: String,
    #[serde(default)]
    pub commands: Vec<String>,
}

impl ProgramSource {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            commands: Vec::new(),
        }
    }

    /// Append a command.
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.commands.push(command.into());
        self
    }

    /// Parse the command list.
    pub fn parsed(&self) -> Result<Vec<Command>, PipelineError> {
        self.commands
            .iter()
            .filter(|c| !c.trim().is_empty() && !c.trim_start().starts_with('#'))
            .map(|c| Command::parse(&self.program, c))
            .collect()
    }
}

/// One parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    program: String,
    raw: String,
    pub name: String,
    pub args: Vec<String>,
}

impl Command {
    fn parse(program: &str, raw: &str) -> Result<Self, PipelineError> {
        let mut words = raw.split_whitespace();
        let name = words
            .next()
            .ok_or_else(|| PipelineError::invalid(program, raw, "empty command"))?;
        Ok(Self {
            program: program.to_string(),
            raw: raw.to_string(),
            name: name.to_string(),
            args: words.map(str::to_string).collect(),
        })
    }

    /// Error for this command.
    pub fn invalid(&self, reason: impl Into<String>) -> PipelineError {
        PipelineError::invalid(&self.program, &self.raw, reason)
    }

    /// Require exactly `n` arguments.
    pub fn expect_args(&self, n: usize) -> Result<(), PipelineError> {
        if self.args.len() == n {
            Ok(())
        } else {
            Err(self.invalid(format!("expected {} argument(s), got {}", n, self.args.len())))
        }
    }

    /// Parse argument `idx` as a `u64`.
    pub fn u64_arg(&self, idx: usize) -> Result<u64, PipelineError> {
        let word = self
            .args
            .get(idx)
            .ok_or_else(|| self.invalid(format!("missing argument {}", idx)))?;
        word.parse()
            .map_err(|_| self.invalid(format!("'{}' is not an unsigned integer", word)))
    }

    /// Parse argument `idx` as an `f64`.
    pub fn f64_arg(&self, idx: usize) -> Result<f64, PipelineError> {
        let word = self
            .args
            .get(idx)
            .ok_or_else(|| self.invalid(format!("missing argument {}", idx)))?;
        word.parse()
            .map_err(|_| self.invalid(format!("'{}' is not a number", word)))
    }

    /// Borrow argument `idx` as a string.
    pub fn str_arg(&self, idx: usize) -> Result<&str, PipelineError> {
        self.args
            .get(idx)
            .map(String::as_str)
            .ok_or_else(|| self.invalid(format!("missing argument {}", idx)))
    }

    /// Error for a command the program does not understand.
    pub fn unknown(&self) -> PipelineError {
        self.invalid("unknown command")
    }
}

type IngressBuilder = Box<dyn Fn(&ProgramSource) -> Result<Box<dyn IngressPipeline>, PipelineError>>;
type EnqueueBuilder = Box<dyn Fn(&ProgramSource) -> Result<Box<dyn EnqueuePipeline>, PipelineError>>;
type DequeueBuilder = Box<dyn Fn(&ProgramSource) -> Result<Box<dyn DequeuePipeline>, PipelineError>>;

/// Maps program names to pipeline builders.
pub struct PipelineRegistry {
    ingress: HashMap<String, IngressBuilder>,
    enqueue: HashMap<String, EnqueueBuilder>,
    dequeue: HashMap<String, DequeueBuilder>,
}

impl fmt::Debug for PipelineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |m: Vec<&String>| {
            let mut v: Vec<String> = m.into_iter().cloned().collect();
            v.sort();
            v
        };
        f.debug_struct("PipelineRegistry")
            .field("ingress", &names(self.ingress.keys().collect()))
            .field("enqueue", &names(self.enqueue.keys().collect()))
            .field("dequeue", &names(self.dequeue.keys().collect()))
            .finish()
    }
}

impl Default for PipelineRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PipelineRegistry {
    /// Registry without any program.
    pub fn empty() -> Self {
        Self {
            ingress: HashMap::new(),
            enqueue: HashMap::new(),
            dequeue: HashMap::new(),
        }
    }

    /// Registry with every built-in program.
    pub fn builtin() -> Self {
        let mut reg = Self::empty();

        reg.register_ingress("accept-all", |src| {
            AcceptAll::from_program(src).map(|p| Box::new(p) as Box<dyn IngressPipeline>)
        });
        reg.register_ingress("avg-threshold", |src| {
            AvgThreshold::from_program(src).map(|p| Box::new(p) as Box<dyn IngressPipeline>)
        });

        reg.register_enqueue("fifo", |src| {
            Fifo::from_program(src).map(|p| Box::new(p) as Box<dyn EnqueuePipeline>)
        });
        reg.register_enqueue("field-rank", |src| {
            FieldRank::from_program(src).map(|p| Box::new(p) as Box<dyn EnqueuePipeline>)
        });
        reg.register_enqueue("strict-priority", |src| {
            StrictPriority::from_program(src).map(|p| Box::new(p) as Box<dyn EnqueuePipeline>)
        });
        reg.register_enqueue("stfq", |src| {
            Stfq::from_program(src).map(|p| Box::new(p) as Box<dyn EnqueuePipeline>)
        });
        reg.register_enqueue("shaper", |src| {
            Shaper::from_program(src).map(|p| Box::new(p) as Box<dyn EnqueuePipeline>)
        });
        reg.register_enqueue("classify", |src| {
            Classify::from_program(src).map(|p| Box::new(p) as Box<dyn EnqueuePipeline>)
        });

        reg.register_dequeue("min-rank", |src| {
            MinRank::from_program(src).map(|p| Box::new(p) as Box<dyn DequeuePipeline>)
        });
        reg.register_dequeue("strict", |src| {
            StrictOrder::from_program(src).map(|p| Box::new(p) as Box<dyn DequeuePipeline>)
        });
        reg.register_dequeue("least-recently-served", |src| {
            LeastRecentlyServed::from_program(src).map(|p| Box::new(p) as Box<dyn DequeuePipeline>)
        });

        reg
    }

    pub fn register_ingress<F>(&mut self, name: impl Into<String>, builder: F)
    where
        F: Fn(&ProgramSource) -> Result<Box<dyn IngressPipeline>, PipelineError> + 'static,
    {
        self.ingress.insert(name.into(), Box::new(builder));
    }

    pub fn register_enqueue<F>(&mut self, name: impl Into<String>, builder: F)
    where
        F: Fn(&ProgramSource) -> Result<Box<dyn EnqueuePipeline>, PipelineError> + 'static,
    {
        self.enqueue.insert(name.into(), Box::new(builder));
    }

    pub fn register_dequeue<F>(&mut self, name: impl Into<String>, builder: F)
    where
        F: Fn(&ProgramSource) -> Result<Box<dyn DequeuePipeline>, PipelineError> + 'static,
    {
        self.dequeue.insert(name.into(), Box::new(builder));
    }

    pub fn build_ingress(
        &self,
        src: &ProgramSource,
    ) -> Result<Box<dyn IngressPipeline>, PipelineError> {
        let builder = self
            .ingress
            .get(&src.program)
            .ok_or_else(|| PipelineError::UnknownProgram {
                stage: "ingress",
                program: src.program.clone(),
            })?;
        builder(src)
    }

    pub fn build_enqueue(
        &self,
        src: &ProgramSource,
    ) -> Result<Box<dyn EnqueuePipeline>, PipelineError> {
        let builder = self
            .enqueue
            .get(&src.program)
            .ok_or_else(|| PipelineError::UnknownProgram {
                stage: "enqueue",
                program: src.program.clone(),
            })?;
        builder(src)
    }

    pub fn build_dequeue(
        &self,
        src: &ProgramSource,
    ) -> Result<Box<dyn DequeuePipeline>, PipelineError> {
        let builder = self
            .dequeue
            .get(&src.program)
            .ok_or_else(|| PipelineError::UnknownProgram {
                stage: "dequeue",
                program: src.program.clone(),
            })?;
        builder(src)
    }
}
