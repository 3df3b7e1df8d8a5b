//! Stage pipeline: runs a parsed script over one tree and one mark store.

use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::ast::Tree;

use super::marks::MarkStore;
use super::script::{Script, ScriptError, Stage};
use super::{RefactorCtx, RefactorError};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("stage {index} ({stage}) failed: {source}")]
    Stage {
        index: usize,
        stage: String,
        #[source]
        source: RefactorError,
    },
}

/// Per-stage execution statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageStats {
    pub index: usize,
    pub stage_name: String,
    pub commands: u64,
    pub rewrites: u64,
    /// Type mismatches left in the tree
    pub unresolved: Vec<String>,
    pub elapsed_ms: u64,
}

impl StageStats {
    pub fn new(index: usize, stage_name: String) -> Self {
        Self {
            index,
            stage_name,
            ..Self::default()
        }
    }

    pub fn average_rewrites(&self) -> f64 {
        if self.commands == 0 {
            0.0
        } else {
            (self.rewrites as f64) / (self.commands as f64)
        }
    }
}

/// Summary of a whole run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub stages: Vec<StageStats>,
    pub rewrites: u64,
    pub unresolved: Vec<String>,
    pub elapsed_ms: u64,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stage: StageStats) {
        self.rewrites += stage.rewrites;
        self.unresolved.extend(stage.unresolved.iter().cloned());
        self.elapsed_ms += stage.elapsed_ms;
        self.stages.push(stage);
    }

    pub fn merge(&mut self, other: RunSummary) {
        for stage in other.stages {
            self.push(stage);
        }
    }

    /// True when every type mismatch was resolved
    pub fn success(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Result of a successful run
#[derive(Debug)]
pub struct RunOutput {
    pub tree: Tree,
    pub marks: MarkStore,
    pub summary: RunSummary,
}

/// Ordered stages over one tree
#[derive(Debug, Default)]
pub struct Pipeline {
    script: Script,
}

impl Pipeline {
    pub fn new(script: Script) -> Self {
        Self { script }
    }

    /// Parses `source` as a rule script.
    pub fn from_source(source: &str) -> Result<Self, PipelineError> {
        Ok(Self::new(Script::parse(source)?))
    }

    pub fn stages(&self) -> &[Stage] {
        self.script.stages()
    }

    /// Runs every stage in order. The tree is consumed: when a stage fails
    /// the partly rewritten tree is dropped with the error.
    pub fn run(&self, tree: Tree) -> Result<RunOutput, PipelineError> {
        let mut ctx = RefactorCtx::new(tree);
        let mut summary = RunSummary::new();

        for (index, stage) in self.script.stages().iter().enumerate() {
            let started = Instant::now();
            let label = stage.to_string();
            info!(index, stage = %label, commands = stage.commands.len(), "running stage");

            let mut stats = StageStats::new(index, label);
            for command in &stage.commands {
                debug!(command = %command.description(), "applying command");
                command.apply(&mut ctx).map_err(|source| PipelineError::Stage {
                    index,
                    stage: stats.stage_name.clone(),
                    source,
                })?;
                stats.commands += 1;
            }
            let counters = ctx.take_stats();
            stats.rewrites = counters.rewrites;
            stats.unresolved = counters.unresolved;
            stats.elapsed_ms = started.elapsed().as_millis() as u64;

            info!(
                index,
                rewrites = stats.rewrites,
                unresolved = stats.unresolved.len(),
                elapsed_ms = stats.elapsed_ms,
                "stage finished"
            );
            summary.push(stats);
        }

        Ok(RunOutput {
            tree: ctx.tree,
            marks: ctx.marks,
            summary,
        })
    }
}
