/*!
# Refactoring Engine

Staged, rule-based rewriting of a syntax tree.

## Architecture

- `MarkStore`: named node sets passed between commands and stages
- `Query`: the select language that fills marks
- `Pattern` / `Matcher`: template fragments with `__` holes
- `RefactorCommand`: one script command applied to a `RefactorCtx`
- `Script` / `Stage`: rule scripts parsed up front into typed commands
- `Pipeline`: runs stages in order over one tree and one mark store
- `FileDriver`: reads a source file, runs a pipeline, writes the result

## Example Usage

```rust,ignore
use idiomize_core::refactor::{Pipeline, Script};

let script = Script::parse(r#"
    stage collect {
        select target 'crate; child(static && mut);' ;
        static_collect_to_struct State S
    }
"#)?;
let output = Pipeline::new(script).run(tree)?;
println!("{}", output.tree.to_source());
```
*/

use std::fmt;

use crate::ast::Tree;

pub mod c_rules;
pub mod error;
pub mod file_driver;
pub mod mark_ops;
pub mod marks;
pub mod patterns;
pub mod pipeline;
pub mod rewrite;
pub mod script;
pub mod select;
pub mod type_fix;

pub use error::RefactorError;
pub use file_driver::{FileDriver, FileSummary};
pub use marks::{MarkStore, Selection, DEFAULT_LABEL};
pub use patterns::{Bindings, Matcher, Pattern};
pub use pipeline::{Pipeline, PipelineError, RunOutput, RunSummary, StageStats};
pub use script::{Script, ScriptError, Stage};
pub use select::{Filter, Query, QueryOp};

pub type RefactorResult<T> = std::result::Result<T, RefactorError>;

/// Counters a command reports back to the pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandStats {
    /// Nodes replaced or rewritten in place
    pub rewrites: u64,
    /// Type mismatches no rule could fix, as printed `actual -> expected` lines
    pub unresolved: Vec<String>,
}

impl CommandStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, other: CommandStats) {
        self.rewrites += other.rewrites;
        self.unresolved.extend(other.unresolved);
    }
}

/// State threaded through every command of a run
#[derive(Debug, Default)]
pub struct RefactorCtx {
    pub tree: Tree,
    pub marks: MarkStore,
    pub stats: CommandStats,
}

impl RefactorCtx {
    pub fn new(tree: Tree) -> Self {
        Self {
            tree,
            marks: MarkStore::new(),
            stats: CommandStats::new(),
        }
    }

    /// Live nodes carrying `label`, in pre-order.
    pub fn marked(&self, label: &str) -> Selection {
        self.marks.marked(&self.tree, label)
    }

    /// Takes the counters gathered since the last call.
    pub fn take_stats(&mut self) -> CommandStats {
        std::mem::take(&mut self.stats)
    }
}

/// A single script command
///
/// Commands are built once, when the script is parsed, and hold every
/// argument in typed form. Applying a command never re-parses script text.
pub trait RefactorCommand: Send + Sync + fmt::Debug {
    /// Script name of the command
    fn name(&self) -> &'static str;

    /// Command with its arguments, for logs and error reports
    fn description(&self) -> String;

    /// Apply the command to the tree and mark store
    fn apply(&self, ctx: &mut RefactorCtx) -> RefactorResult<()>;
}
