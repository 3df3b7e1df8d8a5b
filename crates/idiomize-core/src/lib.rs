//! # Idiomize Core
//!
//! Staged, rule-based source-to-source refactoring for machine-translated
//! Rust:
//! - Arena syntax tree with stable node ids, resolver and printer
//! - Parser for the supported Rust subset
//! - Mark store, select language and template patterns
//! - Rewrite commands, type-fix rules and C-translation cleanups
//! - Rule scripts, the stage pipeline and the file driver
//!
//! The engine is single-threaded: a run owns its tree and its mark store.

#![warn(clippy::all)]

pub mod ast;
pub mod parser;
pub mod refactor;

use std::fmt;
use std::str::FromStr;

pub use ast::{NodeId, Tree, ToSource};
pub use parser::{create_parser, ParseError, SourceParser};
pub use refactor::{
    FileDriver, FileSummary, MarkStore, Pipeline, PipelineError, RefactorError, RunOutput,
    RunSummary, Script, ScriptError,
};

/// Idiomize version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize tracing for the refactoring engine
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    let filter = match "idiomize_core=info".parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// What to do with the rewritten crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RewriteMode {
    /// Overwrite the input file
    #[default]
    InPlace,
    /// Write `<file>.new` next to the input
    Alongside,
    /// Print the result to stdout
    Print,
    /// Print the tree as JSON
    Json,
}

impl FromStr for RewriteMode {
    type Err = IdiomizeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "inplace" => Ok(Self::InPlace),
            "alongside" => Ok(Self::Alongside),
            "print" => Ok(Self::Print),
            "json" => Ok(Self::Json),
            other => Err(IdiomizeError::Config(format!("unknown rewrite mode `{other}`"))),
        }
    }
}

impl fmt::Display for RewriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InPlace => "inplace",
            Self::Alongside => "alongside",
            Self::Print => "print",
            Self::Json => "json",
        })
    }
}

/// Refactoring run configuration
#[derive(Debug, Clone)]
pub struct IdiomizeConfig {
    /// Where the rewritten crate goes
    pub rewrite_mode: RewriteMode,
    /// Keep `<file>.backup` before overwriting in place
    pub backup_originals: bool,
    /// Print the mark store as JSON after the run
    pub dump_marks: bool,
    /// Source parser name
    pub parser: String,
    /// Enable debug logging
    pub debug: bool,
}

impl Default for IdiomizeConfig {
    fn default() -> Self {
        Self {
            rewrite_mode: RewriteMode::InPlace,
            backup_originals: true,
            dump_marks: false,
            parser: "rust".to_string(),
            debug: false,
        }
    }
}

/// Error types for idiomize operations
#[derive(thiserror::Error, Debug)]
pub enum IdiomizeError {
    /// File system error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON output error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Source could not be parsed
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Script or stage failure
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for idiomize operations
pub type Result<T> = std::result::Result<T, IdiomizeError>;
