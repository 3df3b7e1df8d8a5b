/*!
# FileDriver - File-based Refactoring

Reads one source file, runs a pipeline over it and hands the result back
according to the rewrite mode: overwrite in place (keeping a `.backup`),
write a `.new` file alongside, or return the printed source or JSON tree.
*/

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::ast::{NodeId, ToSource, Tree};
use crate::parser::create_parser;
use crate::{IdiomizeConfig, Result, RewriteMode};

use super::marks::MarkStore;
use super::pipeline::{Pipeline, RunOutput, RunSummary};

/// One marked node in a mark dump
#[derive(Debug, Clone, Serialize)]
pub struct MarkedNode {
    pub id: NodeId,
    pub kind: String,
    pub source: String,
}

/// Live marks with the printed source of every marked node.
pub fn mark_report(tree: &Tree, marks: &MarkStore) -> BTreeMap<String, Vec<MarkedNode>> {
    marks
        .snapshot(tree)
        .into_iter()
        .map(|(label, ids)| {
            let nodes = ids
                .into_iter()
                .filter_map(|id| {
                    tree.get(id).map(|node| MarkedNode {
                        id,
                        kind: node.category().to_string(),
                        source: tree.source_of(id),
                    })
                })
                .collect();
            (label, nodes)
        })
        .collect()
}

/// Runs a pipeline over source files
#[derive(Debug)]
pub struct FileDriver {
    pipeline: Pipeline,
    mode: RewriteMode,
    backup_originals: bool,
    dump_marks: bool,
    parser: String,
}

impl FileDriver {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            mode: RewriteMode::default(),
            backup_originals: true,
            dump_marks: false,
            parser: "rust".to_string(),
        }
    }

    pub fn from_config(pipeline: Pipeline, config: &IdiomizeConfig) -> Self {
        Self::new(pipeline)
            .mode(config.rewrite_mode)
            .backup_originals(config.backup_originals)
            .dump_marks(config.dump_marks)
            .parser(&config.parser)
    }

    /// Set the rewrite mode
    pub fn mode(mut self, mode: RewriteMode) -> Self {
        self.mode = mode;
        self
    }

    /// Whether to keep `<file>.backup` before overwriting in place
    pub fn backup_originals(mut self, backup: bool) -> Self {
        self.backup_originals = backup;
        self
    }

    /// Whether to report the mark store after the run
    pub fn dump_marks(mut self, dump: bool) -> Self {
        self.dump_marks = dump;
        self
    }

    /// Set the source parser by name
    pub fn parser(mut self, name: &str) -> Self {
        self.parser = name.to_string();
        self
    }

    /// Parses `source` and runs the pipeline over it.
    pub fn run_source(&self, source: &str) -> Result<RunOutput> {
        let parser = create_parser(&self.parser)?;
        let tree = parser.parse_crate(source)?;
        Ok(self.pipeline.run(tree)?)
    }

    /// Refactors one file according to the rewrite mode.
    pub fn transform_file<P: AsRef<Path>>(&self, source_file: P) -> Result<FileSummary> {
        let source_path = source_file.as_ref();
        let source = fs::read_to_string(source_path)?;
        let output = self.run_source(&source)?;

        let mut summary = FileSummary::new(source_path.to_path_buf());
        if self.dump_marks {
            let report = mark_report(&output.tree, &output.marks);
            summary.marks = Some(serde_json::to_string_pretty(&report)?);
        }

        match self.mode {
            RewriteMode::InPlace => {
                if self.backup_originals {
                    let backup = with_suffix(source_path, "backup");
                    fs::copy(source_path, &backup)?;
                    summary.backup = Some(backup);
                }
                fs::write(source_path, output.tree.to_source())?;
                summary.written = Some(source_path.to_path_buf());
            }
            RewriteMode::Alongside => {
                let target = with_suffix(source_path, "new");
                fs::write(&target, output.tree.to_source())?;
                summary.written = Some(target);
            }
            RewriteMode::Print => summary.output = Some(output.tree.to_source()),
            RewriteMode::Json => summary.output = Some(serde_json::to_string_pretty(&output.tree)?),
        }

        info!(
            file = %source_path.display(),
            mode = %self.mode,
            rewrites = output.summary.rewrites,
            "file refactored"
        );
        summary.run = output.summary;
        Ok(summary)
    }
}

/// `src/main.rs` -> `src/main.rs.<suffix>`
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Result of refactoring one file
#[derive(Debug, Default)]
pub struct FileSummary {
    pub path: PathBuf,
    /// File the result was written to, if any
    pub written: Option<PathBuf>,
    pub backup: Option<PathBuf>,
    /// Printed source or JSON, for the modes that do not write files
    pub output: Option<String>,
    /// Mark report as JSON
    pub marks: Option<String>,
    pub run: RunSummary,
}

impl FileSummary {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        self.run.success()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    const SRC: &str = "static mut A: i32 = 1;\nfn f() {\n    A = 2;\n}\n";
    const SCRIPT: &str = "select target 'crate; child(static)' ; set_visibility pub";

    fn driver(mode: RewriteMode) -> FileDriver {
        FileDriver::new(Pipeline::from_source(SCRIPT).unwrap()).mode(mode)
    }

    fn write_source(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("lib.rs");
        fs::write(&path, SRC).unwrap();
        path
    }

    #[test]
    fn test_in_place_keeps_backup() {
        let dir = TempDir::new().unwrap();
        let path = write_source(&dir);
        let summary = driver(RewriteMode::InPlace).transform_file(&path).unwrap();

        assert!(fs::read_to_string(&path).unwrap().starts_with("pub static mut A"));
        assert_eq!(summary.backup, Some(dir.path().join("lib.rs.backup")));
        assert_eq!(fs::read_to_string(dir.path().join("lib.rs.backup")).unwrap(), SRC);
        assert_eq!(summary.run.rewrites, 1);
    }

    #[test]
    fn test_in_place_without_backup() {
        let dir = TempDir::new().unwrap();
        let path = write_source(&dir);
        driver(RewriteMode::InPlace)
            .backup_originals(false)
            .transform_file(&path)
            .unwrap();
        assert!(!dir.path().join("lib.rs.backup").exists());
    }

    #[test]
    fn test_alongside_leaves_input_untouched() {
        let dir = TempDir::new().unwrap();
        let path = write_source(&dir);
        let summary = driver(RewriteMode::Alongside).transform_file(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), SRC);
        assert_eq!(summary.written, Some(dir.path().join("lib.rs.new")));
    }

    #[test]
    fn test_print_json_and_mark_dump() {
        let dir = TempDir::new().unwrap();
        let path = write_source(&dir);
        let printed = driver(RewriteMode::Print)
            .dump_marks(true)
            .transform_file(&path)
            .unwrap();
        assert!(printed.output.unwrap().starts_with("pub static mut A"));
        let marks: serde_json::Value = serde_json::from_str(&printed.marks.unwrap()).unwrap();
        assert_eq!(marks["target"][0]["source"], "pub static mut A: i32 = 1;");

        let json = driver(RewriteMode::Json).transform_file(&path).unwrap();
        let tree: Tree = serde_json::from_str(&json.output.unwrap()).unwrap();
        assert!(tree.to_source().starts_with("pub static mut A"));
        assert_eq!(fs::read_to_string(&path).unwrap(), SRC);
    }

    #[test]
    fn test_parse_errors_surface() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.rs");
        fs::write(&path, "fn (").unwrap();
        let err = driver(RewriteMode::Print).transform_file(&path).unwrap_err();
        assert!(matches!(err, crate::IdiomizeError::Parse(_)));
    }
}
