//! Idiomize CLI - command line front end for the idiomize refactoring engine
//!
//! Builds the argument parser, turns matches into an [`IdiomizeConfig`] and
//! a rule [`Script`], and drives one file through the pipeline.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use idiomize_core::{
    FileDriver, FileSummary, IdiomizeConfig, Pipeline, RewriteMode, Script, ScriptError,
};

/// Command line definition
pub fn build_cli() -> Command {
    Command::new("idiomize")
        .version(idiomize_core::VERSION)
        .about("Staged rule-based refactoring of machine-translated Rust")
        .arg(
            Arg::new("rewrite-mode")
                .short('r')
                .long("rewrite-mode")
                .value_name("MODE")
                .help("inplace, alongside, print or json")
                .default_value("inplace"),
        )
        .arg(
            Arg::new("rules")
                .long("rules")
                .value_name("FILE")
                .help("Rule script file; repeat to append more stages")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("command")
                .short('c')
                .long("command")
                .value_name("SCRIPT")
                .help("Inline rule script; runs after every --rules file")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("no-backup")
                .long("no-backup")
                .help("Do not keep <file>.backup when rewriting in place")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("dump-marks")
                .long("dump-marks")
                .help("Print the marks left after the run as JSON")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .help("Enable debug logging")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("input")
                .value_name("INPUT")
                .help("Source file to refactor")
                .required(true)
                .index(1),
        )
}

/// Configuration from parsed arguments
pub fn config_from_matches(matches: &ArgMatches) -> Result<IdiomizeConfig> {
    let mode = match matches.get_one::<String>("rewrite-mode") {
        Some(mode) => mode.parse::<RewriteMode>()?,
        None => RewriteMode::default(),
    };
    Ok(IdiomizeConfig {
        rewrite_mode: mode,
        backup_originals: !matches.get_flag("no-backup"),
        dump_marks: matches.get_flag("dump-marks"),
        debug: matches.get_flag("debug"),
        ..Default::default()
    })
}

/// Parses `source` as the stages following those already in `script`.
/// Stage indices in errors count from the start of the whole run.
fn parse_appended(script: &Script, source: &str) -> Result<Script, ScriptError> {
    Script::parse(source).map_err(|mut err| {
        err.stage += script.len();
        err
    })
}

/// Rule files in order, then inline scripts, each appended as more stages.
pub fn script_from_matches(matches: &ArgMatches) -> Result<Script> {
    let mut script = Script::default();
    for path in matches.get_many::<String>("rules").into_iter().flatten() {
        let source =
            fs::read_to_string(path).with_context(|| format!("reading rule script {path}"))?;
        let rules =
            parse_appended(&script, &source).with_context(|| format!("in rule script {path}"))?;
        script.extend(rules);
    }
    for (index, source) in matches.get_many::<String>("command").into_iter().flatten().enumerate() {
        let rules = parse_appended(&script, source)
            .with_context(|| format!("in inline script #{}", index + 1))?;
        script.extend(rules);
    }
    Ok(script)
}

/// Runs the pipeline described by `matches` over the input file.
pub fn run(matches: &ArgMatches) -> Result<FileSummary> {
    let config = config_from_matches(matches)?;
    let script = script_from_matches(matches)?;
    let input = matches
        .get_one::<String>("input")
        .map(PathBuf::from)
        .context("no input file given")?;

    let driver = FileDriver::from_config(Pipeline::new(script), &config);
    let summary = driver
        .transform_file(&input)
        .with_context(|| format!("refactoring {}", input.display()))?;
    Ok(summary)
}

/// Human-readable run report, one line per stage
pub fn format_report(summary: &FileSummary) -> String {
    let mut out = String::new();
    for stage in &summary.run.stages {
        out.push_str(&format!(
            "stage {}: {} ({} commands, {} rewrites, {} unresolved, {}ms)\n",
            stage.index,
            stage.stage_name,
            stage.commands,
            stage.rewrites,
            stage.unresolved.len(),
            stage.elapsed_ms
        ));
    }
    for mismatch in &summary.run.unresolved {
        out.push_str(&format!("unresolved: {mismatch}\n"));
    }
    if let Some(path) = &summary.written {
        out.push_str(&format!("wrote {}\n", path.display()));
    }
    out.push_str(&format!(
        "{} rewrites in {} stages",
        summary.run.rewrites,
        summary.run.stages.len()
    ));
    out
}
