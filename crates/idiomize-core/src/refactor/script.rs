/*!
# Rule Scripts

A rule script is a list of stages, each a list of commands:

```text
script   = { stage } | { command } ;
stage    = "stage" [ name ] "{" { command } "}" ;
command  = word { argument } ( ";" | before "}" | end of input ) ;
argument = 'raw text' | "text with \" and \\ escapes" | key=value | bare-word ;
```

`#` and `//` start comments that run to the end of the line. A script
without any `stage` block is a single unnamed stage.

Scripts are parsed and every command is built (queries compiled, templates
parsed) before anything runs, so a malformed script never touches a tree.
*/

use std::fmt;

use indexmap::IndexMap;
use nom::{
    IResult,
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag, take_while1},
    character::complete::{char, multispace1, not_line_ending, satisfy},
    combinator::{consumed, cut, map, not, opt, peek, value},
    error::{context, VerboseError, VerboseErrorKind},
    multi::many0,
    sequence::{delimited, pair, preceded, separated_pair, terminated},
};
use thiserror::Error;

use super::c_rules::{
    ConvertFormatString, CreateItem, DeleteItems, FuncToMacro, InsertPosition, SetMutability,
    SetVisibility, StaticCollectToStruct, StaticToLocalRef, StructAssignToUpdate,
    StructMergeUpdates, WrappingArithToNormal,
};
use super::mark_ops::{
    ClearMarks, CopyMarks, DeleteMarks, MarkArgUses, MarkCallers, RenameMarks, Select,
};
use super::rewrite::{BytestrToStr, Rewrite};
use super::select::Query;
use super::type_fix::TypeFixRules;
use super::{RefactorCommand, RefactorError, RefactorResult};

/// A script that could not be parsed or whose commands could not be built
#[derive(Error, Debug)]
#[error("rule script error in stage {stage}: {source}")]
pub struct ScriptError {
    /// 0-based index of the offending stage
    pub stage: usize,
    #[source]
    pub source: RefactorError,
}

/// One script argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Bare(String),
    Quoted(String),
    Keyword(String, String),
}

#[derive(Debug, Clone)]
struct RawCommand {
    /// Remaining input length at the command name while parsing, byte
    /// offset into the script once the stage is built
    offset: usize,
    name: String,
    args: Vec<Arg>,
}

#[derive(Debug)]
struct RawStage<'a> {
    name: Option<String>,
    body: &'a str,
    commands: Vec<RawCommand>,
}

/// A stage: commands run in order over the same tree and marks
#[derive(Debug)]
pub struct Stage {
    pub name: Option<String>,
    /// Stage body as written
    pub source: String,
    pub commands: Vec<Box<dyn RefactorCommand>>,
}

impl Stage {
    pub fn new(name: Option<String>, commands: Vec<Box<dyn RefactorCommand>>) -> Self {
        let source = commands
            .iter()
            .map(|c| c.description())
            .collect::<Vec<_>>()
            .join(" ; ");
        Self {
            name,
            source,
            commands,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => f.write_str(name),
            None => {
                let text = self.source.split_whitespace().collect::<Vec<_>>().join(" ");
                f.write_str(&text)
            }
        }
    }
}

/// A parsed rule script
#[derive(Debug, Default)]
pub struct Script {
    stages: Vec<Stage>,
}

impl Script {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// Parses a script with `stage` blocks, or a bare command list.
    pub fn parse(source: &str) -> Result<Self, ScriptError> {
        if starts_with_stage(source) {
            Self::parse_stages(source)
        } else {
            Self::parse_commands(source)
        }
    }

    /// Parses a bare command list as one unnamed stage.
    pub fn parse_commands(source: &str) -> Result<Self, ScriptError> {
        let syntax = |e| ScriptError { stage: 0, source: e };
        let raw = match terminated(many0(command), skip)(source) {
            Ok(("", commands)) => RawStage {
                name: None,
                body: source,
                commands,
            },
            Ok((rest, _)) => return Err(syntax(unexpected(source, rest))),
            Err(e) => return Err(syntax(syntax_error(source, e))),
        };
        let stage = build_stage(source, 0, raw)?;
        Ok(Self::new(vec![stage]))
    }

    fn parse_stages(source: &str) -> Result<Self, ScriptError> {
        let mut stages = Vec::new();
        let mut input = source;
        loop {
            let index = stages.len();
            input = match skip(input) {
                Ok((rest, ())) => rest,
                Err(e) => {
                    return Err(ScriptError {
                        stage: index,
                        source: syntax_error(source, e),
                    })
                }
            };
            if input.is_empty() {
                break;
            }
            let (rest, raw) = stage(input).map_err(|e| ScriptError {
                stage: index,
                source: syntax_error(source, e),
            })?;
            stages.push(build_stage(source, index, raw)?);
            input = rest;
        }
        Ok(Self::new(stages))
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Appends the stages of `other` after this script's.
    pub fn extend(&mut self, other: Script) {
        self.stages.extend(other.stages);
    }

    pub fn into_stages(self) -> Vec<Stage> {
        self.stages
    }
}

fn build_stage(source: &str, index: usize, mut raw: RawStage<'_>) -> Result<Stage, ScriptError> {
    for command in &mut raw.commands {
        command.offset = source.len() - command.offset;
    }
    let commands = raw
        .commands
        .iter()
        .map(build_command)
        .collect::<RefactorResult<Vec<_>>>()
        .map_err(|source| ScriptError {
            stage: index,
            source,
        })?;
    Ok(Stage {
        name: raw.name,
        source: raw.body.trim().to_string(),
        commands,
    })
}

// ---- command registry ----

/// Positional and keyword arguments of one command
struct Args<'a> {
    command: &'a str,
    positional: Vec<&'a str>,
    keywords: IndexMap<&'a str, &'a str>,
}

impl<'a> Args<'a> {
    fn new(raw: &'a RawCommand) -> Self {
        let mut positional = Vec::new();
        let mut keywords = IndexMap::new();
        for arg in &raw.args {
            match arg {
                Arg::Bare(text) | Arg::Quoted(text) => positional.push(text.as_str()),
                Arg::Keyword(key, text) => {
                    keywords.insert(key.as_str(), text.as_str());
                }
            }
        }
        Self {
            command: &raw.name,
            positional,
            keywords,
        }
    }

    fn invalid(&self, message: impl Into<String>) -> RefactorError {
        RefactorError::invalid_argument(self.command, message)
    }

    /// Checks arity and keyword names; returns the positional arguments.
    fn expect(&self, min: usize, max: usize, keys: &[&str]) -> RefactorResult<&[&'a str]> {
        let count = self.positional.len();
        if count < min || count > max {
            let wanted = if min == max {
                format!("{min}")
            } else if max == usize::MAX {
                format!("at least {min}")
            } else {
                format!("{min} to {max}")
            };
            return Err(self.invalid(format!("expected {wanted} arguments, found {count}")));
        }
        if let Some(key) = self.keywords.keys().find(|k| !keys.contains(k)) {
            return Err(self.invalid(format!("unknown option `{key}`")));
        }
        Ok(&self.positional)
    }

    fn keyword(&self, key: &str) -> Option<String> {
        self.keywords.get(key).map(|v| v.to_string())
    }
}

fn build_command(raw: &RawCommand) -> RefactorResult<Box<dyn RefactorCommand>> {
    let args = Args::new(raw);
    let command: Box<dyn RefactorCommand> = match raw.name.as_str() {
        "select" => {
            let pos = args.expect(2, 2, &["mark"])?;
            Box::new(Select {
                label: args.keyword("mark").unwrap_or_else(|| pos[0].to_string()),
                query: Query::parse(pos[1])?,
            })
        }
        "copy_marks" => {
            let pos = args.expect(2, 2, &[])?;
            Box::new(CopyMarks {
                from: pos[0].to_string(),
                to: pos[1].to_string(),
            })
        }
        "rename_marks" => {
            let pos = args.expect(2, 2, &[])?;
            Box::new(RenameMarks {
                from: pos[0].to_string(),
                to: pos[1].to_string(),
            })
        }
        "delete_marks" => {
            let pos = args.expect(1, 1, &[])?;
            Box::new(DeleteMarks {
                label: pos[0].to_string(),
            })
        }
        "clear_marks" => {
            args.expect(0, 0, &[])?;
            Box::new(ClearMarks)
        }
        "mark_callers" => {
            let pos = args.expect(1, 1, &[])?;
            Box::new(MarkCallers {
                label: pos[0].to_string(),
            })
        }
        "mark_arg_uses" => {
            let pos = args.expect(2, 2, &[])?;
            let index = pos[0]
                .parse()
                .map_err(|_| args.invalid(format!("`{}` is not an argument index", pos[0])))?;
            Box::new(MarkArgUses {
                index,
                label: pos[1].to_string(),
            })
        }
        "rewrite_expr" => {
            let pos = args.expect(2, 2, &["scope"])?;
            Box::new(Rewrite::expr(pos[0], pos[1], args.keyword("scope"))?)
        }
        "rewrite_ty" => {
            let pos = args.expect(2, 2, &["scope"])?;
            Box::new(Rewrite::ty(pos[0], pos[1], args.keyword("scope"))?)
        }
        "type_fix_rules" => {
            let pos = args.expect(1, usize::MAX, &[])?;
            Box::new(TypeFixRules::parse(pos)?)
        }
        "bytestr_to_str" => {
            let strip_nul = match args.expect(0, 1, &[])? {
                [] => false,
                ["strip_nul"] => true,
                [other] => return Err(args.invalid(format!("unknown flag `{other}`"))),
                _ => false,
            };
            Box::new(BytestrToStr { strip_nul })
        }
        "func_to_macro" => {
            let pos = args.expect(1, 2, &["calls"])?;
            let mut command = FuncToMacro::new(pos[0]);
            command.mac = pos.get(1).map(|m| m.to_string());
            if let Some(label) = args.keyword("calls") {
                command.calls_label = label;
            }
            Box::new(command)
        }
        "static_collect_to_struct" => {
            let pos = args.expect(2, 2, &[])?;
            Box::new(StaticCollectToStruct {
                struct_name: pos[0].to_string(),
                instance_name: pos[1].to_string(),
            })
        }
        "static_to_local_ref" => {
            args.expect(0, 0, &[])?;
            Box::new(StaticToLocalRef)
        }
        "convert_format_string" => {
            args.expect(0, 0, &[])?;
            Box::new(ConvertFormatString)
        }
        "wrapping_arith_to_normal" => {
            args.expect(0, 0, &[])?;
            Box::new(WrappingArithToNormal)
        }
        "struct_assign_to_update" => {
            args.expect(0, 0, &[])?;
            Box::new(StructAssignToUpdate)
        }
        "struct_merge_updates" => {
            args.expect(0, 0, &[])?;
            Box::new(StructMergeUpdates)
        }
        "set_visibility" => {
            let pos = args.expect(1, 1, &[])?;
            Box::new(SetVisibility::parse(pos[0])?)
        }
        "set_mutability" => {
            let pos = args.expect(1, 1, &[])?;
            Box::new(SetMutability::parse(pos[0])?)
        }
        "create_item" => {
            let pos = args.expect(1, 2, &[])?;
            let position = match pos.get(1) {
                Some(p) => p.parse::<InsertPosition>()?,
                None => InsertPosition::default(),
            };
            Box::new(CreateItem::new(pos[0], position)?)
        }
        "delete_items" => {
            args.expect(0, 0, &[])?;
            Box::new(DeleteItems)
        }
        other => {
            return Err(RefactorError::script(
                raw.offset,
                format!("unknown command `{other}`"),
            ))
        }
    };
    Ok(command)
}

// ---- parser ----

type SResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

fn is_ident(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_bare(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, ';' | '{' | '}' | '\'' | '"' | '#')
}

fn comment(input: &str) -> SResult<'_, ()> {
    value((), pair(alt((tag("#"), tag("//"))), not_line_ending))(input)
}

/// Whitespace and comments
fn skip(input: &str) -> SResult<'_, ()> {
    value((), many0(alt((value((), multispace1), comment))))(input)
}

fn ident(input: &str) -> SResult<'_, &str> {
    take_while1(is_ident)(input)
}

fn quoted(input: &str) -> SResult<'_, String> {
    alt((
        delimited(
            char('\''),
            map(opt(is_not("'")), |s: Option<&str>| s.unwrap_or("").to_string()),
            context("closing `'`", cut(char('\''))),
        ),
        delimited(
            char('"'),
            map(
                opt(escaped_transform(
                    is_not("\\\""),
                    '\\',
                    alt((value("\\", tag("\\")), value("\"", tag("\"")))),
                )),
                Option::unwrap_or_default,
            ),
            context("closing `\"`", cut(char('"'))),
        ),
    ))(input)
}

fn bare(input: &str) -> SResult<'_, String> {
    map(take_while1(is_bare), str::to_string)(input)
}

fn argument(input: &str) -> SResult<'_, Arg> {
    preceded(
        skip,
        alt((
            map(
                separated_pair(ident, char('='), alt((quoted, bare))),
                |(key, value)| Arg::Keyword(key.to_string(), value),
            ),
            map(quoted, Arg::Quoted),
            map(bare, Arg::Bare),
        )),
    )(input)
}

/// A command, with its position stored as the remaining input length.
fn command(input: &str) -> SResult<'_, RawCommand> {
    let (input, ()) = skip(input)?;
    let remaining = input.len();
    let (input, name) = context("command name", ident)(input)?;
    let (input, args) = many0(argument)(input)?;
    let (input, _) = opt(preceded(skip, char(';')))(input)?;
    Ok((
        input,
        RawCommand {
            offset: remaining,
            name: name.to_string(),
            args,
        },
    ))
}

fn stage_keyword(input: &str) -> SResult<'_, &str> {
    terminated(tag("stage"), not(peek(satisfy(is_ident))))(input)
}

fn starts_with_stage(source: &str) -> bool {
    preceded(skip, stage_keyword)(source).is_ok()
}

fn stage(input: &str) -> SResult<'_, RawStage<'_>> {
    let (input, _) = stage_keyword(input)?;
    let (input, name) = opt(preceded(skip, ident))(input)?;
    let (input, _) = preceded(skip, context("`{` opening the stage", cut(char('{'))))(input)?;
    let (input, (body, commands)) = consumed(many0(command))(input)?;
    let (input, _) = preceded(skip, context("`}` closing the stage", cut(char('}'))))(input)?;
    Ok((
        input,
        RawStage {
            name: name.map(str::to_string),
            body,
            commands,
        },
    ))
}

fn unexpected(source: &str, rest: &str) -> RefactorError {
    let found = rest.chars().next().map_or("end of script".to_string(), |c| format!("`{c}`"));
    RefactorError::script(source.len() - rest.len(), format!("unexpected {found}"))
}

fn syntax_error(source: &str, err: nom::Err<VerboseError<&str>>) -> RefactorError {
    let errors = match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => e.errors,
        nom::Err::Incomplete(_) => return RefactorError::script(source.len(), "incomplete script"),
    };
    let Some((rest, _)) = errors.first() else {
        return RefactorError::script(0, "invalid script");
    };
    let expected = errors.iter().find_map(|(_, kind)| match kind {
        VerboseErrorKind::Context(what) => Some(*what),
        _ => None,
    });
    match expected {
        Some(what) => RefactorError::script(source.len() - rest.len(), format!("expected {what}")),
        None => unexpected(source, rest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(stage: &Stage) -> Vec<&'static str> {
        stage.commands.iter().map(|c| c.name()).collect()
    }

    #[test]
    fn test_bare_command_list_is_one_stage() {
        let script = Script::parse(
            "select target 'crate; child(static && mut);' ;\n\
             static_collect_to_struct State S\n",
        )
        .unwrap();
        assert_eq!(script.len(), 1);
        assert_eq!(
            names(&script.stages()[0]),
            vec!["select", "static_collect_to_struct"]
        );
    }

    #[test]
    fn test_arith_cleanup_stage() {
        let script = Script::parse(
            "stage arith { wrapping_arith_to_normal ; struct_assign_to_update ; struct_merge_updates }",
        )
        .unwrap();
        assert_eq!(
            names(&script.stages()[0]),
            vec!["wrapping_arith_to_normal", "struct_assign_to_update", "struct_merge_updates"]
        );
    }

    #[test]
    fn test_stages_comments_and_arguments() {
        let script = Script::parse(
            "# retype globals\n\
             stage collect {\n\
                 select target 'crate; child(static && mut);' ; // all of them\n\
                 static_collect_to_struct State S\n\
             }\n\
             stage {\n\
                 rewrite_ty 'marked!(*mut __t)' \"&'static str\" scope=target ;\n\
                 func_to_macro printw print calls=\"my calls\"\n\
             }\n",
        )
        .unwrap();
        assert_eq!(script.len(), 2);
        assert_eq!(script.stages()[0].name.as_deref(), Some("collect"));
        assert_eq!(script.stages()[1].name, None);
        assert_eq!(names(&script.stages()[1]), vec!["rewrite_ty", "func_to_macro"]);
        assert_eq!(
            script.stages()[1].commands[0].description(),
            "rewrite_ty 'marked!(*mut __t)' '&'static str' scope=target"
        );
        assert_eq!(
            script.stages()[1].commands[1].description(),
            "func_to_macro printw print calls=my calls"
        );
    }

    #[test]
    fn test_select_mark_option_and_multiline_rules() {
        let script = Script::parse(
            "select user 'crate; desc(fn && !name(\"main\"));' mark='user' ;\n\
             type_fix_rules\n\
                 '*, &str, *const __t => __old.as_ptr()'\n\
                 '*, &str, *mut __t => __old.as_ptr() as *mut __t' ;\n\
             set_visibility '' ;\n\
             create_item 'mod ncurses {}' after",
        )
        .unwrap();
        assert_eq!(
            names(&script.stages()[0]),
            vec!["select", "type_fix_rules", "set_visibility", "create_item"]
        );
    }

    #[test]
    fn test_query_error_names_stage() {
        let err = Script::parse("stage a { clear_marks }\nstage b { select t 'crate; wander' }")
            .unwrap_err();
        assert_eq!(err.stage, 1);
        assert!(matches!(err.source, RefactorError::Query { offset: 7, .. }));
    }

    #[test]
    fn test_syntax_errors_carry_offsets() {
        let err = Script::parse("stage a { clear_marks ").unwrap_err();
        assert_eq!(err.stage, 0);
        assert!(matches!(err.source, RefactorError::Script { offset: 22, .. }));

        let err = Script::parse("select t 'crate").unwrap_err();
        assert!(matches!(err.source, RefactorError::Script { .. }));

        let err = Script::parse("clear_marks ;\nfrobnicate x").unwrap_err();
        assert!(matches!(err.source, RefactorError::Script { offset: 14, .. }));
    }

    #[test]
    fn test_argument_checks() {
        for bad in [
            "copy_marks a",
            "mark_arg_uses x calls",
            "bytestr_to_str keep",
            "rewrite_expr 'a' 'b' scop=x",
            "set_mutability const",
            "create_item 'fn f() {}' below",
            "type_fix_rules",
            "struct_merge_updates all",
        ] {
            let err = Script::parse(bad).unwrap_err();
            assert!(
                matches!(err.source, RefactorError::InvalidArgument { .. }),
                "{bad}: {err}"
            );
        }
        let err = Script::parse("rewrite_expr '1 +' 'x'").unwrap_err();
        assert!(matches!(err.source, RefactorError::Template(_)));
    }

    #[test]
    fn test_empty_script_is_one_empty_stage() {
        let script = Script::parse("  # nothing\n").unwrap();
        assert_eq!(script.len(), 1);
        assert!(script.stages()[0].commands.is_empty());
    }
}
