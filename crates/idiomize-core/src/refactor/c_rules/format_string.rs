/*!
# printf-style Format Strings

`convert_format_string` rewrites the C format string of a call into a Rust
format string and adjusts the arguments that need it. The format string is
the call argument marked `target`, or, for a call that is itself marked, its
first argument that is a string literal once casts and parentheses are
stripped. `func_to_macro` usually follows and turns the call into a
formatting macro.

| C | Rust |
|---|------|
| `%d %i %u %ld` | `{}` |
| `%x %X %o` | `{:x} {:X} {:o}` |
| `%5d %-5d %05d` | `{:5} {:<5} {:05}` |
| `%.2f` | `{:.2}` |
| `%c` | `{}`, argument cast through `u8` to `char` |
| `%s` | `{}`, argument read as a C string |
| `%%` | `%` |
*/

use std::collections::HashSet;
use std::fmt::Write as _;
use std::string::FromUtf8Error;

use tracing::{debug, warn};

use crate::ast::{Expr, Lit, NodeId, Tree};
use crate::refactor::marks::DEFAULT_LABEL;
use crate::refactor::patterns::{replace_with_template, Bindings, Pattern};
use crate::refactor::{RefactorCommand, RefactorCtx, RefactorError, RefactorResult};

const CHAR_TEMPLATE: &str = "__e as u8 as char";
const CSTR_TEMPLATE: &str =
    "std::ffi::CStr::from_ptr(__e as *const libc::c_char).to_str().unwrap()";

/// How an argument must be adapted for its conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Plain,
    Char,
    CStr,
}

/// A converted format string and the kinds of the arguments it consumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RustFormat {
    pub text: String,
    pub args: Vec<ArgKind>,
}

/// Converts a C format string. The string ends at the first NUL.
pub fn convert_format(c_fmt: &str) -> Result<RustFormat, String> {
    let c_fmt = c_fmt.split('\0').next().unwrap_or("");
    let mut text = String::new();
    let mut args = Vec::new();
    let mut chars = c_fmt.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '%' => {}
            '{' => {
                text.push_str("{{");
                continue;
            }
            '}' => {
                text.push_str("}}");
                continue;
            }
            c => {
                text.push(c);
                continue;
            }
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            text.push('%');
            continue;
        }

        let mut left = false;
        let mut zero = false;
        let mut plus = false;
        let mut alternate = false;
        while let Some(flag) = chars.peek().copied() {
            match flag {
                '-' => left = true,
                '0' => zero = true,
                '+' => plus = true,
                '#' => alternate = true,
                ' ' => return Err("the ' ' flag has no Rust equivalent".to_string()),
                _ => break,
            }
            chars.next();
        }
        let mut width = String::new();
        while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
            width.push(d);
            chars.next();
        }
        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                digits.push(d);
                chars.next();
            }
            precision = Some(if digits.is_empty() { "0".to_string() } else { digits });
        }
        if chars.peek() == Some(&'*') {
            return Err("`*` width or precision is not supported".to_string());
        }
        while chars
            .peek()
            .is_some_and(|m| matches!(m, 'h' | 'l' | 'L' | 'q' | 'j' | 'z' | 't'))
        {
            chars.next();
        }

        let conversion = chars
            .next()
            .ok_or_else(|| "format string ends inside a conversion".to_string())?;
        let (ty, kind) = match conversion {
            'd' | 'i' | 'u' => ("", ArgKind::Plain),
            'x' => ("x", ArgKind::Plain),
            'X' => ("X", ArgKind::Plain),
            'o' => ("o", ArgKind::Plain),
            'e' => ("e", ArgKind::Plain),
            'E' => ("E", ArgKind::Plain),
            'p' => ("p", ArgKind::Plain),
            'f' | 'F' => {
                precision.get_or_insert_with(|| "6".to_string());
                ("", ArgKind::Plain)
            }
            'c' => ("", ArgKind::Char),
            's' => ("", ArgKind::CStr),
            other => return Err(format!("unsupported conversion `%{other}`")),
        };

        let mut spec = String::new();
        if left {
            spec.push('<');
        }
        if plus {
            spec.push('+');
        }
        if alternate {
            spec.push('#');
        }
        if zero && !left {
            spec.push('0');
        }
        spec.push_str(&width);
        if let Some(precision) = precision {
            let _ = write!(spec, ".{precision}");
        }
        spec.push_str(ty);
        if spec.is_empty() {
            text.push_str("{}");
        } else {
            let _ = write!(text, "{{:{spec}}}");
        }
        args.push(kind);
    }
    Ok(RustFormat { text, args })
}

fn strip_casts(tree: &Tree, mut id: NodeId) -> NodeId {
    while let Some(Expr::Cast { expr: inner, .. } | Expr::Paren(inner)) = tree.expr(id) {
        id = *inner;
    }
    id
}

/// Text of a string or byte-string literal, looking through casts.
fn literal_text(tree: &Tree, id: NodeId) -> Option<Result<String, FromUtf8Error>> {
    match tree.expr(strip_casts(tree, id))? {
        Expr::Lit(Lit::Str(s)) => Some(Ok(s.clone())),
        Expr::Lit(Lit::ByteStr(bytes)) => Some(String::from_utf8(bytes.clone())),
        _ => None,
    }
}

/// `convert_format_string`
#[derive(Debug, Default)]
pub struct ConvertFormatString;

impl ConvertFormatString {
    /// Calls to convert, with the index of their format argument.
    fn targets(&self, ctx: &RefactorCtx) -> Vec<(NodeId, Vec<NodeId>, Option<usize>)> {
        let tree = &ctx.tree;
        tree.preorder(tree.root())
            .into_iter()
            .filter_map(|call| {
                let Some(Expr::Call { args, .. }) = tree.expr(call) else {
                    return None;
                };
                let index = match args.iter().position(|a| ctx.marks.has(*a, DEFAULT_LABEL)) {
                    Some(index) => Some(index),
                    None if ctx.marks.has(call, DEFAULT_LABEL) => {
                        args.iter().position(|a| literal_text(tree, *a).is_some())
                    }
                    None => return None,
                };
                Some((call, args.clone(), index))
            })
            .collect()
    }
}

impl RefactorCommand for ConvertFormatString {
    fn name(&self) -> &'static str {
        "convert_format_string"
    }

    fn description(&self) -> String {
        self.name().to_string()
    }

    fn apply(&self, ctx: &mut RefactorCtx) -> RefactorResult<()> {
        let char_template = Pattern::expr(CHAR_TEMPLATE)?;
        let cstr_template = Pattern::expr(CSTR_TEMPLATE)?;
        let mut converted = 0;

        for (call, args, index) in self.targets(ctx) {
            if !ctx.tree.is_attached(call) {
                continue;
            }
            let Some(index) = index else {
                warn!(call = %call, "marked call has no literal format string; skipping");
                continue;
            };
            let fmt_arg = args[index];
            let text = match literal_text(&ctx.tree, fmt_arg) {
                Some(Ok(text)) => text,
                Some(Err(_)) => {
                    return Err(RefactorError::conflict(format!(
                        "format string of call {call} is not valid UTF-8"
                    )));
                }
                None => {
                    warn!(call = %call, arg = %fmt_arg, "format argument is not a literal; skipping");
                    continue;
                }
            };
            let format = convert_format(&text)
                .map_err(|msg| RefactorError::conflict(format!("call {call}: {msg}")))?;
            let rest = &args[index + 1..];
            if rest.len() != format.args.len() {
                return Err(RefactorError::conflict(format!(
                    "call {call}: format string takes {} arguments but {} are given",
                    format.args.len(),
                    rest.len()
                )));
            }

            let lit = ctx.tree.alloc_expr(Expr::Lit(Lit::Str(format.text)));
            ctx.tree.replace(fmt_arg, lit)?;
            ctx.tree.retire(fmt_arg, &HashSet::new());
            for (arg, kind) in rest.iter().zip(format.args) {
                let template = match kind {
                    ArgKind::Plain => continue,
                    ArgKind::Char => &char_template,
                    ArgKind::CStr => &cstr_template,
                };
                let mut bindings = Bindings::new();
                bindings.insert("__e".to_string(), *arg);
                replace_with_template(&mut ctx.tree, *arg, template, &bindings)?;
            }
            converted += 1;
        }
        debug!(converted, "converted format strings");
        ctx.stats.rewrites += converted;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ast::ToSource;
    use crate::parser::parse_crate;

    fn text(c_fmt: &str) -> String {
        convert_format(c_fmt).unwrap().text
    }

    #[test]
    fn test_conversions() {
        assert_eq!(text("%d %i %u %ld\n\0"), "{} {} {} {}\n");
        assert_eq!(text("%x %X %o %#x"), "{:x} {:X} {:o} {:#x}");
        assert_eq!(text("[%5d|%-5d|%05d]"), "[{:5}|{:<5}|{:05}]");
        assert_eq!(text("%.2f %f"), "{:.2} {:.6}");
        assert_eq!(text("100%% {x}"), "100% {{x}}");
    }

    #[test]
    fn test_argument_kinds() {
        let format = convert_format("%c%s%d").unwrap();
        assert_eq!(format.args, vec![ArgKind::Char, ArgKind::CStr, ArgKind::Plain]);
    }

    #[test]
    fn test_unsupported_conversions() {
        assert!(convert_format("%n").is_err());
        assert!(convert_format("%*d").is_err());
        assert!(convert_format("% d").is_err());
        assert!(convert_format("%").is_err());
    }

    #[test]
    fn test_marked_format_argument() {
        let mut ctx = RefactorCtx::new(
            parse_crate(
                "fn main() {\n    printw(b\"%c=%d\\n\\0\" as *const u8 as *const i8, c, n);\n}\n",
            )
            .unwrap(),
        );
        let fmt = ctx
            .tree
            .preorder(ctx.tree.root())
            .into_iter()
            .find(|id| matches!(ctx.tree.expr(*id), Some(Expr::Cast { .. })))
            .unwrap();
        ctx.marks.mark_one(fmt, DEFAULT_LABEL);

        ConvertFormatString.apply(&mut ctx).unwrap();
        assert_eq!(
            ctx.tree.to_source(),
            "fn main() {\n    printw(\"{}={}\\n\", c as u8 as char, n);\n}\n"
        );
        assert_eq!(ctx.stats.rewrites, 1);
    }

    #[test]
    fn test_marked_call_with_string_argument() {
        let mut ctx =
            RefactorCtx::new(parse_crate("fn main() {\n    mvprintw(1, 2, b\"%s\\0\", s);\n}\n").unwrap());
        let call = ctx
            .tree
            .preorder(ctx.tree.root())
            .into_iter()
            .find(|id| matches!(ctx.tree.expr(*id), Some(Expr::Call { .. })))
            .unwrap();
        ctx.marks.mark_one(call, DEFAULT_LABEL);

        ConvertFormatString.apply(&mut ctx).unwrap();
        assert_eq!(
            ctx.tree.to_source(),
            "fn main() {\n    mvprintw(1, 2, \"{}\", \
             std::ffi::CStr::from_ptr(s as *const libc::c_char).to_str().unwrap());\n}\n"
        );
    }

    #[test]
    fn test_argument_count_mismatch_is_a_conflict() {
        let mut ctx = RefactorCtx::new(parse_crate("fn main() {\n    printf(\"%d %d\", 1);\n}\n").unwrap());
        let call = ctx
            .tree
            .preorder(ctx.tree.root())
            .into_iter()
            .find(|id| matches!(ctx.tree.expr(*id), Some(Expr::Call { .. })))
            .unwrap();
        ctx.marks.mark_one(call, DEFAULT_LABEL);
        let err = ConvertFormatString.apply(&mut ctx).unwrap_err();
        assert!(matches!(err, RefactorError::RewriteConflict { .. }));
    }
}
