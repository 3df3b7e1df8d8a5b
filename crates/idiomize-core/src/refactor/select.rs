/*!
# Select Language

Queries are `;`-separated operations over a current selection:

```text
query  = op { ";" op } [ ";" ] ;
op     = "crate" | "item" "(" path ")" | "marked" "(" label ")"
       | "mark" "(" label ")" | "unmark" "(" label ")"
       | "child" "(" filter ")" | "desc" "(" filter ")" | "filter" "(" filter ")"
       | "parent" | "first" | "last" | "reset" ;
filter = conj { "||" conj } ;
conj   = unary { "&&" unary } ;
unary  = "!" unary | "(" filter ")" | atom ;
atom   = kind | "mut" | "pub" | "any" | "name" "(" string ")" | "path" "(" path ")"
       | "marked" "(" label ")" | "match_expr" "(" fragment ")" | "match_ty" "(" fragment ")"
       | "any_child" "(" filter ")" | "any_desc" "(" filter ")" | "descendant_of" "(" filter ")" ;
```

Queries are parsed once, when the rule script is read; evaluation never fails.
*/

use std::fmt;

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag, take_while1},
    character::complete::{char, multispace0},
    combinator::{all_consuming, cut, map, map_res, opt, value},
    error::{ErrorKind, FromExternalError, ParseError as NomParseError},
    multi::{many0, separated_list1},
    sequence::{delimited, preceded, terminated},
};
use regex::Regex;

use crate::ast::{Category, Expr, Item, ItemKind, Mutability, NodeId, NodeKind, Stmt, Tree, Ty, Visibility};

use super::marks::{MarkStore, Selection};
use super::patterns::{Matcher, Pattern};
use super::{RefactorError, RefactorResult};

/// Node kinds a filter can name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindFilter {
    Crate,
    Item,
    Fn,
    ForeignFn,
    Static,
    ForeignStatic,
    Const,
    Struct,
    TypeAlias,
    Mod,
    ForeignMod,
    Macro,
    Use,
    Stmt,
    Let,
    Expr,
    Ty,
    Call,
    Cast,
    Lit,
    PathExpr,
}

impl KindFilter {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "crate" => Self::Crate,
            "item" => Self::Item,
            "fn" => Self::Fn,
            "foreign_fn" => Self::ForeignFn,
            "static" => Self::Static,
            "foreign_static" => Self::ForeignStatic,
            "const" => Self::Const,
            "struct" => Self::Struct,
            "type_alias" => Self::TypeAlias,
            "mod" => Self::Mod,
            "foreign_mod" => Self::ForeignMod,
            "macro" => Self::Macro,
            "use" => Self::Use,
            "stmt" => Self::Stmt,
            "let" => Self::Let,
            "expr" => Self::Expr,
            "ty" => Self::Ty,
            "call" => Self::Call,
            "cast" => Self::Cast,
            "lit" => Self::Lit,
            "path_expr" => Self::PathExpr,
            _ => return None,
        })
    }

    fn matches(self, tree: &Tree, id: NodeId) -> bool {
        let Some(node) = tree.get(id) else {
            return false;
        };
        let in_foreign_mod = || {
            tree.parent(id)
                .and_then(|p| tree.item(p))
                .is_some_and(|p| matches!(p.kind, ItemKind::ForeignMod { .. }))
        };
        match (self, node) {
            (Self::Crate, NodeKind::Crate(_)) => true,
            (Self::Item, NodeKind::Item(_)) => true,
            (Self::Fn, NodeKind::Item(Item { kind: ItemKind::Fn { .. }, .. })) => !in_foreign_mod(),
            (Self::ForeignFn, NodeKind::Item(Item { kind: ItemKind::Fn { .. }, .. })) => in_foreign_mod(),
            (Self::Static, NodeKind::Item(Item { kind: ItemKind::Static { .. }, .. })) => !in_foreign_mod(),
            (Self::ForeignStatic, NodeKind::Item(Item { kind: ItemKind::Static { .. }, .. })) => {
                in_foreign_mod()
            }
            (Self::Const, NodeKind::Item(Item { kind: ItemKind::Const { .. }, .. })) => true,
            (Self::Struct, NodeKind::Item(Item { kind: ItemKind::Struct { .. }, .. })) => true,
            (Self::TypeAlias, NodeKind::Item(Item { kind: ItemKind::TypeAlias { .. }, .. })) => true,
            (Self::Mod, NodeKind::Item(Item { kind: ItemKind::Mod { .. }, .. })) => true,
            (Self::ForeignMod, NodeKind::Item(Item { kind: ItemKind::ForeignMod { .. }, .. })) => true,
            (Self::Macro, NodeKind::Item(Item { kind: ItemKind::MacroRules { .. }, .. })) => true,
            (Self::Use, NodeKind::Item(Item { kind: ItemKind::Use { .. }, .. })) => true,
            (Self::Stmt, NodeKind::Stmt(_)) => true,
            (Self::Let, NodeKind::Stmt(Stmt::Let { .. })) => true,
            (Self::Expr, NodeKind::Expr(_)) => true,
            (Self::Ty, NodeKind::Ty(_)) => true,
            (Self::Call, NodeKind::Expr(Expr::Call { .. })) => true,
            (Self::Cast, NodeKind::Expr(Expr::Cast { .. })) => true,
            (Self::Lit, NodeKind::Expr(Expr::Lit(_))) => true,
            (Self::PathExpr, NodeKind::Expr(Expr::Path(_))) => true,
            _ => false,
        }
    }
}

/// Boolean node predicate
#[derive(Debug, Clone)]
pub enum Filter {
    Any,
    Kind(KindFilter),
    Mut,
    Pub,
    Name(Regex),
    Path(Vec<String>),
    Marked(String),
    MatchExpr(Box<Pattern>),
    MatchTy(Box<Pattern>),
    AnyChild(Box<Filter>),
    AnyDesc(Box<Filter>),
    DescendantOf(Box<Filter>),
    Not(Box<Filter>),
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
}

/// Module path of an item: enclosing module names plus its own name.
pub fn item_path(tree: &Tree, id: NodeId) -> Vec<String> {
    let mut path: Vec<String> = tree
        .ancestors(id)
        .into_iter()
        .filter_map(|a| match tree.item(a) {
            Some(Item {
                kind: ItemKind::Mod { .. },
                name,
                ..
            }) => Some(name.clone()),
            _ => None,
        })
        .collect();
    path.reverse();
    if let Some(item) = tree.item(id) {
        path.push(item.name.clone());
    }
    path
}

impl Filter {
    pub fn eval(&self, tree: &Tree, marks: &MarkStore, id: NodeId) -> bool {
        let Some(node) = tree.get(id) else {
            return false;
        };
        match self {
            Filter::Any => true,
            Filter::Kind(kind) => kind.matches(tree, id),
            Filter::Mut => match node {
                NodeKind::Item(Item {
                    kind: ItemKind::Static { mutability, .. },
                    ..
                })
                | NodeKind::Stmt(Stmt::Let { mutability, .. })
                | NodeKind::Expr(Expr::AddrOf { mutability, .. })
                | NodeKind::Ty(Ty::Ptr { mutability, .. } | Ty::Ref { mutability, .. }) => {
                    *mutability == Mutability::Mut
                }
                _ => false,
            },
            Filter::Pub => matches!(node, NodeKind::Item(item) if item.vis != Visibility::Inherited),
            Filter::Name(re) => node.name().is_some_and(|name| re.is_match(name)),
            Filter::Path(segments) => {
                matches!(node, NodeKind::Item(_)) && item_path(tree, id) == *segments
            }
            Filter::Marked(label) => marks.has(id, label),
            Filter::MatchExpr(pattern) | Filter::MatchTy(pattern) => {
                node.category() == pattern.category() && Matcher::new(tree, marks).matches(pattern, id)
            }
            Filter::AnyChild(inner) => tree.children(id).into_iter().any(|c| inner.eval(tree, marks, c)),
            Filter::AnyDesc(inner) => tree.descendants(id).into_iter().any(|c| inner.eval(tree, marks, c)),
            Filter::DescendantOf(inner) => tree.ancestors(id).into_iter().any(|a| inner.eval(tree, marks, a)),
            Filter::Not(inner) => !inner.eval(tree, marks, id),
            Filter::And(a, b) => a.eval(tree, marks, id) && b.eval(tree, marks, id),
            Filter::Or(a, b) => a.eval(tree, marks, id) || b.eval(tree, marks, id),
        }
    }
}

/// One query operation
#[derive(Debug, Clone)]
pub enum QueryOp {
    Crate,
    Item(Vec<String>),
    Marked(String),
    Mark(String),
    Unmark(String),
    Child(Filter),
    Desc(Filter),
    Filter(Filter),
    Parent,
    First,
    Last,
    Reset,
}

/// A parsed select query
#[derive(Debug, Clone)]
pub struct Query {
    source: String,
    ops: Vec<QueryOp>,
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Query {
    pub fn parse(source: &str) -> RefactorResult<Self> {
        match all_consuming(query)(source) {
            Ok((_, ops)) => Ok(Self {
                source: source.to_string(),
                ops,
            }),
            Err(nom::Err::Error(e) | nom::Err::Failure(e)) => {
                Err(RefactorError::query(source.len() - e.input.len(), e.message))
            }
            Err(nom::Err::Incomplete(_)) => {
                Err(RefactorError::query(source.len(), "incomplete query"))
            }
        }
    }

    pub fn ops(&self) -> &[QueryOp] {
        &self.ops
    }

    /// Runs the query from an empty selection. `mark`/`unmark` update `marks`.
    pub fn run(&self, tree: &Tree, marks: &mut MarkStore) -> Selection {
        let mut selection = Selection::new();
        for op in &self.ops {
            selection = match op {
                QueryOp::Crate => Selection::from_ids(tree, [tree.root()]),
                QueryOp::Item(path) => Selection::from_ids(tree, tree.lookup_item_path(tree.root(), path)),
                QueryOp::Marked(label) => marks.marked(tree, label),
                QueryOp::Mark(label) => {
                    marks.mark(selection.iter(), label);
                    selection
                }
                QueryOp::Unmark(label) => {
                    marks.unmark(selection.iter(), label);
                    selection
                }
                QueryOp::Child(filter) => Selection::from_ids(
                    tree,
                    selection
                        .iter()
                        .flat_map(|id| tree.children(id))
                        .filter(|c| filter.eval(tree, &*marks, *c))
                        .collect::<Vec<_>>(),
                ),
                QueryOp::Desc(filter) => Selection::from_ids(
                    tree,
                    selection
                        .iter()
                        .flat_map(|id| tree.descendants(id))
                        .filter(|c| filter.eval(tree, &*marks, *c))
                        .collect::<Vec<_>>(),
                ),
                QueryOp::Filter(filter) => Selection::from_ids(
                    tree,
                    selection
                        .iter()
                        .filter(|id| filter.eval(tree, &*marks, *id))
                        .collect::<Vec<_>>(),
                ),
                QueryOp::Parent => Selection::from_ids(
                    tree,
                    selection.iter().filter_map(|id| tree.parent(id)).collect::<Vec<_>>(),
                ),
                QueryOp::First => Selection::from_ids(tree, selection.first()),
                QueryOp::Last => Selection::from_ids(tree, selection.last()),
                QueryOp::Reset => Selection::new(),
            };
        }
        selection
    }
}

// ---- parser ----

/// nom error carrying a readable message
#[derive(Debug)]
struct QueryError<'a> {
    input: &'a str,
    message: String,
}

impl<'a> NomParseError<&'a str> for QueryError<'a> {
    fn from_error_kind(input: &'a str, kind: ErrorKind) -> Self {
        let message = match input.chars().next() {
            Some(c) => format!("unexpected `{c}` ({})", kind.description()),
            None => format!("unexpected end of query ({})", kind.description()),
        };
        Self { input, message }
    }

    fn append(_input: &'a str, _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

impl<'a, E: fmt::Display> FromExternalError<&'a str, E> for QueryError<'a> {
    fn from_external_error(input: &'a str, _kind: ErrorKind, e: E) -> Self {
        Self {
            input,
            message: e.to_string(),
        }
    }
}

type QResult<'a, T> = IResult<&'a str, T, QueryError<'a>>;

fn fail<'a, T>(input: &'a str, message: String) -> QResult<'a, T> {
    Err(nom::Err::Failure(QueryError { input, message }))
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> QResult<'a, O>
where
    F: FnMut(&'a str) -> QResult<'a, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn word(input: &str) -> QResult<'_, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_')(input)
}

fn label(input: &str) -> QResult<'_, String> {
    map(ws(word), str::to_string)(input)
}

fn path(input: &str) -> QResult<'_, Vec<String>> {
    ws(preceded(
        opt(tag("::")),
        separated_list1(tag("::"), map(word, str::to_string)),
    ))(input)
}

/// Raw text up to the `)` that closes the current argument.
fn fragment(input: &str) -> QResult<'_, &str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in input.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '(' | '[' | '{' => depth += 1,
            ')' if depth == 0 => return Ok((&input[i..], input[..i].trim())),
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    fail(input, "unterminated argument".to_string())
}

fn string_lit(input: &str) -> QResult<'_, String> {
    ws(alt((
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
            char('"'),
        ),
        delimited(
            char('\''),
            map(opt(is_not("'")), |s: Option<&str>| s.unwrap_or("").to_string()),
            char('\''),
        ),
    )))(input)
}

/// `name(args)` where the argument parser is committed to once `name(` is seen.
fn call<'a, O, F>(name: &'static str, arg: F) -> impl FnMut(&'a str) -> QResult<'a, O>
where
    F: FnMut(&'a str) -> QResult<'a, O>,
{
    preceded(
        terminated(ws(tag(name)), char('(')),
        cut(terminated(arg, ws(char(')')))),
    )
}

fn anchored_regex(input: &str) -> QResult<'_, Regex> {
    map_res(string_lit, |re| Regex::new(&format!("^(?:{re})$")))(input)
}

fn expr_pattern(input: &str) -> QResult<'_, Filter> {
    map_res(fragment, |src| {
        Pattern::parse(src, Category::Expr).map(|p| Filter::MatchExpr(Box::new(p)))
    })(input)
}

fn ty_pattern(input: &str) -> QResult<'_, Filter> {
    map_res(fragment, |src| {
        Pattern::parse(src, Category::Ty).map(|p| Filter::MatchTy(Box::new(p)))
    })(input)
}

fn atom(input: &str) -> QResult<'_, Filter> {
    let (rest, _) = multispace0(input)?;
    let parsed = alt((
        call("name", map(anchored_regex, Filter::Name)),
        call("path", map(path, Filter::Path)),
        call("marked", map(label, Filter::Marked)),
        call("match_expr", expr_pattern),
        call("match_ty", ty_pattern),
        call("any_child", map(filter, |f| Filter::AnyChild(Box::new(f)))),
        call("any_desc", map(filter, |f| Filter::AnyDesc(Box::new(f)))),
        call("descendant_of", map(filter, |f| Filter::DescendantOf(Box::new(f)))),
    ))(rest);
    match parsed {
        Ok(done) => return Ok(done),
        Err(nom::Err::Error(_)) => {}
        Err(e) => return Err(e),
    }
    let (after, name) = word(rest)?;
    let filter = match name {
        "any" => Filter::Any,
        "mut" => Filter::Mut,
        "pub" => Filter::Pub,
        _ => match KindFilter::from_name(name) {
            Some(kind) => Filter::Kind(kind),
            None => return fail(rest, format!("unknown filter `{name}`")),
        },
    };
    let (after, _) = multispace0(after)?;
    Ok((after, filter))
}

fn unary(input: &str) -> QResult<'_, Filter> {
    alt((
        map(preceded(ws(char('!')), cut(unary)), |f| Filter::Not(Box::new(f))),
        delimited(ws(char('(')), cut(filter), cut(ws(char(')')))),
        atom,
    ))(input)
}

fn conjunction(input: &str) -> QResult<'_, Filter> {
    let (input, first) = unary(input)?;
    let (input, rest) = many0(preceded(ws(tag("&&")), cut(unary)))(input)?;
    let combined = rest
        .into_iter()
        .fold(first, |acc, f| Filter::And(Box::new(acc), Box::new(f)));
    Ok((input, combined))
}

fn filter(input: &str) -> QResult<'_, Filter> {
    let (input, first) = conjunction(input)?;
    let (input, rest) = many0(preceded(ws(tag("||")), cut(conjunction)))(input)?;
    let combined = rest
        .into_iter()
        .fold(first, |acc, f| Filter::Or(Box::new(acc), Box::new(f)));
    Ok((input, combined))
}

fn op_call(input: &str) -> QResult<'_, QueryOp> {
    alt((
        call("item", map(path, QueryOp::Item)),
        call("marked", map(label, QueryOp::Marked)),
        call("mark", map(label, QueryOp::Mark)),
        call("unmark", map(label, QueryOp::Unmark)),
        call("child", map(filter, QueryOp::Child)),
        call("desc", map(filter, QueryOp::Desc)),
        call("filter", map(filter, QueryOp::Filter)),
    ))(input)
}

fn bare_op(input: &str) -> QResult<'_, QueryOp> {
    let (rest, name) = ws(word)(input)?;
    let op = match name {
        "crate" => QueryOp::Crate,
        "parent" => QueryOp::Parent,
        "first" => QueryOp::First,
        "last" => QueryOp::Last,
        "reset" => QueryOp::Reset,
        _ => return fail(input.trim_start(), format!("unknown query operation `{name}`")),
    };
    Ok((rest, op))
}

fn query(input: &str) -> QResult<'_, Vec<QueryOp>> {
    terminated(
        separated_list1(ws(char(';')), alt((op_call, bare_op))),
        opt(ws(char(';'))),
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_crate;

    const SRC: &str = "static mut A: i32 = 0;\n\
                       static B: u8 = 1;\n\
                       pub fn main() {\n    let mut x = A as u8;\n    f(x);\n}\n\
                       fn f(v: u8) {}\n\
                       mod m {\n    pub fn g() {}\n}\n\
                       extern \"C\" {\n    fn puts(s: *const i8) -> i32;\n}\n";

    fn select(tree: &Tree, marks: &mut MarkStore, query: &str) -> Vec<String> {
        let query = Query::parse(query).unwrap();
        query
            .run(tree, marks)
            .iter()
            .map(|id| match tree.get(id).and_then(NodeKind::name) {
                Some(name) => name.to_string(),
                None => tree.source_of(id),
            })
            .collect()
    }

    #[test]
    fn test_kind_and_mut_filters() {
        let tree = parse_crate(SRC).unwrap();
        let mut marks = MarkStore::new();
        assert_eq!(select(&tree, &mut marks, "crate; child(static && mut)"), vec!["A"]);
        assert_eq!(select(&tree, &mut marks, "crate; desc(fn)"), vec!["main", "f", "g"]);
        assert_eq!(select(&tree, &mut marks, "crate; desc(foreign_fn)"), vec!["puts"]);
        assert_eq!(select(&tree, &mut marks, "crate; desc(let && mut)"), vec!["x"]);
    }

    #[test]
    fn test_name_path_and_item() {
        let tree = parse_crate(SRC).unwrap();
        let mut marks = MarkStore::new();
        assert_eq!(select(&tree, &mut marks, "crate; desc(name(\"[fg]\"))"), vec!["f", "g"]);
        assert_eq!(select(&tree, &mut marks, "crate; desc(name('ma'))"), Vec::<String>::new());
        assert_eq!(select(&tree, &mut marks, "crate; desc(path(m::g))"), vec!["g"]);
        assert_eq!(select(&tree, &mut marks, "item(m::g)"), vec!["g"]);
        assert_eq!(select(&tree, &mut marks, "crate; desc(pub && fn)"), vec!["main", "g"]);
    }

    #[test]
    fn test_match_and_structural_filters() {
        let tree = parse_crate(SRC).unwrap();
        let mut marks = MarkStore::new();
        assert_eq!(
            select(&tree, &mut marks, "crate; desc(match_expr(__e as u8))"),
            vec!["A as u8"]
        );
        assert_eq!(
            select(&tree, &mut marks, "crate; desc(fn && any_desc(call))"),
            vec!["main"]
        );
        assert_eq!(
            select(&tree, &mut marks, "crate; desc(path_expr && descendant_of(name(\"main\")) && !any_child(any))"),
            vec!["A", "f", "x"]
        );
        assert_eq!(
            select(&tree, &mut marks, "crate; desc(match_ty(*const __t))"),
            vec!["*const i8"]
        );
    }

    #[test]
    fn test_mark_and_selection_ops() {
        let tree = parse_crate(SRC).unwrap();
        let mut marks = MarkStore::new();
        select(&tree, &mut marks, "crate; desc(fn || foreign_fn); mark(funcs); first; mark(head)");
        assert_eq!(marks.marked(&tree, "funcs").len(), 4);
        assert_eq!(select(&tree, &mut marks, "marked(head)"), vec!["main"]);

        let query = Query::parse("marked(funcs); last; parent; filter(foreign_mod)").unwrap();
        assert_eq!(query.run(&tree, &mut marks).len(), 1);

        assert_eq!(
            select(&tree, &mut marks, "crate; desc(marked(funcs) && !foreign_fn); unmark(funcs); reset"),
            Vec::<String>::new()
        );
        assert_eq!(select(&tree, &mut marks, "marked(funcs)"), vec!["puts"]);
    }

    #[test]
    fn test_parse_errors_have_offsets() {
        let err = Query::parse("crate; desc(bogus)").unwrap_err();
        assert!(matches!(err, RefactorError::Query { offset: 12, .. }), "{err}");

        let err = Query::parse("crate; wander").unwrap_err();
        assert!(matches!(err, RefactorError::Query { offset: 7, .. }), "{err}");

        let err = Query::parse("crate; desc(name(\"(\"))").unwrap_err();
        assert!(matches!(err, RefactorError::Query { .. }));

        assert!(Query::parse("crate;").is_ok());
        assert!(Query::parse("").is_err());
    }
}
