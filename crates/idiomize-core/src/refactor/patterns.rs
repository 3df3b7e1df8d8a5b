/*!
# Pattern Matching and Template Instantiation

Patterns and templates are ordinary source fragments parsed into their own
small tree. Single-segment paths starting with `__` are holes. Two
pseudo-macros extend patterns:

- `marked!(P)` / `marked!(P, label)`: `P` matches and the node carries the
  mark (default `target`)
- `def!(name)` / `def!(name, label)`: a path expression that resolves to a
  definition called `name`, optionally carrying the mark
*/

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::ast::{Category, Def, Expr, Lit, NodeId, NodeKind, Path, Stmt, Tree, Ty};
use crate::parser::{parse_expr_fragment, parse_ty_fragment, ParseError};

use super::marks::{MarkStore, DEFAULT_LABEL};
use super::{RefactorError, RefactorResult};

/// Hole name to bound node, in binding order
pub type Bindings = IndexMap<String, NodeId>;

/// A parsed pattern or template fragment
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    tree: Tree,
    category: Category,
}

impl Pattern {
    pub fn expr(source: &str) -> Result<Self, ParseError> {
        Ok(Self {
            source: source.to_string(),
            tree: parse_expr_fragment(source)?,
            category: Category::Expr,
        })
    }

    pub fn ty(source: &str) -> Result<Self, ParseError> {
        Ok(Self {
            source: source.to_string(),
            tree: parse_ty_fragment(source)?,
            category: Category::Ty,
        })
    }

    pub fn parse(source: &str, category: Category) -> Result<Self, ParseError> {
        match category {
            Category::Ty => Self::ty(source),
            _ => Self::expr(source),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    /// Hole names in first-occurrence order.
    pub fn holes(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for id in self.tree.preorder(self.root()) {
            if let Some(hole) = self.tree.get(id).and_then(NodeKind::hole) {
                if !seen.iter().any(|s| s == hole) {
                    seen.push(hole.to_string());
                }
            }
        }
        seen
    }
}

fn strip_parens(tree: &Tree, mut id: NodeId) -> NodeId {
    while let Some(Expr::Paren(inner)) = tree.expr(id) {
        id = *inner;
    }
    id
}

/// Label argument of `marked!`/`def!`: a bare word or a string literal.
fn label_arg(tree: &Tree, id: Option<&NodeId>) -> Option<String> {
    let id = *id?;
    match tree.get(id)? {
        NodeKind::Expr(Expr::Path(path)) | NodeKind::Ty(Ty::Path { path, .. })
            if path.segments.len() == 1 =>
        {
            Some(path.last().to_string())
        }
        NodeKind::Expr(Expr::Lit(Lit::Str(label))) => Some(label.clone()),
        _ => None,
    }
}

fn is_pseudo_macro(path: &Path, name: &str) -> bool {
    !path.global && path.segments.len() == 1 && path.last() == name
}

/// Name of the definition a resolved path points at.
pub fn def_name(tree: &Tree, def: Def) -> Option<&str> {
    match def {
        Def::Item(item) => tree.item(item).map(|i| i.name.as_str()),
        Def::Local(stmt) => match tree.stmt(stmt)? {
            Stmt::Let { name, .. } => Some(name.as_str()),
            _ => None,
        },
        Def::Param { func, index } => match &tree.item(func)?.kind {
            crate::ast::ItemKind::Fn { params, .. } => params.get(index).map(|p| p.name.as_str()),
            _ => None,
        },
    }
}

/// Node carrying the marks of a definition. Parameters have none.
fn def_node(def: Def) -> Option<NodeId> {
    match def {
        Def::Item(item) => Some(item),
        Def::Local(stmt) => Some(stmt),
        Def::Param { .. } => None,
    }
}

/// Matches patterns against nodes of one tree
pub struct Matcher<'a> {
    tree: &'a Tree,
    marks: &'a MarkStore,
}

impl<'a> Matcher<'a> {
    pub fn new(tree: &'a Tree, marks: &'a MarkStore) -> Self {
        Self { tree, marks }
    }

    /// Bindings for `pattern` matched at `target`, if it matches.
    pub fn match_at(&self, pattern: &Pattern, target: NodeId) -> Option<Bindings> {
        let mut bindings = Bindings::new();
        self.match_node(&pattern.tree, pattern.root(), target, &mut bindings)
            .then_some(bindings)
    }

    pub fn matches(&self, pattern: &Pattern, target: NodeId) -> bool {
        self.match_at(pattern, target).is_some()
    }

    /// Every node under `root` (inclusive) that matches, pre-order.
    pub fn find_all(&self, pattern: &Pattern, root: NodeId) -> Vec<NodeId> {
        self.tree
            .preorder(root)
            .into_iter()
            .filter(|id| self.matches(pattern, *id))
            .collect()
    }

    fn match_node(&self, ptree: &Tree, p: NodeId, t: NodeId, bindings: &mut Bindings) -> bool {
        let p = strip_parens(ptree, p);
        let t = strip_parens(self.tree, t);
        let (Some(pnode), Some(tnode)) = (ptree.get(p), self.tree.get(t)) else {
            return false;
        };

        if let Some(hole) = pnode.hole() {
            if pnode.category() != tnode.category() {
                return false;
            }
            return match bindings.get(hole) {
                Some(prev) => self.tree.source_of(*prev) == self.tree.source_of(t),
                None => {
                    bindings.insert(hole.to_string(), t);
                    true
                }
            };
        }

        match pnode {
            NodeKind::Expr(Expr::MacCall { path, args })
            | NodeKind::Ty(Ty::Mac { path, args })
                if is_pseudo_macro(path, "marked") && !args.is_empty() =>
            {
                let label = label_arg(ptree, args.get(1)).unwrap_or_else(|| DEFAULT_LABEL.to_string());
                return self.marks.has(t, &label) && self.match_node(ptree, args[0], t, bindings);
            }
            NodeKind::Expr(Expr::MacCall { path, args })
                if is_pseudo_macro(path, "def") && !args.is_empty() =>
            {
                let Some(name) = label_arg(ptree, args.first()) else {
                    return false;
                };
                let Some(def) = self.tree.resolve_expr(t) else {
                    return false;
                };
                if def_name(self.tree, def) != Some(name.as_str()) {
                    return false;
                }
                // The label sits on the definition, not on the use.
                return match label_arg(ptree, args.get(1)) {
                    Some(label) => def_node(def).is_some_and(|d| self.marks.has(d, &label)),
                    None => true,
                };
            }
            // A reference without a lifetime matches any lifetime.
            NodeKind::Ty(Ty::Ref {
                lifetime: None,
                mutability,
                pointee,
            }) => {
                return match tnode {
                    NodeKind::Ty(Ty::Ref {
                        mutability: target_mut,
                        pointee: target_pointee,
                        ..
                    }) => {
                        mutability == target_mut
                            && self.match_node(ptree, *pointee, *target_pointee, bindings)
                    }
                    _ => false,
                };
            }
            _ => {}
        }

        if pnode.header() != tnode.header() {
            return false;
        }
        let pchildren = pnode.children();
        let tchildren = tnode.children();
        pchildren.len() == tchildren.len()
            && pchildren
                .iter()
                .zip(&tchildren)
                .all(|(pc, tc)| self.match_node(ptree, *pc, *tc, bindings))
    }
}

/// Result of copying a template into a tree
#[derive(Debug)]
pub struct Instantiated {
    pub root: NodeId,
    /// Bound nodes that were moved into the copy
    pub used: HashSet<NodeId>,
}

/// Copies `template` into `tree`, substituting holes. The first use of a
/// bound node moves it; later uses get a deep copy.
pub fn instantiate(
    tree: &mut Tree,
    template: &Pattern,
    bindings: &Bindings,
) -> RefactorResult<Instantiated> {
    let mut used = HashSet::new();
    let root = copy_template(tree, &template.tree, template.root(), bindings, &mut used)?;
    Ok(Instantiated { root, used })
}

fn copy_template(
    tree: &mut Tree,
    ttree: &Tree,
    id: NodeId,
    bindings: &Bindings,
    used: &mut HashSet<NodeId>,
) -> RefactorResult<NodeId> {
    let node = ttree.node(id)?;
    match node {
        // `marked!(P, ..)` in a template is just `P`.
        NodeKind::Expr(Expr::MacCall { path, args }) | NodeKind::Ty(Ty::Mac { path, args })
            if is_pseudo_macro(path, "marked") && !args.is_empty() =>
        {
            return copy_template(tree, ttree, args[0], bindings, used);
        }
        // `def!(name, ..)` in a template is a path to `name`.
        NodeKind::Expr(Expr::MacCall { path, args }) if is_pseudo_macro(path, "def") => {
            let name = label_arg(ttree, args.first()).ok_or_else(|| {
                RefactorError::conflict("`def!` in a template needs a name".to_string())
            })?;
            return Ok(tree.alloc_expr(Expr::Path(Path::single(name))));
        }
        _ => {}
    }
    if let Some(hole) = node.hole() {
        let bound = *bindings.get(hole).ok_or_else(|| {
            RefactorError::conflict(format!("template hole `{hole}` is not bound by the pattern"))
        })?;
        let bound_category = tree.node(bound)?.category();
        if bound_category != node.category() {
            return Err(RefactorError::conflict(format!(
                "hole `{hole}` is bound to {bound_category} but used as {}",
                node.category()
            )));
        }
        return if used.insert(bound) {
            Ok(bound)
        } else {
            Ok(tree.deep_clone(bound)?)
        };
    }
    let mut node = node.clone();
    for child in node.children_mut() {
        *child = copy_template(tree, ttree, *child, bindings, used)?;
    }
    Ok(tree.alloc(node))
}

/// Replaces `old` by an instance of `template`. `old` and every part of it
/// not moved into the instance are retired. Returns the new node.
pub fn replace_with_template(
    tree: &mut Tree,
    old: NodeId,
    template: &Pattern,
    bindings: &Bindings,
) -> RefactorResult<NodeId> {
    // Park a placeholder first: `old` may itself be bound and moved.
    let placeholder = match tree.node(old)?.category() {
        Category::Ty => tree.alloc_ty(Ty::Infer),
        _ => tree.alloc_expr(Expr::Tuple(Vec::new())),
    };
    tree.replace(old, placeholder)?;
    let instance = instantiate(tree, template, bindings)?;
    tree.replace(placeholder, instance.root)?;
    tree.retire(placeholder, &HashSet::new());
    tree.retire(old, &instance.used);
    Ok(instance.root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_crate;

    fn find_expr(tree: &Tree, source: &str) -> NodeId {
        tree.preorder(tree.root())
            .into_iter()
            .find(|id| tree.expr(*id).is_some() && tree.source_of(*id) == source)
            .unwrap()
    }

    #[test]
    fn test_holes_bind_and_repeat() {
        let tree = parse_crate("fn f() { a + a; a + b; }").unwrap();
        let marks = MarkStore::new();
        let matcher = Matcher::new(&tree, &marks);
        let pattern = Pattern::expr("__x + __x").unwrap();

        let same = find_expr(&tree, "a + a");
        let different = find_expr(&tree, "a + b");
        let bindings = matcher.match_at(&pattern, same).unwrap();
        assert_eq!(bindings.keys().collect::<Vec<_>>(), vec!["__x"]);
        assert!(matcher.match_at(&pattern, different).is_none());
    }

    #[test]
    fn test_marked_pseudo_macro() {
        let tree = parse_crate("fn f() { g(1); g(2); }").unwrap();
        let one = find_expr(&tree, "g(1)");
        let two = find_expr(&tree, "g(2)");
        let mut marks = MarkStore::new();
        marks.mark_one(one, "calls");

        let matcher = Matcher::new(&tree, &marks);
        let pattern = Pattern::expr("marked!(g(__a), calls)").unwrap();
        assert!(matcher.matches(&pattern, one));
        assert!(!matcher.matches(&pattern, two));

        let default_label = Pattern::expr("marked!(__e)").unwrap();
        assert!(!matcher.matches(&default_label, one));
    }

    #[test]
    fn test_def_pseudo_macro_resolves() {
        let tree = parse_crate("static mut x: i32 = 0;\nfn f() { x; }\nfn g() { let x = 1; x; }").unwrap();
        let marks = MarkStore::new();
        let matcher = Matcher::new(&tree, &marks);
        let pattern = Pattern::expr("def!(x)").unwrap();
        let hits = matcher.find_all(&pattern, tree.root());
        // both uses resolve to something named `x`
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_def_label_is_read_from_the_definition() {
        let src = "static mut messages: [*mut i8; 2] = [0 as *mut i8, 0 as *mut i8];\n\
                   static mut others: [*mut i8; 1] = [0 as *mut i8];\n\
                   fn f(i: usize) { g(messages[i]); g(others[0]); }";
        let tree = parse_crate(src).unwrap();
        let mut marks = MarkStore::new();
        marks.mark_one(tree.find_item("messages").unwrap(), "array");
        let matcher = Matcher::new(&tree, &marks);

        let pattern = Pattern::expr("def!(messages, array)[__e]").unwrap();
        let hits = matcher.find_all(&pattern, tree.root());
        assert_eq!(hits, vec![find_expr(&tree, "messages[i]")]);

        // the use site itself carries no mark
        let unlabeled = Pattern::expr("def!(others, array)[__e]").unwrap();
        assert!(matcher.find_all(&unlabeled, tree.root()).is_empty());
    }

    #[test]
    fn test_def_label_on_local_binding() {
        let tree = parse_crate("fn f() { let x = 1; x; }\nfn g(x: i32) { x; }").unwrap();
        let mut marks = MarkStore::new();
        let let_stmt = tree
            .preorder(tree.root())
            .into_iter()
            .find(|id| matches!(tree.stmt(*id), Some(Stmt::Let { .. })))
            .unwrap();
        marks.mark_one(let_stmt, "local");
        let matcher = Matcher::new(&tree, &marks);
        let pattern = Pattern::expr("def!(x, local)").unwrap();
        // the parameter use has nowhere to carry a mark
        assert_eq!(matcher.find_all(&pattern, tree.root()).len(), 1);
    }

    #[test]
    fn test_template_pseudo_macros_expand() {
        let mut tree = parse_crate("fn f() { g(x); }").unwrap();
        let x = find_expr(&tree, "x");
        let mut bindings = Bindings::new();
        bindings.insert("__e".to_string(), x);

        let template = Pattern::expr("def!(table, array)[marked!(__e, calls)]").unwrap();
        let new = replace_with_template(&mut tree, x, &template, &bindings).unwrap();
        assert_eq!(tree.source_of(new), "table[x]");
    }

    #[test]
    fn test_reference_lifetime_is_wildcard() {
        let tree = parse_crate("static S: &'static str = \"\";").unwrap();
        let marks = MarkStore::new();
        let matcher = Matcher::new(&tree, &marks);
        let pattern = Pattern::ty("&str").unwrap();
        assert_eq!(matcher.find_all(&pattern, tree.root()).len(), 1);
        let strict = Pattern::ty("&'a str").unwrap();
        assert!(matcher.find_all(&strict, tree.root()).is_empty());
    }

    #[test]
    fn test_replace_moves_bound_nodes() {
        let mut tree = parse_crate("fn f() { g(x + 1); }").unwrap();
        let call = find_expr(&tree, "g(x + 1)");
        let arg = find_expr(&tree, "x + 1");
        let marks = MarkStore::new();
        let pattern = Pattern::expr("g(__a)").unwrap();
        let template = Pattern::expr("h(__a, __a)").unwrap();
        let bindings = Matcher::new(&tree, &marks).match_at(&pattern, call).unwrap();

        let new = replace_with_template(&mut tree, call, &template, &bindings).unwrap();
        assert_eq!(tree.source_of(new), "h(x + 1, x + 1)");
        assert!(!tree.is_live(call));
        assert!(tree.is_attached(arg));
        let args = tree.children(new);
        assert_eq!(args[1], arg);
        assert_ne!(args[2], arg);
    }

    #[test]
    fn test_wrapping_the_matched_node() {
        let mut tree = parse_crate("fn f() { g(x); }").unwrap();
        let x = find_expr(&tree, "x");
        let template = Pattern::expr("__old as u8").unwrap();
        let mut bindings = Bindings::new();
        bindings.insert("__old".to_string(), x);

        let new = replace_with_template(&mut tree, x, &template, &bindings).unwrap();
        assert_eq!(tree.source_of(tree.parent(new).unwrap()), "g(x as u8)");
        assert!(tree.is_attached(x));
    }

    #[test]
    fn test_unbound_and_miscategorized_holes_conflict() {
        let mut tree = parse_crate("fn f() { g(x); }").unwrap();
        let x = find_expr(&tree, "x");
        let mut bindings = Bindings::new();
        bindings.insert("__e".to_string(), x);

        let unbound = Pattern::expr("__other").unwrap();
        let err = instantiate(&mut tree, &unbound, &bindings).unwrap_err();
        assert!(matches!(err, RefactorError::RewriteConflict { .. }));

        let wrong_kind = Pattern::expr("0 as __e").unwrap();
        let err = instantiate(&mut tree, &wrong_kind, &bindings).unwrap_err();
        assert!(matches!(err, RefactorError::RewriteConflict { .. }));
    }
}
