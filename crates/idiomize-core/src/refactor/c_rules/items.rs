use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::ast::{Item, ItemKind, Mutability, NodeId, NodeKind, Stmt, Tree, Visibility};
use crate::parser::parse_items_into;
use crate::refactor::marks::DEFAULT_LABEL;
use crate::refactor::{RefactorCommand, RefactorCtx, RefactorError, RefactorResult};

fn visibility_keyword(vis: Visibility) -> &'static str {
    match vis {
        Visibility::Inherited => "''",
        Visibility::Crate => "pub(crate)",
        Visibility::Public => "pub",
    }
}

/// `set_visibility VIS`
#[derive(Debug)]
pub struct SetVisibility {
    pub vis: Visibility,
}

impl SetVisibility {
    pub fn parse(vis: &str) -> RefactorResult<Self> {
        let vis = match vis.trim() {
            "" => Visibility::Inherited,
            "pub" => Visibility::Public,
            "pub(crate)" => Visibility::Crate,
            other => {
                return Err(RefactorError::invalid_argument(
                    "set_visibility",
                    format!("unknown visibility `{other}`"),
                ))
            }
        };
        Ok(Self { vis })
    }
}

impl RefactorCommand for SetVisibility {
    fn name(&self) -> &'static str {
        "set_visibility"
    }

    fn description(&self) -> String {
        format!("set_visibility {}", visibility_keyword(self.vis))
    }

    fn apply(&self, ctx: &mut RefactorCtx) -> RefactorResult<()> {
        let mut changed = 0;
        for id in ctx.marked(DEFAULT_LABEL) {
            if let Some(item) = ctx.tree.item_mut(id) {
                item.vis = self.vis;
                changed += 1;
            }
        }
        debug!(changed, "visibility updated");
        ctx.stats.rewrites += changed;
        Ok(())
    }
}

/// `set_mutability imm|mut`, for statics and `let` bindings
#[derive(Debug)]
pub struct SetMutability {
    pub mutability: Mutability,
}

impl SetMutability {
    pub fn parse(mutability: &str) -> RefactorResult<Self> {
        let mutability = match mutability {
            "imm" => Mutability::Not,
            "mut" => Mutability::Mut,
            other => {
                return Err(RefactorError::invalid_argument(
                    "set_mutability",
                    format!("expected `imm` or `mut`, found `{other}`"),
                ))
            }
        };
        Ok(Self { mutability })
    }
}

impl RefactorCommand for SetMutability {
    fn name(&self) -> &'static str {
        "set_mutability"
    }

    fn description(&self) -> String {
        match self.mutability {
            Mutability::Not => "set_mutability imm".to_string(),
            Mutability::Mut => "set_mutability mut".to_string(),
        }
    }

    fn apply(&self, ctx: &mut RefactorCtx) -> RefactorResult<()> {
        let mut changed = 0;
        for id in ctx.marked(DEFAULT_LABEL) {
            let slot = match ctx.tree.get_mut(id) {
                Some(NodeKind::Item(item)) => match &mut item.kind {
                    ItemKind::Static { mutability, .. } => mutability,
                    _ => continue,
                },
                Some(NodeKind::Stmt(Stmt::Let { mutability, .. })) => mutability,
                _ => continue,
            };
            *slot = self.mutability;
            changed += 1;
        }
        debug!(changed, "mutability updated");
        ctx.stats.rewrites += changed;
        Ok(())
    }
}

/// Where `create_item` puts the new items relative to each marked node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertPosition {
    Before,
    #[default]
    After,
    /// Appended to a crate, module or foreign block
    Inside,
}

impl FromStr for InsertPosition {
    type Err = RefactorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "before" => Ok(Self::Before),
            "after" => Ok(Self::After),
            "inside" => Ok(Self::Inside),
            other => Err(RefactorError::invalid_argument(
                "create_item",
                format!("expected before, after or inside, found `{other}`"),
            )),
        }
    }
}

impl fmt::Display for InsertPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Before => "before",
            Self::After => "after",
            Self::Inside => "inside",
        })
    }
}

/// `create_item 'SRC' [before|after|inside]`
#[derive(Debug)]
pub struct CreateItem {
    pub source: String,
    pub position: InsertPosition,
}

impl CreateItem {
    /// Checks that `source` parses as items before any stage runs.
    pub fn new(source: impl Into<String>, position: InsertPosition) -> RefactorResult<Self> {
        let source = source.into();
        parse_items_into(&mut Tree::empty(), &source)?;
        Ok(Self { source, position })
    }

    /// List parent, insertion index, and whether items go in as statements.
    fn insertion_point(&self, tree: &Tree, target: NodeId) -> RefactorResult<(NodeId, usize, bool)> {
        if self.position == InsertPosition::Inside {
            return match tree.get(target) {
                Some(NodeKind::Crate(_))
                | Some(NodeKind::Item(Item {
                    kind: ItemKind::Mod { .. } | ItemKind::ForeignMod { .. },
                    ..
                })) => Ok((target, tree.item_list(target).len(), false)),
                _ => Err(RefactorError::conflict(format!(
                    "create_item inside {target}: not a crate, module or foreign block"
                ))),
            };
        }
        // Items nested in a block sit under a `Stmt::Item`.
        let anchor = match tree.parent(target).and_then(|p| tree.stmt(p).map(|s| (p, s))) {
            Some((stmt, Stmt::Item(_))) => stmt,
            _ => target,
        };
        let as_stmt = anchor != target;
        let (parent, index) = tree.index_in_parent(anchor).ok_or_else(|| {
            RefactorError::conflict(format!("create_item {}: {target} has no parent", self.position))
        })?;
        match self.position {
            InsertPosition::Before => Ok((parent, index, as_stmt)),
            _ => Ok((parent, index + 1, as_stmt)),
        }
    }
}

impl RefactorCommand for CreateItem {
    fn name(&self) -> &'static str {
        "create_item"
    }

    fn description(&self) -> String {
        format!("create_item '{}' {}", self.source.trim(), self.position)
    }

    fn apply(&self, ctx: &mut RefactorCtx) -> RefactorResult<()> {
        let mut created = 0;
        for target in ctx.marked(DEFAULT_LABEL) {
            let (parent, index, as_stmt) = self.insertion_point(&ctx.tree, target)?;
            let items = parse_items_into(&mut ctx.tree, &self.source)?;
            for (offset, item) in items.into_iter().enumerate() {
                let node = if as_stmt {
                    ctx.tree.alloc(NodeKind::Stmt(Stmt::Item(item)))
                } else {
                    item
                };
                ctx.tree.insert_child(parent, index + offset, node)?;
                created += 1;
            }
        }
        debug!(created, position = %self.position, "created items");
        ctx.stats.rewrites += created;
        Ok(())
    }
}

/// `delete_items`
#[derive(Debug, Default)]
pub struct DeleteItems;

impl RefactorCommand for DeleteItems {
    fn name(&self) -> &'static str {
        "delete_items"
    }

    fn description(&self) -> String {
        self.name().to_string()
    }

    fn apply(&self, ctx: &mut RefactorCtx) -> RefactorResult<()> {
        let mut deleted = 0;
        for id in ctx.marked(DEFAULT_LABEL) {
            if ctx.tree.item(id).is_none() || !ctx.tree.is_attached(id) {
                continue;
            }
            let victim = match ctx.tree.parent(id) {
                Some(parent) if matches!(ctx.tree.stmt(parent), Some(Stmt::Item(_))) => parent,
                _ => id,
            };
            ctx.tree.remove(victim)?;
            deleted += 1;
        }
        debug!(deleted, "deleted items");
        ctx.stats.rewrites += deleted;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ast::ToSource;
    use crate::parser::parse_crate;

    fn ctx_marking(src: &str, names: &[&str]) -> RefactorCtx {
        let mut ctx = RefactorCtx::new(parse_crate(src).unwrap());
        for name in names {
            let id = ctx.tree.find_item(name).unwrap();
            ctx.marks.mark_one(id, DEFAULT_LABEL);
        }
        ctx
    }

    #[test]
    fn test_set_visibility_and_mutability() {
        let mut ctx = ctx_marking("static mut A: i32 = 0;\nstatic B: i32 = 0;\n", &["A"]);
        SetVisibility::parse("pub(crate)").unwrap().apply(&mut ctx).unwrap();
        SetMutability::parse("imm").unwrap().apply(&mut ctx).unwrap();
        assert_eq!(
            ctx.tree.to_source(),
            "pub(crate) static A: i32 = 0;\nstatic B: i32 = 0;\n"
        );
        assert!(SetMutability::parse("const").is_err());
        assert!(SetVisibility::parse("pub(super)").is_err());
    }

    #[test]
    fn test_create_item_positions() {
        let mut ctx = ctx_marking("fn a() {}\nmod m {}\n", &["a"]);
        CreateItem::new("fn b() {}", InsertPosition::Before)
            .unwrap()
            .apply(&mut ctx)
            .unwrap();
        CreateItem::new("fn c() {}", InsertPosition::After)
            .unwrap()
            .apply(&mut ctx)
            .unwrap();
        ctx.marks.clear();
        let m = ctx.tree.find_item("m").unwrap();
        ctx.marks.mark_one(m, DEFAULT_LABEL);
        CreateItem::new("static X: u8 = 1;\nstatic Y: u8 = 2;", InsertPosition::Inside)
            .unwrap()
            .apply(&mut ctx)
            .unwrap();
        assert_eq!(
            ctx.tree.to_source(),
            "fn b() {}\nfn a() {}\nfn c() {}\n\
             mod m {\n    static X: u8 = 1;\n    static Y: u8 = 2;\n}\n"
        );
    }

    #[test]
    fn test_create_item_checks_source_up_front() {
        assert!(CreateItem::new("fn (", InsertPosition::After).is_err());
    }

    #[test]
    fn test_create_item_inside_function_is_a_conflict() {
        let mut ctx = ctx_marking("fn a() {}\n", &["a"]);
        let err = CreateItem::new("fn b() {}", InsertPosition::Inside)
            .unwrap()
            .apply(&mut ctx)
            .unwrap_err();
        assert!(matches!(err, RefactorError::RewriteConflict { .. }));
    }

    #[test]
    fn test_delete_items_including_nested() {
        let mut ctx = ctx_marking(
            "fn a() {\n    fn inner() {}\n    inner();\n}\nfn b() {}\n",
            &["inner", "b"],
        );
        DeleteItems.apply(&mut ctx).unwrap();
        assert_eq!(ctx.tree.to_source(), "fn a() {\n    inner();\n}\n");
        assert_eq!(ctx.stats.rewrites, 2);
    }
}
