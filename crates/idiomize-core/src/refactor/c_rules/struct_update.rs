use std::collections::HashSet;

use tracing::debug;

use crate::ast::{Def, Expr, ItemKind, NodeId, NodeKind, Path, Stmt, Tree, Ty};
use crate::refactor::{RefactorCommand, RefactorCtx, RefactorResult};

/// Struct type of the place `base`, if it has a field `field`.
fn struct_path(tree: &Tree, base: NodeId, field: &str) -> Option<Path> {
    let ty = tree.def_type(tree.resolve_expr(base)?)?;
    let Ty::Path { path, args } = tree.ty(ty)? else {
        return None;
    };
    if !args.is_empty() {
        return None;
    }
    let Def::Item(item) = tree.resolve_path(base, path)? else {
        return None;
    };
    match &tree.item(item)?.kind {
        ItemKind::Struct { fields } if fields.iter().any(|f| f.name == field) => {
            Some(path.clone())
        }
        _ => None,
    }
}

/// `struct_assign_to_update`: `x.f = v;` becomes `x = S { f: v, ..x };`
///
/// Only assignments whose base is a variable of a known struct type are
/// rewritten.
#[derive(Debug, Default)]
pub struct StructAssignToUpdate;

impl RefactorCommand for StructAssignToUpdate {
    fn name(&self) -> &'static str {
        "struct_assign_to_update"
    }

    fn description(&self) -> String {
        self.name().to_string()
    }

    fn apply(&self, ctx: &mut RefactorCtx) -> RefactorResult<()> {
        let mut rewrites = 0;
        for id in ctx.tree.preorder(ctx.tree.root()) {
            let Some(Expr::Assign { lhs, rhs }) = ctx.tree.expr(id).cloned() else {
                continue;
            };
            let Some(Expr::Field { base, name }) = ctx.tree.expr(lhs).cloned() else {
                continue;
            };
            let Some(path) = struct_path(&ctx.tree, base, &name) else {
                continue;
            };

            let rest = ctx.tree.deep_clone(base)?;
            let update = ctx.tree.alloc_expr(Expr::Struct {
                path,
                fields: vec![(name, rhs)],
                base: Some(rest),
            });
            if let Some(NodeKind::Expr(Expr::Assign { rhs: slot, .. })) = ctx.tree.get_mut(id) {
                *slot = update;
            }
            ctx.tree.adopt(id, update);
            ctx.tree.replace(lhs, base)?;
            ctx.tree.retire(lhs, &HashSet::from([base]));
            rewrites += 1;
        }
        debug!(rewrites, "turned field assignments into struct updates");
        ctx.stats.rewrites += rewrites;
        Ok(())
    }
}

/// `x = S { .., ..x }` as a statement: the assignment's place and the
/// struct literal.
fn update_parts(tree: &Tree, stmt: NodeId) -> Option<(NodeId, NodeId)> {
    let Stmt::Expr { expr, .. } = tree.stmt(stmt)? else {
        return None;
    };
    let Expr::Assign { lhs, rhs } = tree.expr(*expr)? else {
        return None;
    };
    let Expr::Struct { base: Some(base), .. } = tree.expr(*rhs)? else {
        return None;
    };
    (tree.source_of(*base) == tree.source_of(*lhs)).then_some((*lhs, *rhs))
}

/// `struct_merge_updates`: merges consecutive updates of the same place
///
/// `x = S { a: 1, ..x }; x = S { b: 2, ..x };` becomes
/// `x = S { a: 1, b: 2, ..x };`. An update that reads the place it
/// updates is left alone.
#[derive(Debug, Default)]
pub struct StructMergeUpdates;

impl StructMergeUpdates {
    /// Folds the update in `second` into the one in `first`.
    fn merge(&self, tree: &mut Tree, first: NodeId, second: NodeId) -> RefactorResult<bool> {
        let (Some((place, into)), Some((other_place, from))) =
            (update_parts(tree, first), update_parts(tree, second))
        else {
            return Ok(false);
        };
        let place_src = tree.source_of(place);
        if tree.source_of(other_place) != place_src {
            return Ok(false);
        }
        let (Some(Expr::Struct { path, .. }), Some(Expr::Struct { path: other_path, fields: added, .. })) =
            (tree.expr(into), tree.expr(from))
        else {
            return Ok(false);
        };
        if path != other_path {
            return Ok(false);
        }
        let added = added.clone();
        let reads_place = added.iter().any(|(_, value)| {
            tree.preorder(*value)
                .into_iter()
                .any(|n| tree.expr(n).is_some() && tree.source_of(n) == place_src)
        });
        if reads_place {
            return Ok(false);
        }

        let mut dropped = Vec::new();
        if let Some(NodeKind::Expr(Expr::Struct { fields, .. })) = tree.get_mut(into) {
            for (name, value) in &added {
                match fields.iter_mut().find(|(existing, _)| existing == name) {
                    Some((_, old)) => dropped.push(std::mem::replace(old, *value)),
                    None => fields.push((name.clone(), *value)),
                }
            }
        }
        for (_, value) in &added {
            tree.adopt(into, *value);
        }
        for old in dropped {
            tree.retire(old, &HashSet::new());
        }
        tree.detach(second)?;
        let moved: HashSet<NodeId> = added.into_iter().map(|(_, value)| value).collect();
        tree.retire(second, &moved);
        Ok(true)
    }
}

impl RefactorCommand for StructMergeUpdates {
    fn name(&self) -> &'static str {
        "struct_merge_updates"
    }

    fn description(&self) -> String {
        self.name().to_string()
    }

    fn apply(&self, ctx: &mut RefactorCtx) -> RefactorResult<()> {
        let mut merged = 0;
        for block in ctx.tree.preorder(ctx.tree.root()) {
            let mut i = 0;
            loop {
                let Some(Expr::Block { stmts, .. }) = ctx.tree.expr(block) else {
                    break;
                };
                let (Some(&first), Some(&second)) = (stmts.get(i), stmts.get(i + 1)) else {
                    break;
                };
                if self.merge(&mut ctx.tree, first, second)? {
                    merged += 1;
                } else {
                    i += 1;
                }
            }
        }
        debug!(merged, "merged consecutive struct updates");
        ctx.stats.rewrites += merged;
        Ok(())
    }
}
