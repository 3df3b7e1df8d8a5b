use std::collections::HashSet;

use tracing::debug;

use crate::ast::{Def, Expr, Item, ItemKind, NodeId, Path, Tree};
use crate::refactor::{RefactorCommand, RefactorCtx, RefactorError, RefactorResult, Selection};

/// Default label holding the calls to convert
pub const CALLS_LABEL: &str = "calls";

/// `func_to_macro F [M] [calls=L]`
///
/// Turns the marked calls of function `F` into `M!(..)` invocations and
/// deletes `F`. Calls that were not marked keep calling `F`.
#[derive(Debug)]
pub struct FuncToMacro {
    pub func: String,
    pub mac: Option<String>,
    pub calls_label: String,
}

impl FuncToMacro {
    pub fn new(func: impl Into<String>) -> Self {
        Self {
            func: func.into(),
            mac: None,
            calls_label: CALLS_LABEL.to_string(),
        }
    }

    fn macro_name(&self) -> &str {
        self.mac.as_deref().unwrap_or(&self.func)
    }

    fn is_target_fn(&self, tree: &Tree, id: NodeId) -> bool {
        matches!(
            tree.item(id),
            Some(Item { name, kind: ItemKind::Fn { .. }, .. }) if *name == self.func
        )
    }

    /// Picks the function to convert: one carried in the calls label, then
    /// the one the marked calls resolve to, then any function named `F`.
    fn find_func(&self, ctx: &RefactorCtx, calls: &Selection) -> RefactorResult<NodeId> {
        if let Some(func) = calls.iter().find(|id| self.is_target_fn(&ctx.tree, *id)) {
            return Ok(func);
        }
        let resolved = calls.iter().find_map(|call| match ctx.tree.expr(call) {
            Some(Expr::Call { func: callee, .. }) => match ctx.tree.resolve_expr(*callee) {
                Some(Def::Item(item)) if self.is_target_fn(&ctx.tree, item) => Some(item),
                _ => None,
            },
            _ => None,
        });
        if let Some(func) = resolved {
            return Ok(func);
        }
        ctx.tree
            .all_items()
            .into_iter()
            .find(|id| self.is_target_fn(&ctx.tree, *id))
            .ok_or_else(|| RefactorError::unknown_item(&self.func))
    }
}

impl RefactorCommand for FuncToMacro {
    fn name(&self) -> &'static str {
        "func_to_macro"
    }

    fn description(&self) -> String {
        let mut text = format!("func_to_macro {}", self.func);
        if let Some(mac) = &self.mac {
            text.push(' ');
            text.push_str(mac);
        }
        if self.calls_label != CALLS_LABEL {
            text.push_str(&format!(" calls={}", self.calls_label));
        }
        text
    }

    fn apply(&self, ctx: &mut RefactorCtx) -> RefactorResult<()> {
        let calls = ctx.marked(&self.calls_label);
        let func = self.find_func(ctx, &calls)?;

        let mut converted = 0;
        for call in calls.iter() {
            let Some(Expr::Call { func: callee, args }) = ctx.tree.expr(call).cloned() else {
                continue;
            };
            match ctx.tree.expr(callee) {
                Some(Expr::Path(path)) if path.last() == self.func => {}
                _ => continue,
            }
            // A same-named function elsewhere keeps its calls.
            match ctx.tree.resolve_expr(callee) {
                Some(Def::Item(item)) if item != func => continue,
                _ => {}
            }
            let mac = ctx.tree.alloc_expr(Expr::MacCall {
                path: Path::single(self.macro_name()),
                args: args.clone(),
            });
            ctx.tree.replace(call, mac)?;
            let moved: HashSet<_> = args.into_iter().collect();
            ctx.tree.retire(call, &moved);
            converted += 1;
        }

        ctx.tree.remove(func)?;
        debug!(func = %self.func, converted, "converted calls to macro invocations");
        ctx.stats.rewrites += converted + 1;
        Ok(())
    }
}
