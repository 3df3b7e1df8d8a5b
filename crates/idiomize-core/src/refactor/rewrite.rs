/*!
# Template Rewrites

`rewrite_expr` / `rewrite_ty` replace every node that matches a pattern by
an instance of a template. `bytestr_to_str` turns marked byte-string
literals into string literals in place.
*/

use std::collections::HashSet;

use tracing::debug;

use crate::ast::{Category, Expr, Lit, NodeId, NodeKind};

use super::marks::DEFAULT_LABEL;
use super::patterns::{replace_with_template, Matcher, Pattern};
use super::{RefactorCommand, RefactorCtx, RefactorError, RefactorResult};

/// Pattern-to-template rewrite over expressions or types
#[derive(Debug)]
pub struct Rewrite {
    pub pattern: Pattern,
    pub template: Pattern,
    /// Restricts the pass to the subtrees of nodes with this mark
    pub scope: Option<String>,
}

impl Rewrite {
    pub fn expr(pattern: &str, template: &str, scope: Option<String>) -> RefactorResult<Self> {
        Ok(Self {
            pattern: Pattern::expr(pattern)?,
            template: Pattern::expr(template)?,
            scope,
        })
    }

    pub fn ty(pattern: &str, template: &str, scope: Option<String>) -> RefactorResult<Self> {
        Ok(Self {
            pattern: Pattern::ty(pattern)?,
            template: Pattern::ty(template)?,
            scope,
        })
    }

    fn category(&self) -> Category {
        self.pattern.category()
    }

    /// Nodes of the pattern's category in scope, pre-order, taken before any
    /// replacement happens.
    fn candidates(&self, ctx: &RefactorCtx) -> Vec<NodeId> {
        let roots = match &self.scope {
            Some(label) => ctx.marked(label).ids().to_vec(),
            None => vec![ctx.tree.root()],
        };
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for root in roots {
            for id in ctx.tree.preorder(root) {
                let in_category = ctx
                    .tree
                    .get(id)
                    .is_some_and(|node| node.category() == self.category());
                if in_category && seen.insert(id) {
                    out.push(id);
                }
            }
        }
        out
    }
}

impl RefactorCommand for Rewrite {
    fn name(&self) -> &'static str {
        match self.category() {
            Category::Ty => "rewrite_ty",
            _ => "rewrite_expr",
        }
    }

    fn description(&self) -> String {
        let mut text = format!(
            "{} '{}' '{}'",
            self.name(),
            self.pattern.source(),
            self.template.source()
        );
        if let Some(scope) = &self.scope {
            text.push_str(&format!(" scope={scope}"));
        }
        text
    }

    fn apply(&self, ctx: &mut RefactorCtx) -> RefactorResult<()> {
        let mut rewrites = 0;
        for id in self.candidates(ctx) {
            if !ctx.tree.is_attached(id) {
                continue;
            }
            let Some(bindings) = Matcher::new(&ctx.tree, &ctx.marks).match_at(&self.pattern, id) else {
                continue;
            };
            replace_with_template(&mut ctx.tree, id, &self.template, &bindings)?;
            rewrites += 1;
        }
        debug!(command = self.name(), rewrites, "rewrite pass finished");
        ctx.stats.rewrites += rewrites;
        Ok(())
    }
}

/// `bytestr_to_str [strip_nul]`
#[derive(Debug, Default)]
pub struct BytestrToStr {
    pub strip_nul: bool,
}

impl RefactorCommand for BytestrToStr {
    fn name(&self) -> &'static str {
        "bytestr_to_str"
    }

    fn description(&self) -> String {
        if self.strip_nul {
            "bytestr_to_str strip_nul".to_string()
        } else {
            "bytestr_to_str".to_string()
        }
    }

    fn apply(&self, ctx: &mut RefactorCtx) -> RefactorResult<()> {
        let mut rewrites = 0;
        for id in ctx.marked(DEFAULT_LABEL) {
            let Some(NodeKind::Expr(Expr::Lit(lit))) = ctx.tree.get_mut(id) else {
                continue;
            };
            let Lit::ByteStr(bytes) = &*lit else {
                continue;
            };
            let mut text = String::from_utf8(bytes.clone()).map_err(|_| {
                RefactorError::conflict(format!("byte string {id} is not valid UTF-8"))
            })?;
            if self.strip_nul && text.ends_with('\0') {
                text.pop();
            }
            *lit = Lit::Str(text);
            rewrites += 1;
        }
        debug!(rewrites, "converted byte strings");
        ctx.stats.rewrites += rewrites;
        Ok(())
    }
}
