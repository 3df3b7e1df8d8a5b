/*!
# Mark Commands

Commands that only touch the mark store: `select` and the label
utilities, plus the two resolver-driven markers `mark_callers` and
`mark_arg_uses`.
*/

use tracing::debug;

use crate::ast::{Expr, Item, ItemKind, NodeId};

use super::select::Query;
use super::{RefactorCommand, RefactorCtx, RefactorResult};

/// `select L 'QUERY'`: runs a query and marks the result with `L`
#[derive(Debug)]
pub struct Select {
    pub label: String,
    pub query: Query,
}

impl RefactorCommand for Select {
    fn name(&self) -> &'static str {
        "select"
    }

    fn description(&self) -> String {
        format!("select {} '{}'", self.label, self.query)
    }

    fn apply(&self, ctx: &mut RefactorCtx) -> RefactorResult<()> {
        let selection = self.query.run(&ctx.tree, &mut ctx.marks);
        debug!(label = %self.label, count = selection.len(), "selected nodes");
        ctx.marks.mark(selection, &self.label);
        Ok(())
    }
}

/// `copy_marks A B`
#[derive(Debug)]
pub struct CopyMarks {
    pub from: String,
    pub to: String,
}

impl RefactorCommand for CopyMarks {
    fn name(&self) -> &'static str {
        "copy_marks"
    }

    fn description(&self) -> String {
        format!("copy_marks {} {}", self.from, self.to)
    }

    fn apply(&self, ctx: &mut RefactorCtx) -> RefactorResult<()> {
        ctx.marks.copy(&self.from, &self.to);
        Ok(())
    }
}

/// `rename_marks A B`
#[derive(Debug)]
pub struct RenameMarks {
    pub from: String,
    pub to: String,
}

impl RefactorCommand for RenameMarks {
    fn name(&self) -> &'static str {
        "rename_marks"
    }

    fn description(&self) -> String {
        format!("rename_marks {} {}", self.from, self.to)
    }

    fn apply(&self, ctx: &mut RefactorCtx) -> RefactorResult<()> {
        ctx.marks.rename(&self.from, &self.to);
        Ok(())
    }
}

/// `delete_marks L`
#[derive(Debug)]
pub struct DeleteMarks {
    pub label: String,
}

impl RefactorCommand for DeleteMarks {
    fn name(&self) -> &'static str {
        "delete_marks"
    }

    fn description(&self) -> String {
        format!("delete_marks {}", self.label)
    }

    fn apply(&self, ctx: &mut RefactorCtx) -> RefactorResult<()> {
        ctx.marks.delete(&self.label);
        Ok(())
    }
}

/// `clear_marks`
#[derive(Debug)]
pub struct ClearMarks;

impl RefactorCommand for ClearMarks {
    fn name(&self) -> &'static str {
        "clear_marks"
    }

    fn description(&self) -> String {
        "clear_marks".to_string()
    }

    fn apply(&self, ctx: &mut RefactorCtx) -> RefactorResult<()> {
        ctx.marks.clear();
        Ok(())
    }
}

/// Calls to every function item marked `label`.
fn calls_to_marked_fns(ctx: &RefactorCtx, label: &str) -> Vec<NodeId> {
    ctx.marked(label)
        .iter()
        .filter(|id| {
            matches!(
                ctx.tree.item(*id),
                Some(Item {
                    kind: ItemKind::Fn { .. },
                    ..
                })
            )
        })
        .flat_map(|func| ctx.tree.callers_of(func))
        .collect()
}

/// `mark_callers L`: marks calls to functions marked `L` with `L`
#[derive(Debug)]
pub struct MarkCallers {
    pub label: String,
}

impl RefactorCommand for MarkCallers {
    fn name(&self) -> &'static str {
        "mark_callers"
    }

    fn description(&self) -> String {
        format!("mark_callers {}", self.label)
    }

    fn apply(&self, ctx: &mut RefactorCtx) -> RefactorResult<()> {
        let calls = calls_to_marked_fns(ctx, &self.label);
        debug!(label = %self.label, count = calls.len(), "marking callers");
        ctx.marks.mark(calls, &self.label);
        Ok(())
    }
}

/// `mark_arg_uses N L`: marks argument `N` of calls to functions marked `L`
#[derive(Debug)]
pub struct MarkArgUses {
    pub index: usize,
    pub label: String,
}

impl RefactorCommand for MarkArgUses {
    fn name(&self) -> &'static str {
        "mark_arg_uses"
    }

    fn description(&self) -> String {
        format!("mark_arg_uses {} {}", self.index, self.label)
    }

    fn apply(&self, ctx: &mut RefactorCtx) -> RefactorResult<()> {
        let args: Vec<NodeId> = calls_to_marked_fns(ctx, &self.label)
            .into_iter()
            .filter_map(|call| match ctx.tree.expr(call) {
                Some(Expr::Call { args, .. }) => args.get(self.index).copied(),
                _ => None,
            })
            .collect();
        debug!(label = %self.label, count = args.len(), "marking call arguments");
        ctx.marks.mark(args, &self.label);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_crate;

    fn ctx(src: &str) -> RefactorCtx {
        RefactorCtx::new(parse_crate(src).unwrap())
    }

    fn marked_sources(ctx: &RefactorCtx, label: &str) -> Vec<String> {
        ctx.marked(label).iter().map(|id| ctx.tree.source_of(id)).collect()
    }

    const SRC: &str = "extern \"C\" {\n    fn printw(fmt: *const i8, ...) -> i32;\n}\n\
                       fn main() {\n    printw(b\"%d\\0\" as *const u8 as *const i8, 1);\n    other(2);\n}\n";

    #[test]
    fn test_select_marks_results() {
        let mut ctx = ctx(SRC);
        Select {
            label: "f".to_string(),
            query: Query::parse("crate; desc(foreign_fn)").unwrap(),
        }
        .apply(&mut ctx)
        .unwrap();
        assert_eq!(ctx.marked("f").len(), 1);
    }

    #[test]
    fn test_mark_callers_and_arg_uses() {
        let mut ctx = ctx(SRC);
        let printw = ctx.tree.find_item("printw").unwrap();
        ctx.marks.mark_one(printw, "calls");
        ctx.marks.copy("calls", "fmt");

        MarkCallers { label: "calls".to_string() }.apply(&mut ctx).unwrap();
        MarkArgUses {
            index: 0,
            label: "fmt".to_string(),
        }
        .apply(&mut ctx)
        .unwrap();

        let calls = marked_sources(&ctx, "calls");
        assert_eq!(calls.len(), 2);
        assert!(calls[1].starts_with("printw("));
        assert_eq!(
            marked_sources(&ctx, "fmt")[1],
            "b\"%d\\0\" as *const u8 as *const i8"
        );
    }

    #[test]
    fn test_label_utilities() {
        let mut ctx = ctx(SRC);
        let main = ctx.tree.find_item("main").unwrap();
        ctx.marks.mark_one(main, "a");

        CopyMarks { from: "a".into(), to: "b".into() }.apply(&mut ctx).unwrap();
        RenameMarks { from: "a".into(), to: "c".into() }.apply(&mut ctx).unwrap();
        assert!(ctx.marked("a").is_empty());
        assert_eq!(ctx.marked("b").ids(), &[main]);
        assert_eq!(ctx.marked("c").ids(), &[main]);

        DeleteMarks { label: "b".into() }.apply(&mut ctx).unwrap();
        assert!(ctx.marked("b").is_empty());
        ClearMarks.apply(&mut ctx).unwrap();
        assert!(ctx.marked("c").is_empty());
    }
}
