use tracing::debug;

use crate::ast::{BinOp, Expr, NodeKind, UnOp};
use crate::refactor::{RefactorCommand, RefactorCtx, RefactorResult};

/// `wrapping_arith_to_normal`: `a.wrapping_add(b)` becomes `a + b`
#[derive(Debug, Default)]
pub struct WrappingArithToNormal;

fn wrapping_op(method: &str) -> Option<BinOp> {
    let op = match method.strip_prefix("wrapping_")? {
        "add" => BinOp::Add,
        "sub" => BinOp::Sub,
        "mul" => BinOp::Mul,
        "div" => BinOp::Div,
        "rem" => BinOp::Rem,
        "shl" => BinOp::Shl,
        "shr" => BinOp::Shr,
        _ => return None,
    };
    Some(op)
}

impl RefactorCommand for WrappingArithToNormal {
    fn name(&self) -> &'static str {
        "wrapping_arith_to_normal"
    }

    fn description(&self) -> String {
        self.name().to_string()
    }

    fn apply(&self, ctx: &mut RefactorCtx) -> RefactorResult<()> {
        let mut rewrites = 0;
        for id in ctx.tree.preorder(ctx.tree.root()) {
            let Some(NodeKind::Expr(expr)) = ctx.tree.get_mut(id) else {
                continue;
            };
            let Expr::MethodCall {
                receiver,
                method,
                args,
            } = &*expr
            else {
                continue;
            };
            let rewritten = match (method.as_str(), args.as_slice()) {
                ("wrapping_neg", []) => Expr::Unary {
                    op: UnOp::Neg,
                    operand: *receiver,
                },
                (method, [rhs]) => match wrapping_op(method) {
                    Some(op) => Expr::Binary {
                        op,
                        lhs: *receiver,
                        rhs: *rhs,
                    },
                    None => continue,
                },
                _ => continue,
            };
            *expr = rewritten;
            rewrites += 1;
        }
        debug!(rewrites, "replaced wrapping arithmetic");
        ctx.stats.rewrites += rewrites;
        Ok(())
    }
}
