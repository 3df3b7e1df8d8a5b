/*!
# Global State Collection

`static_collect_to_struct S I` folds the marked mutable statics into one
`static mut I: S`. `static_to_local_ref` then threads that global through
the marked functions as a `&mut S` parameter.
*/

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::debug;

use crate::ast::{
    Def, Expr, FieldDef, Item, ItemKind, Mutability, NodeId, NodeKind, Param, Path, Tree,
    TreeError, Ty, Visibility,
};

use crate::refactor::marks::DEFAULT_LABEL;
use crate::refactor::{RefactorCommand, RefactorCtx, RefactorError, RefactorResult};

/// Label `static_to_local_ref` reads the user functions from
pub const USER_LABEL: &str = "user";

/// `static_collect_to_struct S I`
#[derive(Debug)]
pub struct StaticCollectToStruct {
    pub struct_name: String,
    pub instance_name: String,
}

/// One collected static
struct Collected {
    id: NodeId,
    name: String,
    ty: NodeId,
    init: NodeId,
    uses: Vec<NodeId>,
}

impl StaticCollectToStruct {
    fn collect(&self, ctx: &RefactorCtx) -> RefactorResult<(NodeId, Vec<Collected>)> {
        let tree = &ctx.tree;
        let mut module = None;
        let mut statics = Vec::new();
        for id in ctx.marked(DEFAULT_LABEL) {
            let Some(Item {
                name,
                kind:
                    ItemKind::Static {
                        mutability: Mutability::Mut,
                        ty,
                        init: Some(init),
                    },
                ..
            }) = tree.item(id)
            else {
                continue;
            };
            let parent = tree.parent(id).ok_or(TreeError::DeadNode(id))?;
            match module {
                None => module = Some(parent),
                Some(m) if m != parent => {
                    return Err(RefactorError::conflict(format!(
                        "static `{name}` is not declared next to the other collected statics"
                    )));
                }
                Some(_) => {}
            }
            statics.push(Collected {
                id,
                name: name.clone(),
                ty: *ty,
                init: *init,
                uses: tree.uses_of(Def::Item(id)),
            });
        }
        let Some(module) = module else {
            return Ok((tree.root(), statics));
        };

        let collected: HashSet<NodeId> = statics.iter().map(|s| s.id).collect();
        for name in [&self.struct_name, &self.instance_name] {
            if let Some(existing) = tree.module_member(module, name) {
                if !collected.contains(&existing) {
                    return Err(RefactorError::conflict(format!(
                        "`{name}` is already declared in the target module"
                    )));
                }
            }
        }
        Ok((module, statics))
    }
}

impl RefactorCommand for StaticCollectToStruct {
    fn name(&self) -> &'static str {
        "static_collect_to_struct"
    }

    fn description(&self) -> String {
        format!(
            "static_collect_to_struct {} {}",
            self.struct_name, self.instance_name
        )
    }

    fn apply(&self, ctx: &mut RefactorCtx) -> RefactorResult<()> {
        let (module, statics) = self.collect(ctx)?;
        let Some(first) = statics.first() else {
            debug!("no mutable statics marked; nothing to collect");
            return Ok(());
        };
        let (_, position) = ctx
            .tree
            .index_in_parent(first.id)
            .ok_or(TreeError::DeadNode(first.id))?;
        let vis = ctx.tree.item(first.id).map_or(Visibility::Inherited, |i| i.vis);

        let tree = &mut ctx.tree;
        let fields = statics
            .iter()
            .map(|s| FieldDef {
                vis: Visibility::Inherited,
                name: s.name.clone(),
                ty: s.ty,
            })
            .collect();
        let struct_item = tree.alloc(NodeKind::Item(Item {
            attrs: Vec::new(),
            vis,
            name: self.struct_name.clone(),
            kind: ItemKind::Struct { fields },
        }));

        let literal = tree.alloc_expr(Expr::Struct {
            path: Path::single(&self.struct_name),
            fields: statics.iter().map(|s| (s.name.clone(), s.init)).collect(),
            base: None,
        });
        let instance_ty = tree.alloc_ty(Ty::Path {
            path: Path::single(&self.struct_name),
            args: Vec::new(),
        });
        let instance = tree.alloc(NodeKind::Item(Item {
            attrs: Vec::new(),
            vis,
            name: self.instance_name.clone(),
            kind: ItemKind::Static {
                mutability: Mutability::Mut,
                ty: instance_ty,
                init: Some(literal),
            },
        }));

        let moved: HashSet<NodeId> = statics.iter().flat_map(|s| [s.ty, s.init]).collect();
        for s in &statics {
            tree.detach(s.id)?;
            tree.retire(s.id, &moved);
        }
        tree.insert_child(module, position, struct_item)?;
        tree.insert_child(module, position + 1, instance)?;

        let mut rewrites = 0;
        for s in &statics {
            for use_site in &s.uses {
                if !tree.is_attached(*use_site) {
                    continue;
                }
                let base = tree.alloc_expr(Expr::Path(Path::single(&self.instance_name)));
                let field = tree.alloc_expr(Expr::Field {
                    base,
                    name: s.name.clone(),
                });
                tree.replace(*use_site, field)?;
                tree.retire(*use_site, &HashSet::new());
                rewrites += 1;
            }
        }
        debug!(
            statics = statics.len(),
            uses = rewrites,
            instance = %self.instance_name,
            "collected statics into a struct"
        );
        ctx.stats.rewrites += rewrites + statics.len() as u64;
        Ok(())
    }
}

/// `static_to_local_ref`
#[derive(Debug, Default)]
pub struct StaticToLocalRef;

/// Function items that mention `def` in their bodies.
fn direct_users(tree: &Tree, def: Def, users: &BTreeSet<NodeId>) -> BTreeSet<NodeId> {
    tree.uses_of(def)
        .into_iter()
        .filter_map(|u| tree.enclosing_fn(u))
        .filter(|f| users.contains(f))
        .collect()
}

/// Grows `needing` with every user function that calls into it.
fn close_over_callers(tree: &Tree, needing: &mut BTreeSet<NodeId>, users: &BTreeSet<NodeId>) {
    let mut work: Vec<NodeId> = needing.iter().copied().collect();
    while let Some(func) = work.pop() {
        for call in tree.callers_of(func) {
            if let Some(caller) = tree.enclosing_fn(call) {
                if users.contains(&caller) && needing.insert(caller) {
                    work.push(caller);
                }
            }
        }
    }
}

/// Existing parameter of `func` whose type is `&mut` of `static_ty`.
fn reusable_param(tree: &Tree, func: NodeId, static_ty: NodeId) -> Option<String> {
    let wanted = format!("&mut {}", tree.ty_shape(static_ty));
    match &tree.item(func)?.kind {
        ItemKind::Fn { params, .. } => params
            .iter()
            .find(|p| tree.ty_shape(p.ty) == wanted)
            .map(|p| p.name.clone()),
        _ => None,
    }
}

impl StaticToLocalRef {
    fn thread_static(
        &self,
        tree: &mut Tree,
        global: NodeId,
        users: &BTreeSet<NodeId>,
    ) -> RefactorResult<u64> {
        let Some(Item {
            name: global_name,
            kind: ItemKind::Static { ty: global_ty, .. },
            ..
        }) = tree.item(global).cloned()
        else {
            return Ok(0);
        };

        let mut needing = direct_users(tree, Def::Item(global), users);
        close_over_callers(tree, &mut needing, users);
        if needing.is_empty() {
            return Ok(0);
        }

        // Snapshot uses and call sites before any parameter changes resolution.
        let uses = tree.uses_of(Def::Item(global));
        let calls: Vec<(NodeId, NodeId)> = needing
            .iter()
            .flat_map(|f| tree.callers_of(*f).into_iter().map(move |c| (c, *f)))
            .collect();

        let mut rewrites = 0;
        let mut param_names = BTreeMap::new();
        let mut added = BTreeSet::new();
        for func in &needing {
            let name = match reusable_param(tree, *func, global_ty) {
                Some(existing) => existing,
                None => {
                    let pointee = tree.deep_clone(global_ty)?;
                    let ty = tree.alloc_ty(Ty::Ref {
                        lifetime: None,
                        mutability: Mutability::Mut,
                        pointee,
                    });
                    if let Some(Item {
                        kind: ItemKind::Fn { params, .. },
                        ..
                    }) = tree.item_mut(*func)
                    {
                        params.insert(
                            0,
                            Param {
                                name: global_name.clone(),
                                mutability: Mutability::Not,
                                ty,
                            },
                        );
                    }
                    tree.adopt(*func, ty);
                    added.insert(*func);
                    rewrites += 1;
                    global_name.clone()
                }
            };
            param_names.insert(*func, name);
        }

        for use_site in uses {
            let Some(func) = tree.enclosing_fn(use_site) else {
                continue;
            };
            let Some(param) = param_names.get(&func) else {
                continue;
            };
            if *param != global_name {
                if let Some(NodeKind::Expr(expr)) = tree.get_mut(use_site) {
                    *expr = Expr::Path(Path::single(param.as_str()));
                    rewrites += 1;
                }
            }
        }

        for (call, callee) in calls {
            if !added.contains(&callee) || !tree.is_attached(call) {
                continue;
            }
            let caller_param = tree.enclosing_fn(call).and_then(|f| param_names.get(&f));
            let arg = match caller_param {
                Some(param) => tree.alloc_expr(Expr::Path(Path::single(param.as_str()))),
                None => {
                    let operand = tree.alloc_expr(Expr::Path(Path::single(global_name.as_str())));
                    tree.alloc_expr(Expr::AddrOf {
                        mutability: Mutability::Mut,
                        operand,
                    })
                }
            };
            tree.insert_child(call, 0, arg)?;
            rewrites += 1;
        }
        debug!(
            global = %global_name,
            functions = needing.len(),
            "threaded global through functions"
        );
        Ok(rewrites)
    }
}

impl RefactorCommand for StaticToLocalRef {
    fn name(&self) -> &'static str {
        "static_to_local_ref"
    }

    fn description(&self) -> String {
        "static_to_local_ref".to_string()
    }

    fn apply(&self, ctx: &mut RefactorCtx) -> RefactorResult<()> {
        let users: BTreeSet<NodeId> = ctx
            .marked(USER_LABEL)
            .iter()
            .filter(|id| {
                matches!(
                    ctx.tree.item(*id),
                    Some(Item {
                        kind: ItemKind::Fn { body: Some(_), .. },
                        ..
                    })
                )
            })
            .collect();
        let globals: Vec<NodeId> = ctx
            .marked(DEFAULT_LABEL)
            .iter()
            .filter(|id| {
                matches!(
                    ctx.tree.item(*id),
                    Some(Item {
                        kind: ItemKind::Static { .. },
                        ..
                    })
                )
            })
            .collect();
        for global in globals {
            ctx.stats.rewrites += self.thread_static(&mut ctx.tree, global, &users)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ast::ToSource;
    use crate::parser::parse_crate;

    fn ctx_with_marked(src: &str, names: &[&str], label: &str) -> RefactorCtx {
        let mut ctx = RefactorCtx::new(parse_crate(src).unwrap());
        for name in names {
            let id = ctx.tree.find_item(name).unwrap();
            ctx.marks.mark_one(id, label);
        }
        ctx
    }

    #[test]
    fn test_collect_two_statics() {
        let src = "static mut a: i32 = 1;\nstatic mut b: i32 = 2;\n\
                   fn f() {\n    a = b + 1;\n}\n";
        let mut ctx = ctx_with_marked(src, &["a", "b"], DEFAULT_LABEL);
        StaticCollectToStruct {
            struct_name: "State".to_string(),
            instance_name: "S".to_string(),
        }
        .apply(&mut ctx)
        .unwrap();
        assert_eq!(
            ctx.tree.to_source(),
            "struct State {\n    a: i32,\n    b: i32,\n}\n\
             static mut S: State = State { a: 1, b: 2 };\n\
             fn f() {\n    S.a = S.b + 1;\n}\n"
        );
    }

    #[test]
    fn test_collect_uses_resolution_not_names() {
        let src = "static mut a: i32 = 1;\nfn f() {\n    let a = 5;\n    a;\n}\nfn g() {\n    a;\n}\n";
        let mut ctx = ctx_with_marked(src, &["a"], DEFAULT_LABEL);
        StaticCollectToStruct {
            struct_name: "State".to_string(),
            instance_name: "S".to_string(),
        }
        .apply(&mut ctx)
        .unwrap();
        let out = ctx.tree.to_source();
        assert!(out.contains("let a = 5;\n    a;\n"), "{out}");
        assert!(out.contains("fn g() {\n    S.a;\n}"), "{out}");
    }

    #[test]
    fn test_collect_conflicts() {
        let src = "static mut a: i32 = 1;\nmod m {\n    static mut b: i32 = 2;\n}\n";
        let mut ctx = ctx_with_marked(src, &["a", "b"], DEFAULT_LABEL);
        let command = StaticCollectToStruct {
            struct_name: "State".to_string(),
            instance_name: "S".to_string(),
        };
        assert!(matches!(
            command.apply(&mut ctx),
            Err(RefactorError::RewriteConflict { .. })
        ));

        let clash = "static mut a: i32 = 1;\nfn S() {}\n";
        let mut ctx = ctx_with_marked(clash, &["a"], DEFAULT_LABEL);
        assert!(matches!(
            command.apply(&mut ctx),
            Err(RefactorError::RewriteConflict { .. })
        ));
    }

    #[test]
    fn test_static_to_local_ref() {
        let src = "struct State {\n    x: i32,\n}\n\
                   static mut S: State = State { x: 0 };\n\
                   fn leaf() {\n    S.x = 1;\n}\n\
                   fn mid() {\n    leaf();\n}\n\
                   fn main() {\n    mid();\n}\n";
        let mut ctx = ctx_with_marked(src, &["S"], DEFAULT_LABEL);
        for name in ["leaf", "mid"] {
            let id = ctx.tree.find_item(name).unwrap();
            ctx.marks.mark_one(id, USER_LABEL);
        }
        StaticToLocalRef.apply(&mut ctx).unwrap();
        let out = ctx.tree.to_source();
        assert!(out.contains("fn leaf(S: &mut State) {\n    S.x = 1;\n}"), "{out}");
        assert!(out.contains("fn mid(S: &mut State) {\n    leaf(S);\n}"), "{out}");
        assert!(out.contains("fn main() {\n    mid(&mut S);\n}"), "{out}");
    }

    #[test]
    fn test_static_to_local_ref_reuses_param() {
        let src = "struct State {\n    x: i32,\n}\n\
                   static mut S: State = State { x: 0 };\n\
                   fn leaf(st: &mut State) {\n    S.x = 1;\n}\n\
                   fn main() {\n    leaf(&mut S);\n}\n";
        let mut ctx = ctx_with_marked(src, &["S"], DEFAULT_LABEL);
        let leaf = ctx.tree.find_item("leaf").unwrap();
        ctx.marks.mark_one(leaf, USER_LABEL);
        StaticToLocalRef.apply(&mut ctx).unwrap();
        let out = ctx.tree.to_source();
        assert!(out.contains("fn leaf(st: &mut State) {\n    st.x = 1;\n}"), "{out}");
        assert!(out.contains("fn main() {\n    leaf(&mut S);\n}"), "{out}");
    }
}
