// Name resolution over the arena tree.
// Lexical and deliberately small: locals and parameters first, then the
// items of the enclosing module (including foreign blocks), then paths
// walked from the crate root.

use super::{Expr, Item, ItemKind, NodeId, NodeKind, Path, Stmt, Tree};

/// What a path refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Def {
    Item(NodeId),
    /// A `let` statement
    Local(NodeId),
    Param { func: NodeId, index: usize },
}

impl Tree {
    /// Resolves a path expression node.
    pub fn resolve_expr(&self, expr: NodeId) -> Option<Def> {
        match self.expr(expr)? {
            Expr::Path(path) => self.resolve_path(expr, path),
            _ => None,
        }
    }

    /// Resolves `path` as seen from node `at`.
    pub fn resolve_path(&self, at: NodeId, path: &Path) -> Option<Def> {
        if path.global {
            return self
                .lookup_item_path(self.root(), &path.segments)
                .map(Def::Item);
        }
        match path.segments.as_slice() {
            [] => None,
            [name] => self.resolve_name(at, name),
            segments => {
                let module = self.enclosing_module(at);
                self.lookup_item_path(module, segments)
                    .or_else(|| self.lookup_item_path(self.root(), segments))
                    .map(Def::Item)
            }
        }
    }

    fn resolve_name(&self, at: NodeId, name: &str) -> Option<Def> {
        let mut child = at;
        for ancestor in self.ancestors(at) {
            match self.get(ancestor)? {
                NodeKind::Expr(Expr::Block { stmts, .. }) => {
                    let position = stmts.iter().position(|s| *s == child).unwrap_or(stmts.len());
                    for stmt in stmts[..position].iter().rev() {
                        if let Some(Stmt::Let { name: local, .. }) = self.stmt(*stmt) {
                            if local == name {
                                return Some(Def::Local(*stmt));
                            }
                        }
                    }
                    for stmt in stmts {
                        if let Some(Stmt::Item(item)) = self.stmt(*stmt) {
                            if self.item(*item).is_some_and(|i| i.name == name) {
                                return Some(Def::Item(*item));
                            }
                        }
                    }
                }
                NodeKind::Item(Item {
                    kind: ItemKind::Fn { params, .. },
                    ..
                }) => {
                    if let Some(index) = params.iter().position(|p| p.name == name) {
                        return Some(Def::Param { func: ancestor, index });
                    }
                }
                NodeKind::Crate(_)
                | NodeKind::Item(Item {
                    kind: ItemKind::Mod { .. },
                    ..
                }) => return self.module_member(ancestor, name).map(Def::Item),
                _ => {}
            }
            child = ancestor;
        }
        None
    }

    /// The module or crate that contains `id`.
    pub fn enclosing_module(&self, id: NodeId) -> NodeId {
        self.ancestors(id)
            .into_iter()
            .find(|a| {
                matches!(
                    self.get(*a),
                    Some(NodeKind::Crate(_))
                        | Some(NodeKind::Item(Item {
                            kind: ItemKind::Mod { .. },
                            ..
                        }))
                )
            })
            .unwrap_or_else(|| self.root())
    }

    /// Item named `name` declared directly in a module, looking through
    /// foreign blocks.
    pub fn module_member(&self, module: NodeId, name: &str) -> Option<NodeId> {
        for item_id in self.item_list(module) {
            let Some(item) = self.item(*item_id) else {
                continue;
            };
            if item.name == name {
                return Some(*item_id);
            }
            if let ItemKind::ForeignMod { items, .. } = &item.kind {
                if let Some(found) = items
                    .iter()
                    .find(|f| self.item(**f).is_some_and(|i| i.name == name))
                {
                    return Some(*found);
                }
            }
        }
        None
    }

    /// Walks `segments` through nested modules starting at `module`.
    pub fn lookup_item_path(&self, module: NodeId, segments: &[String]) -> Option<NodeId> {
        let (last, init) = segments.split_last()?;
        let mut current = module;
        for segment in init {
            let next = self.module_member(current, segment)?;
            match self.item(next) {
                Some(Item {
                    kind: ItemKind::Mod { .. },
                    ..
                }) => current = next,
                _ => return None,
            }
        }
        self.module_member(current, last)
    }

    /// Declared type node of a resolved definition, when it has one.
    pub fn def_type(&self, def: Def) -> Option<NodeId> {
        match def {
            Def::Item(item) => match &self.item(item)?.kind {
                ItemKind::Static { ty, .. } | ItemKind::Const { ty, .. } => Some(*ty),
                _ => None,
            },
            Def::Local(stmt) => match self.stmt(stmt)? {
                Stmt::Let { ty, .. } => *ty,
                _ => None,
            },
            Def::Param { func, index } => match &self.item(func)?.kind {
                ItemKind::Fn { params, .. } => params.get(index).map(|p| p.ty),
                _ => None,
            },
        }
    }

    /// Calls anywhere in the tree whose callee resolves to `func`.
    pub fn callers_of(&self, func: NodeId) -> Vec<NodeId> {
        self.preorder(self.root())
            .into_iter()
            .filter(|id| match self.expr(*id) {
                Some(Expr::Call { func: callee, .. }) => {
                    self.resolve_expr(*callee) == Some(Def::Item(func))
                }
                _ => false,
            })
            .collect()
    }

    /// Path expressions anywhere in the tree that resolve to `def`.
    pub fn uses_of(&self, def: Def) -> Vec<NodeId> {
        self.preorder(self.root())
            .into_iter()
            .filter(|id| {
                matches!(self.expr(*id), Some(Expr::Path(_))) && self.resolve_expr(*id) == Some(def)
            })
            .collect()
    }
}
