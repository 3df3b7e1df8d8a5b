// Arena syntax tree for the refactoring engine.
// Every node lives in one `Tree` and is addressed by a `NodeId`. Replacing a
// node retires its id; retired ids are never handed out again.

pub mod resolve;
pub mod source_gen;
pub use resolve::Def;
pub use source_gen::ToSource;

#[cfg(test)]
mod source_gen_tests;

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable handle of a node inside a [`Tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    /// Used to blank out child slots when comparing node headers.
    pub(crate) const PLACEHOLDER: NodeId = NodeId(u32::MAX);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("node {0} is not live")]
    DeadNode(NodeId),

    #[error("node {child} is not a child of {parent}")]
    NotAChild { parent: NodeId, child: NodeId },

    #[error("node {0} has no child list")]
    NoChildList(NodeId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mutability {
    Not,
    Mut,
}

impl Mutability {
    pub fn is_mut(self) -> bool {
        matches!(self, Mutability::Mut)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Visibility {
    /// No modifier
    Inherited,
    /// `pub(crate)`
    Crate,
    /// `pub`
    Public,
}

/// `a::b::c`, optionally rooted with a leading `::`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Path {
    pub global: bool,
    pub segments: Vec<String>,
}

impl Path {
    pub fn single(name: impl Into<String>) -> Self {
        Self {
            global: false,
            segments: vec![name.into()],
        }
    }

    pub fn last(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }

    /// Name of the template hole this path stands for, if any (`__e`, `__t`, ...).
    pub fn hole(&self) -> Option<&str> {
        match self.segments.as_slice() {
            [name] if !self.global && name.starts_with("__") => Some(name),
            _ => None,
        }
    }

    /// Same path with the last segment swapped out.
    pub fn with_last(&self, name: &str) -> Self {
        let mut path = self.clone();
        if let Some(last) = path.segments.last_mut() {
            *last = name.to_string();
        }
        path
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.global {
            f.write_str("::")?;
        }
        f.write_str(&self.segments.join("::"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lit {
    Int { value: u128, suffix: Option<String> },
    Float { text: String },
    Bool(bool),
    Char(char),
    Byte(u8),
    Str(String),
    ByteStr(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnOp {
    Deref,
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    /// Binding strength used by both the parser and the printer.
    pub fn precedence(self) -> u8 {
        match self {
            BinOp::Or => 3,
            BinOp::And => 4,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => 5,
            BinOp::BitOr => 6,
            BinOp::BitXor => 7,
            BinOp::BitAnd => 8,
            BinOp::Shl | BinOp::Shr => 9,
            BinOp::Add | BinOp::Sub => 10,
            BinOp::Mul | BinOp::Div | BinOp::Rem => 11,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expr {
    Lit(Lit),
    Path(Path),
    Paren(NodeId),
    Tuple(Vec<NodeId>),
    Array(Vec<NodeId>),
    Repeat { elem: NodeId, len: NodeId },
    Call { func: NodeId, args: Vec<NodeId> },
    MethodCall { receiver: NodeId, method: String, args: Vec<NodeId> },
    Field { base: NodeId, name: String },
    Index { base: NodeId, index: NodeId },
    Cast { expr: NodeId, ty: NodeId },
    Unary { op: UnOp, operand: NodeId },
    AddrOf { mutability: Mutability, operand: NodeId },
    Binary { op: BinOp, lhs: NodeId, rhs: NodeId },
    Assign { lhs: NodeId, rhs: NodeId },
    AssignOp { op: BinOp, lhs: NodeId, rhs: NodeId },
    Block { is_unsafe: bool, stmts: Vec<NodeId> },
    If { cond: NodeId, then_branch: NodeId, else_branch: Option<NodeId> },
    While { cond: NodeId, body: NodeId },
    Loop { body: NodeId },
    Break,
    Continue,
    Return(Option<NodeId>),
    MacCall { path: Path, args: Vec<NodeId> },
    /// `P { f: v, .. }` with an optional `..base`
    Struct {
        path: Path,
        fields: Vec<(String, NodeId)>,
        base: Option<NodeId>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ty {
    Path { path: Path, args: Vec<NodeId> },
    Ptr { mutability: Mutability, pointee: NodeId },
    Ref { lifetime: Option<String>, mutability: Mutability, pointee: NodeId },
    Array { elem: NodeId, len: NodeId },
    Slice(NodeId),
    Tuple(Vec<NodeId>),
    Never,
    Infer,
    /// Type-position macro, only meaningful inside patterns (`marked!(..)`)
    Mac { path: Path, args: Vec<NodeId> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stmt {
    Let {
        name: String,
        mutability: Mutability,
        ty: Option<NodeId>,
        init: Option<NodeId>,
    },
    Expr { expr: NodeId, semi: bool },
    Item(NodeId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub mutability: Mutability,
    pub ty: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub vis: Visibility,
    pub name: String,
    pub ty: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    /// Foreign functions have no body.
    Fn {
        is_unsafe: bool,
        abi: Option<String>,
        params: Vec<Param>,
        variadic: bool,
        ret: Option<NodeId>,
        body: Option<NodeId>,
    },
    /// Foreign statics have no initializer.
    Static {
        mutability: Mutability,
        ty: NodeId,
        init: Option<NodeId>,
    },
    Const { ty: NodeId, init: NodeId },
    Struct { fields: Vec<FieldDef> },
    TypeAlias { ty: NodeId },
    Mod { items: Vec<NodeId> },
    ForeignMod { abi: String, items: Vec<NodeId> },
    MacroRules { body: String },
    Use { tree: String },
    ExternCrate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub attrs: Vec<String>,
    pub vis: Visibility,
    /// Empty for unnamed items (foreign blocks, `use`)
    pub name: String,
    pub kind: ItemKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Crate {
    /// Inner attributes, verbatim (`#![allow(..)]`)
    pub attrs: Vec<String>,
    pub items: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Crate(Crate),
    Item(Item),
    Stmt(Stmt),
    Expr(Expr),
    Ty(Ty),
}

/// Coarse node category, used to keep template holes well-typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Crate,
    Item,
    Stmt,
    Expr,
    Ty,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Crate => "crate",
            Category::Item => "item",
            Category::Stmt => "statement",
            Category::Expr => "expression",
            Category::Ty => "type",
        };
        f.write_str(name)
    }
}

impl NodeKind {
    pub fn category(&self) -> Category {
        match self {
            NodeKind::Crate(_) => Category::Crate,
            NodeKind::Item(_) => Category::Item,
            NodeKind::Stmt(_) => Category::Stmt,
            NodeKind::Expr(_) => Category::Expr,
            NodeKind::Ty(_) => Category::Ty,
        }
    }

    /// Item or local binding name.
    pub fn name(&self) -> Option<&str> {
        match self {
            NodeKind::Item(item) if !item.name.is_empty() => Some(&item.name),
            NodeKind::Stmt(Stmt::Let { name, .. }) => Some(name),
            _ => None,
        }
    }

    /// Hole name when this node is a template hole.
    pub fn hole(&self) -> Option<&str> {
        match self {
            NodeKind::Expr(Expr::Path(path)) => path.hole(),
            NodeKind::Ty(Ty::Path { path, args }) if args.is_empty() => path.hole(),
            _ => None,
        }
    }

    /// Direct children in source order.
    pub fn children(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        match self {
            NodeKind::Crate(krate) => out.extend(&krate.items),
            NodeKind::Item(item) => match &item.kind {
                ItemKind::Fn { params, ret, body, .. } => {
                    out.extend(params.iter().map(|p| p.ty));
                    out.extend(ret);
                    out.extend(body);
                }
                ItemKind::Static { ty, init, .. } => {
                    out.push(*ty);
                    out.extend(init);
                }
                ItemKind::Const { ty, init } => {
                    out.push(*ty);
                    out.push(*init);
                }
                ItemKind::Struct { fields } => out.extend(fields.iter().map(|f| f.ty)),
                ItemKind::TypeAlias { ty } => out.push(*ty),
                ItemKind::Mod { items } | ItemKind::ForeignMod { items, .. } => out.extend(items),
                ItemKind::MacroRules { .. } | ItemKind::Use { .. } | ItemKind::ExternCrate => {}
            },
            NodeKind::Stmt(stmt) => match stmt {
                Stmt::Let { ty, init, .. } => {
                    out.extend(ty);
                    out.extend(init);
                }
                Stmt::Expr { expr, .. } => out.push(*expr),
                Stmt::Item(item) => out.push(*item),
            },
            NodeKind::Expr(expr) => match expr {
                Expr::Lit(_) | Expr::Path(_) | Expr::Break | Expr::Continue => {}
                Expr::Paren(inner) => out.push(*inner),
                Expr::Tuple(elems) | Expr::Array(elems) => out.extend(elems),
                Expr::Repeat { elem, len } => {
                    out.push(*elem);
                    out.push(*len);
                }
                Expr::Call { func, args } => {
                    out.push(*func);
                    out.extend(args);
                }
                Expr::MethodCall { receiver, args, .. } => {
                    out.push(*receiver);
                    out.extend(args);
                }
                Expr::Field { base, .. } => out.push(*base),
                Expr::Index { base, index } => {
                    out.push(*base);
                    out.push(*index);
                }
                Expr::Cast { expr, ty } => {
                    out.push(*expr);
                    out.push(*ty);
                }
                Expr::Unary { operand, .. } | Expr::AddrOf { operand, .. } => out.push(*operand),
                Expr::Binary { lhs, rhs, .. }
                | Expr::Assign { lhs, rhs }
                | Expr::AssignOp { lhs, rhs, .. } => {
                    out.push(*lhs);
                    out.push(*rhs);
                }
                Expr::Block { stmts, .. } => out.extend(stmts),
                Expr::If { cond, then_branch, else_branch } => {
                    out.push(*cond);
                    out.push(*then_branch);
                    out.extend(else_branch);
                }
                Expr::While { cond, body } => {
                    out.push(*cond);
                    out.push(*body);
                }
                Expr::Loop { body } => out.push(*body),
                Expr::Return(value) => out.extend(value),
                Expr::MacCall { args, .. } => out.extend(args),
                Expr::Struct { fields, base, .. } => {
                    out.extend(fields.iter().map(|(_, e)| *e));
                    out.extend(base);
                }
            },
            NodeKind::Ty(ty) => match ty {
                Ty::Path { args, .. } | Ty::Mac { args, .. } | Ty::Tuple(args) => out.extend(args),
                Ty::Ptr { pointee, .. } | Ty::Ref { pointee, .. } | Ty::Slice(pointee) => {
                    out.push(*pointee)
                }
                Ty::Array { elem, len } => {
                    out.push(*elem);
                    out.push(*len);
                }
                Ty::Never | Ty::Infer => {}
            },
        }
        out
    }

    /// Mutable child slots, in the same order as [`NodeKind::children`].
    pub fn children_mut(&mut self) -> Vec<&mut NodeId> {
        let mut out: Vec<&mut NodeId> = Vec::new();
        match self {
            NodeKind::Crate(krate) => out.extend(krate.items.iter_mut()),
            NodeKind::Item(item) => match &mut item.kind {
                ItemKind::Fn { params, ret, body, .. } => {
                    out.extend(params.iter_mut().map(|p| &mut p.ty));
                    out.extend(ret.iter_mut());
                    out.extend(body.iter_mut());
                }
                ItemKind::Static { ty, init, .. } => {
                    out.push(ty);
                    out.extend(init.iter_mut());
                }
                ItemKind::Const { ty, init } => {
                    out.push(ty);
                    out.push(init);
                }
                ItemKind::Struct { fields } => out.extend(fields.iter_mut().map(|f| &mut f.ty)),
                ItemKind::TypeAlias { ty } => out.push(ty),
                ItemKind::Mod { items } | ItemKind::ForeignMod { items, .. } => {
                    out.extend(items.iter_mut())
                }
                ItemKind::MacroRules { .. } | ItemKind::Use { .. } | ItemKind::ExternCrate => {}
            },
            NodeKind::Stmt(stmt) => match stmt {
                Stmt::Let { ty, init, .. } => {
                    out.extend(ty.iter_mut());
                    out.extend(init.iter_mut());
                }
                Stmt::Expr { expr, .. } => out.push(expr),
                Stmt::Item(item) => out.push(item),
            },
            NodeKind::Expr(expr) => match expr {
                Expr::Lit(_) | Expr::Path(_) | Expr::Break | Expr::Continue => {}
                Expr::Paren(inner) => out.push(inner),
                Expr::Tuple(elems) | Expr::Array(elems) => out.extend(elems.iter_mut()),
                Expr::Repeat { elem, len } => {
                    out.push(elem);
                    out.push(len);
                }
                Expr::Call { func, args } => {
                    out.push(func);
                    out.extend(args.iter_mut());
                }
                Expr::MethodCall { receiver, args, .. } => {
                    out.push(receiver);
                    out.extend(args.iter_mut());
                }
                Expr::Field { base, .. } => out.push(base),
                Expr::Index { base, index } => {
                    out.push(base);
                    out.push(index);
                }
                Expr::Cast { expr, ty } => {
                    out.push(expr);
                    out.push(ty);
                }
                Expr::Unary { operand, .. } | Expr::AddrOf { operand, .. } => out.push(operand),
                Expr::Binary { lhs, rhs, .. }
                | Expr::Assign { lhs, rhs }
                | Expr::AssignOp { lhs, rhs, .. } => {
                    out.push(lhs);
                    out.push(rhs);
                }
                Expr::Block { stmts, .. } => out.extend(stmts.iter_mut()),
                Expr::If { cond, then_branch, else_branch } => {
                    out.push(cond);
                    out.push(then_branch);
                    out.extend(else_branch.iter_mut());
                }
                Expr::While { cond, body } => {
                    out.push(cond);
                    out.push(body);
                }
                Expr::Loop { body } => out.push(body),
                Expr::Return(value) => out.extend(value.iter_mut()),
                Expr::MacCall { args, .. } => out.extend(args.iter_mut()),
                Expr::Struct { fields, base, .. } => {
                    out.extend(fields.iter_mut().map(|(_, e)| e));
                    out.extend(base.iter_mut());
                }
            },
            NodeKind::Ty(ty) => match ty {
                Ty::Path { args, .. } | Ty::Mac { args, .. } | Ty::Tuple(args) => {
                    out.extend(args.iter_mut())
                }
                Ty::Ptr { pointee, .. } | Ty::Ref { pointee, .. } | Ty::Slice(pointee) => {
                    out.push(pointee)
                }
                Ty::Array { elem, len } => {
                    out.push(elem);
                    out.push(len);
                }
                Ty::Never | Ty::Infer => {}
            },
        }
        out
    }

    /// The node's own list of children that can grow or shrink.
    fn child_list_mut(&mut self) -> Option<&mut Vec<NodeId>> {
        match self {
            NodeKind::Crate(krate) => Some(&mut krate.items),
            NodeKind::Item(Item {
                kind: ItemKind::Mod { items } | ItemKind::ForeignMod { items, .. },
                ..
            }) => Some(items),
            NodeKind::Expr(
                Expr::Block { stmts: list, .. }
                | Expr::Call { args: list, .. }
                | Expr::MethodCall { args: list, .. }
                | Expr::MacCall { args: list, .. }
                | Expr::Array(list)
                | Expr::Tuple(list),
            ) => Some(list),
            _ => None,
        }
    }

    /// Copy of this node with every child slot blanked, for shape comparison.
    pub(crate) fn header(&self) -> NodeKind {
        let mut header = self.clone();
        for child in header.children_mut() {
            *child = NodeId::PLACEHOLDER;
        }
        header
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Slot {
    node: NodeKind,
    parent: Option<NodeId>,
}

/// Ownership-rooted mutable syntax tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    slots: Vec<Option<Slot>>,
    root: NodeId,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// A tree whose root is an empty crate.
    pub fn new() -> Self {
        let mut tree = Self::empty();
        let root = tree.alloc(NodeKind::Crate(Crate::default()));
        tree.root = root;
        tree
    }

    /// A tree without nodes; the caller sets the root once it exists.
    pub fn empty() -> Self {
        Self {
            slots: Vec::new(),
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn set_root(&mut self, root: NodeId) {
        self.root = root;
        if let Some(slot) = self.slot_mut(root) {
            slot.parent = None;
        }
    }

    /// Number of ids ever handed out, live or retired.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Adds a node and adopts its children.
    pub fn alloc(&mut self, node: NodeKind) -> NodeId {
        let id = NodeId(self.slots.len() as u32);
        for child in node.children() {
            if let Some(slot) = self.slot_mut(child) {
                slot.parent = Some(id);
            }
        }
        self.slots.push(Some(Slot { node, parent: None }));
        id
    }

    pub fn alloc_expr(&mut self, expr: Expr) -> NodeId {
        self.alloc(NodeKind::Expr(expr))
    }

    pub fn alloc_ty(&mut self, ty: Ty) -> NodeId {
        self.alloc(NodeKind::Ty(ty))
    }

    fn slot(&self, id: NodeId) -> Option<&Slot> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, id: NodeId) -> Option<&mut Slot> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        self.slot(id).is_some()
    }

    /// Live and reachable from the root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = id;
        loop {
            if !self.is_live(current) {
                return false;
            }
            if current == self.root {
                return true;
            }
            match self.parent(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&NodeKind> {
        self.slot(id).map(|s| &s.node)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut NodeKind> {
        self.slot_mut(id).map(|s| &mut s.node)
    }

    pub fn node(&self, id: NodeId) -> Result<&NodeKind, TreeError> {
        self.get(id).ok_or(TreeError::DeadNode(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeKind, TreeError> {
        self.get_mut(id).ok_or(TreeError::DeadNode(id))
    }

    pub fn expr(&self, id: NodeId) -> Option<&Expr> {
        match self.get(id)? {
            NodeKind::Expr(expr) => Some(expr),
            _ => None,
        }
    }

    pub fn ty(&self, id: NodeId) -> Option<&Ty> {
        match self.get(id)? {
            NodeKind::Ty(ty) => Some(ty),
            _ => None,
        }
    }

    pub fn item(&self, id: NodeId) -> Option<&Item> {
        match self.get(id)? {
            NodeKind::Item(item) => Some(item),
            _ => None,
        }
    }

    pub fn item_mut(&mut self, id: NodeId) -> Option<&mut Item> {
        match self.get_mut(id)? {
            NodeKind::Item(item) => Some(item),
            _ => None,
        }
    }

    pub fn stmt(&self, id: NodeId) -> Option<&Stmt> {
        match self.get(id)? {
            NodeKind::Stmt(stmt) => Some(stmt),
            _ => None,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.slot(id).and_then(|s| s.parent)
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.get(id).map(NodeKind::children).unwrap_or_default()
    }

    /// Parent chain, nearest first.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.parent(id);
        while let Some(parent) = current {
            out.push(parent);
            current = self.parent(parent);
        }
        out
    }

    /// Nearest enclosing function item.
    pub fn enclosing_fn(&self, id: NodeId) -> Option<NodeId> {
        self.ancestors(id)
            .into_iter()
            .find(|a| matches!(self.item(*a), Some(Item { kind: ItemKind::Fn { .. }, .. })))
    }

    /// `from` and everything below it, in pre-order.
    pub fn preorder(&self, from: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            if !self.is_live(id) {
                continue;
            }
            out.push(id);
            let children = self.children(id);
            stack.extend(children.into_iter().rev());
        }
        out
    }

    /// Strict descendants of `id`, in pre-order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut all = self.preorder(id);
        if !all.is_empty() {
            all.remove(0);
        }
        all
    }

    /// Position of every attached node in a whole-tree pre-order walk.
    pub fn preorder_index(&self) -> HashMap<NodeId, usize> {
        self.preorder(self.root)
            .into_iter()
            .enumerate()
            .map(|(i, id)| (id, i))
            .collect()
    }

    /// Puts `new` where `old` was. `old` becomes detached but stays live
    /// until retired.
    pub fn replace(&mut self, old: NodeId, new: NodeId) -> Result<(), TreeError> {
        let parent = self.slot(old).ok_or(TreeError::DeadNode(old))?.parent;
        if !self.is_live(new) {
            return Err(TreeError::DeadNode(new));
        }
        match parent {
            Some(parent) => {
                let node = self.node_mut(parent)?;
                let slot = node
                    .children_mut()
                    .into_iter()
                    .find(|c| **c == old)
                    .ok_or(TreeError::NotAChild { parent, child: old })?;
                *slot = new;
            }
            None if self.root == old => self.root = new,
            None => {}
        }
        if let Some(slot) = self.slot_mut(new) {
            slot.parent = parent;
        }
        if let Some(slot) = self.slot_mut(old) {
            slot.parent = None;
        }
        Ok(())
    }

    /// Retires `id` and its subtree, except nodes in `keep` (and their own
    /// subtrees), which have been moved elsewhere.
    pub fn retire(&mut self, id: NodeId, keep: &HashSet<NodeId>) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if keep.contains(&current) {
                continue;
            }
            let children = self.children(current);
            if let Some(slot) = self.slots.get_mut(current.index()) {
                *slot = None;
            }
            stack.extend(children);
        }
    }

    /// Unlinks `child` from its parent's child list.
    pub fn detach(&mut self, child: NodeId) -> Result<(), TreeError> {
        let parent = self.parent(child).ok_or(TreeError::DeadNode(child))?;
        let list = self
            .node_mut(parent)?
            .child_list_mut()
            .ok_or(TreeError::NoChildList(parent))?;
        let pos = list
            .iter()
            .position(|c| *c == child)
            .ok_or(TreeError::NotAChild { parent, child })?;
        list.remove(pos);
        if let Some(slot) = self.slot_mut(child) {
            slot.parent = None;
        }
        Ok(())
    }

    /// Detaches and retires an item, statement or list element.
    pub fn remove(&mut self, id: NodeId) -> Result<(), TreeError> {
        self.detach(id)?;
        self.retire(id, &HashSet::new());
        Ok(())
    }

    /// Inserts `child` into `parent`'s child list at `index` (clamped).
    pub fn insert_child(
        &mut self,
        parent: NodeId,
        index: usize,
        child: NodeId,
    ) -> Result<(), TreeError> {
        if !self.is_live(child) {
            return Err(TreeError::DeadNode(child));
        }
        let list = self
            .node_mut(parent)?
            .child_list_mut()
            .ok_or(TreeError::NoChildList(parent))?;
        let index = index.min(list.len());
        list.insert(index, child);
        self.adopt(parent, child);
        Ok(())
    }

    /// Position of `child` inside its parent's child list.
    pub fn index_in_parent(&self, child: NodeId) -> Option<(NodeId, usize)> {
        let parent = self.parent(child)?;
        let position = self.children(parent).iter().position(|c| *c == child)?;
        Some((parent, position))
    }

    /// Records `parent` as the parent of `child` after a caller edited a
    /// child slot directly.
    pub(crate) fn adopt(&mut self, parent: NodeId, child: NodeId) {
        if let Some(slot) = self.slot_mut(child) {
            slot.parent = Some(parent);
        }
    }

    /// Copies a subtree inside this tree; every copied node gets a fresh id.
    pub fn deep_clone(&mut self, id: NodeId) -> Result<NodeId, TreeError> {
        let mut node = self.node(id)?.clone();
        for child in node.children_mut() {
            *child = self.deep_clone(*child)?;
        }
        Ok(self.alloc(node))
    }

    /// Copies a subtree of another tree into this one. The copy is detached.
    pub fn import(&mut self, src: &Tree, id: NodeId) -> Result<NodeId, TreeError> {
        let mut node = src.node(id)?.clone();
        for child in node.children_mut() {
            *child = self.import(src, *child)?;
        }
        Ok(self.alloc(node))
    }

    /// Items directly inside a crate, module or foreign block.
    pub fn item_list(&self, id: NodeId) -> &[NodeId] {
        match self.get(id) {
            Some(NodeKind::Crate(krate)) => krate.items.as_slice(),
            Some(NodeKind::Item(Item {
                kind: ItemKind::Mod { items } | ItemKind::ForeignMod { items, .. },
                ..
            })) => items.as_slice(),
            _ => &[],
        }
    }

    /// All items in the tree, pre-order.
    pub fn all_items(&self) -> Vec<NodeId> {
        self.preorder(self.root)
            .into_iter()
            .filter(|id| self.item(*id).is_some())
            .collect()
    }

    /// First item named `name` anywhere in the tree.
    pub fn find_item(&self, name: &str) -> Option<NodeId> {
        self.all_items()
            .into_iter()
            .find(|id| self.item(*id).is_some_and(|item| item.name == name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(tree: &mut Tree, value: u128) -> NodeId {
        tree.alloc_expr(Expr::Lit(Lit::Int { value, suffix: None }))
    }

    #[test]
    fn test_alloc_sets_parents() {
        let mut tree = Tree::empty();
        let a = lit(&mut tree, 1);
        let b = lit(&mut tree, 2);
        let sum = tree.alloc_expr(Expr::Binary { op: BinOp::Add, lhs: a, rhs: b });
        tree.set_root(sum);
        assert_eq!(tree.parent(a), Some(sum));
        assert_eq!(tree.parent(b), Some(sum));
        assert_eq!(tree.preorder(sum), vec![sum, a, b]);
    }

    #[test]
    fn test_replace_retires_old_id() {
        let mut tree = Tree::empty();
        let a = lit(&mut tree, 1);
        let b = lit(&mut tree, 2);
        let sum = tree.alloc_expr(Expr::Binary { op: BinOp::Add, lhs: a, rhs: b });
        tree.set_root(sum);

        let c = lit(&mut tree, 3);
        tree.replace(b, c).unwrap();
        tree.retire(b, &HashSet::new());

        assert!(!tree.is_live(b));
        assert!(tree.is_attached(c));
        assert_eq!(tree.children(sum), vec![a, c]);

        // Retired ids are never handed out again.
        let d = lit(&mut tree, 4);
        assert_ne!(d, b);
    }

    #[test]
    fn test_retire_keeps_moved_nodes() {
        let mut tree = Tree::empty();
        let a = lit(&mut tree, 1);
        let paren = tree.alloc_expr(Expr::Paren(a));
        tree.set_root(paren);

        tree.replace(paren, a).unwrap();
        tree.retire(paren, &HashSet::from([a]));

        assert!(!tree.is_live(paren));
        assert_eq!(tree.root(), a);
        assert!(tree.is_attached(a));
    }

    #[test]
    fn test_detach_and_insert_child() {
        let mut tree = Tree::new();
        let root = tree.root();
        let item = tree.alloc(NodeKind::Item(Item {
            attrs: Vec::new(),
            vis: Visibility::Inherited,
            name: "x".to_string(),
            kind: ItemKind::ExternCrate,
        }));
        tree.insert_child(root, 0, item).unwrap();
        assert_eq!(tree.item_list(root), &[item]);
        assert_eq!(tree.find_item("x"), Some(item));

        tree.remove(item).unwrap();
        assert!(tree.item_list(root).is_empty());
        assert!(!tree.is_live(item));
    }

    #[test]
    fn test_import_copies_with_fresh_ids() {
        let mut src = Tree::empty();
        let a = lit(&mut src, 7);
        let neg = src.alloc_expr(Expr::Unary { op: UnOp::Neg, operand: a });
        src.set_root(neg);

        let mut dst = Tree::new();
        let copy = dst.import(&src, neg).unwrap();
        assert!(dst.is_live(copy));
        assert!(!dst.is_attached(copy));
        assert_eq!(dst.children(copy).len(), 1);
    }
}
