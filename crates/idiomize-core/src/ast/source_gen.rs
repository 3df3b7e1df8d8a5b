// Source code generation from the arena tree.
// Output is plain Rust text with four-space indentation. Expressions are
// printed with the minimum parentheses their precedence requires, on top of
// any parentheses the source already had.

use super::*;

const INDENT: &str = "    ";

/// Trait for types that can generate their source code representation
pub trait ToSource {
    fn to_source(&self) -> String;
}

impl ToSource for Tree {
    fn to_source(&self) -> String {
        SourceGen::new(self).node(self.root(), 0)
    }
}

/// Precedence levels shared by the printer and the parser.
pub(crate) mod prec {
    pub const ASSIGN: u8 = 1;
    pub const CAST: u8 = 12;
    pub const UNARY: u8 = 13;
    pub const POSTFIX: u8 = 14;
    pub const ATOM: u8 = 15;
}

/// Printer over one tree.
pub struct SourceGen<'a> {
    tree: &'a Tree,
    erase_lifetimes: bool,
}

impl<'a> SourceGen<'a> {
    pub fn new(tree: &'a Tree) -> Self {
        Self {
            tree,
            erase_lifetimes: false,
        }
    }

    /// Drop lifetimes from reference types, for shape comparison.
    pub fn erase_lifetimes(mut self) -> Self {
        self.erase_lifetimes = true;
        self
    }

    pub fn node(&self, id: NodeId, indent: usize) -> String {
        match self.tree.get(id) {
            Some(NodeKind::Crate(krate)) => self.krate(krate),
            Some(NodeKind::Item(item)) => self.item(item, indent),
            Some(NodeKind::Stmt(stmt)) => self.stmt(stmt, indent),
            Some(NodeKind::Expr(_)) => self.expr(id, indent, 0),
            Some(NodeKind::Ty(_)) => self.ty(id),
            None => format!("/* dead {id} */"),
        }
    }

    fn krate(&self, krate: &Crate) -> String {
        let mut out = String::new();
        for attr in &krate.attrs {
            out.push_str(attr);
            out.push('\n');
        }
        if !krate.attrs.is_empty() && !krate.items.is_empty() {
            out.push('\n');
        }
        for item in &krate.items {
            out.push_str(&self.node(*item, 0));
            out.push('\n');
        }
        out
    }

    fn item(&self, item: &Item, indent: usize) -> String {
        let pad = INDENT.repeat(indent);
        let mut out = String::new();
        for attr in &item.attrs {
            out.push_str(attr);
            out.push('\n');
            out.push_str(&pad);
        }
        out.push_str(match item.vis {
            Visibility::Inherited => "",
            Visibility::Crate => "pub(crate) ",
            Visibility::Public => "pub ",
        });
        let name = &item.name;
        match &item.kind {
            ItemKind::Fn {
                is_unsafe,
                abi,
                params,
                variadic,
                ret,
                body,
            } => {
                if *is_unsafe {
                    out.push_str("unsafe ");
                }
                if let Some(abi) = abi {
                    out.push_str(&format!("extern \"{abi}\" "));
                }
                let mut params_str: Vec<String> = params
                    .iter()
                    .map(|p| {
                        let mutability = if p.mutability.is_mut() { "mut " } else { "" };
                        format!("{mutability}{}: {}", p.name, self.ty(p.ty))
                    })
                    .collect();
                if *variadic {
                    params_str.push("...".to_string());
                }
                out.push_str(&format!("fn {name}({})", params_str.join(", ")));
                if let Some(ret) = ret {
                    out.push_str(&format!(" -> {}", self.ty(*ret)));
                }
                match body {
                    Some(body) => {
                        out.push(' ');
                        out.push_str(&self.expr(*body, indent, 0));
                    }
                    None => out.push(';'),
                }
            }
            ItemKind::Static {
                mutability,
                ty,
                init,
            } => {
                let mutability = if mutability.is_mut() { "mut " } else { "" };
                out.push_str(&format!("static {mutability}{name}: {}", self.ty(*ty)));
                if let Some(init) = init {
                    out.push_str(&format!(" = {}", self.expr(*init, indent, 0)));
                }
                out.push(';');
            }
            ItemKind::Const { ty, init } => {
                out.push_str(&format!(
                    "const {name}: {} = {};",
                    self.ty(*ty),
                    self.expr(*init, indent, 0)
                ));
            }
            ItemKind::Struct { fields } => {
                if fields.is_empty() {
                    out.push_str(&format!("struct {name} {{}}"));
                } else {
                    out.push_str(&format!("struct {name} {{\n"));
                    for field in fields {
                        let vis = match field.vis {
                            Visibility::Inherited => "",
                            Visibility::Crate => "pub(crate) ",
                            Visibility::Public => "pub ",
                        };
                        out.push_str(&format!(
                            "{pad}{INDENT}{vis}{}: {},\n",
                            field.name,
                            self.ty(field.ty)
                        ));
                    }
                    out.push_str(&pad);
                    out.push('}');
                }
            }
            ItemKind::TypeAlias { ty } => {
                out.push_str(&format!("type {name} = {};", self.ty(*ty)));
            }
            ItemKind::Mod { items } => {
                out.push_str(&format!("mod {name} "));
                out.push_str(&self.item_block(items, indent));
            }
            ItemKind::ForeignMod { abi, items } => {
                out.push_str(&format!("extern \"{abi}\" "));
                out.push_str(&self.item_block(items, indent));
            }
            ItemKind::MacroRules { body } => {
                out.push_str(&format!("macro_rules! {name} {body}"));
                if !body.starts_with('{') {
                    out.push(';');
                }
            }
            ItemKind::Use { tree } => out.push_str(&format!("use {tree};")),
            ItemKind::ExternCrate => out.push_str(&format!("extern crate {name};")),
        }
        out
    }

    fn item_block(&self, items: &[NodeId], indent: usize) -> String {
        if items.is_empty() {
            return "{}".to_string();
        }
        let pad = INDENT.repeat(indent + 1);
        let mut out = String::from("{\n");
        for item in items {
            out.push_str(&pad);
            out.push_str(&self.node(*item, indent + 1));
            out.push('\n');
        }
        out.push_str(&INDENT.repeat(indent));
        out.push('}');
        out
    }

    fn stmt(&self, stmt: &Stmt, indent: usize) -> String {
        match stmt {
            Stmt::Let {
                name,
                mutability,
                ty,
                init,
            } => {
                let mut out = String::from("let ");
                if mutability.is_mut() {
                    out.push_str("mut ");
                }
                out.push_str(name);
                if let Some(ty) = ty {
                    out.push_str(&format!(": {}", self.ty(*ty)));
                }
                if let Some(init) = init {
                    out.push_str(&format!(" = {}", self.expr(*init, indent, 0)));
                }
                out.push(';');
                out
            }
            Stmt::Expr { expr, semi } => {
                let mut out = self.expr(*expr, indent, 0);
                if *semi {
                    out.push(';');
                }
                out
            }
            Stmt::Item(item) => self.node(*item, indent),
        }
    }

    fn precedence(&self, id: NodeId) -> u8 {
        match self.tree.expr(id) {
            Some(Expr::Assign { .. } | Expr::AssignOp { .. }) => prec::ASSIGN,
            Some(Expr::Return(_)) => prec::ASSIGN,
            Some(Expr::Binary { op, .. }) => op.precedence(),
            Some(Expr::Cast { .. }) => prec::CAST,
            Some(Expr::Unary { .. } | Expr::AddrOf { .. }) => prec::UNARY,
            Some(
                Expr::Call { .. }
                | Expr::MethodCall { .. }
                | Expr::Field { .. }
                | Expr::Index { .. },
            ) => prec::POSTFIX,
            _ => prec::ATOM,
        }
    }

    /// Prints an expression, parenthesized when it binds looser than `min`.
    fn expr(&self, id: NodeId, indent: usize, min: u8) -> String {
        let text = self.expr_inner(id, indent);
        if self.precedence(id) < min {
            format!("({text})")
        } else {
            text
        }
    }

    fn list(&self, ids: &[NodeId], indent: usize) -> String {
        ids.iter()
            .map(|id| self.node(*id, indent))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn expr_inner(&self, id: NodeId, indent: usize) -> String {
        let Some(expr) = self.tree.expr(id) else {
            return self.node(id, indent);
        };
        match expr {
            Expr::Lit(lit) => lit_source(lit),
            Expr::Path(path) => path.to_string(),
            Expr::Paren(inner) => format!("({})", self.expr(*inner, indent, 0)),
            Expr::Tuple(elems) if elems.len() == 1 => {
                format!("({},)", self.expr(elems[0], indent, 0))
            }
            Expr::Tuple(elems) => format!("({})", self.list(elems, indent)),
            Expr::Array(elems) => format!("[{}]", self.list(elems, indent)),
            Expr::Repeat { elem, len } => format!(
                "[{}; {}]",
                self.expr(*elem, indent, 0),
                self.expr(*len, indent, 0)
            ),
            Expr::Call { func, args } => format!(
                "{}({})",
                self.expr(*func, indent, prec::POSTFIX),
                self.list(args, indent)
            ),
            Expr::MethodCall {
                receiver,
                method,
                args,
            } => format!(
                "{}.{method}({})",
                self.expr(*receiver, indent, prec::POSTFIX),
                self.list(args, indent)
            ),
            Expr::Field { base, name } => {
                format!("{}.{name}", self.expr(*base, indent, prec::POSTFIX))
            }
            Expr::Index { base, index } => format!(
                "{}[{}]",
                self.expr(*base, indent, prec::POSTFIX),
                self.expr(*index, indent, 0)
            ),
            Expr::Cast { expr, ty } => {
                format!("{} as {}", self.expr(*expr, indent, prec::CAST), self.ty(*ty))
            }
            Expr::Unary { op, operand } => {
                let symbol = match op {
                    UnOp::Deref => "*",
                    UnOp::Not => "!",
                    UnOp::Neg => "-",
                };
                format!("{symbol}{}", self.expr(*operand, indent, prec::UNARY))
            }
            Expr::AddrOf {
                mutability,
                operand,
            } => {
                let symbol = if mutability.is_mut() { "&mut " } else { "&" };
                format!("{symbol}{}", self.expr(*operand, indent, prec::UNARY))
            }
            Expr::Binary { op, lhs, rhs } => {
                let p = op.precedence();
                let (lhs_min, rhs_min) = if op.is_comparison() {
                    (p + 1, p + 1)
                } else {
                    (p, p + 1)
                };
                let mut left = self.expr(*lhs, indent, lhs_min);
                // `x as T < y` would parse as generic arguments
                if matches!(op, BinOp::Lt | BinOp::Shl)
                    && matches!(self.tree.expr(*lhs), Some(Expr::Cast { .. }))
                {
                    left = format!("({left})");
                }
                format!("{left} {} {}", op.symbol(), self.expr(*rhs, indent, rhs_min))
            }
            Expr::Assign { lhs, rhs } => format!(
                "{} = {}",
                self.expr(*lhs, indent, prec::ASSIGN + 1),
                self.expr(*rhs, indent, prec::ASSIGN)
            ),
            Expr::AssignOp { op, lhs, rhs } => format!(
                "{} {}= {}",
                self.expr(*lhs, indent, prec::ASSIGN + 1),
                op.symbol(),
                self.expr(*rhs, indent, prec::ASSIGN)
            ),
            Expr::Block { is_unsafe, stmts } => {
                let prefix = if *is_unsafe { "unsafe " } else { "" };
                if stmts.is_empty() {
                    return format!("{prefix}{{}}");
                }
                let pad = INDENT.repeat(indent + 1);
                let mut out = format!("{prefix}{{\n");
                for stmt in stmts {
                    out.push_str(&pad);
                    out.push_str(&self.node(*stmt, indent + 1));
                    out.push('\n');
                }
                out.push_str(&INDENT.repeat(indent));
                out.push('}');
                out
            }
            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let mut out = format!(
                    "if {} {}",
                    self.expr(*cond, indent, 0),
                    self.expr(*then_branch, indent, 0)
                );
                if let Some(else_branch) = else_branch {
                    out.push_str(&format!(" else {}", self.expr(*else_branch, indent, 0)));
                }
                out
            }
            Expr::While { cond, body } => format!(
                "while {} {}",
                self.expr(*cond, indent, 0),
                self.expr(*body, indent, 0)
            ),
            Expr::Loop { body } => format!("loop {}", self.expr(*body, indent, 0)),
            Expr::Break => "break".to_string(),
            Expr::Continue => "continue".to_string(),
            Expr::Return(None) => "return".to_string(),
            Expr::Return(Some(value)) => format!("return {}", self.expr(*value, indent, 0)),
            Expr::MacCall { path, args } => format!("{path}!({})", self.list(args, indent)),
            Expr::Struct { path, fields, base } => {
                let mut parts = fields
                    .iter()
                    .map(|(name, value)| format!("{name}: {}", self.expr(*value, indent, 0)))
                    .collect::<Vec<_>>();
                if let Some(base) = base {
                    parts.push(format!("..{}", self.expr(*base, indent, 0)));
                }
                if parts.is_empty() {
                    return format!("{path} {{}}");
                }
                format!("{path} {{ {} }}", parts.join(", "))
            }
        }
    }

    pub fn ty(&self, id: NodeId) -> String {
        let Some(ty) = self.tree.ty(id) else {
            return self.node(id, 0);
        };
        match ty {
            Ty::Path { path, args } if args.is_empty() => path.to_string(),
            Ty::Path { path, args } => format!("{path}<{}>", self.list(args, 0)),
            Ty::Ptr {
                mutability,
                pointee,
            } => {
                let kind = if mutability.is_mut() { "mut" } else { "const" };
                format!("*{kind} {}", self.ty(*pointee))
            }
            Ty::Ref {
                lifetime,
                mutability,
                pointee,
            } => {
                let mut out = String::from("&");
                if let Some(lifetime) = lifetime.as_ref().filter(|_| !self.erase_lifetimes) {
                    out.push_str(&format!("'{lifetime} "));
                }
                if mutability.is_mut() {
                    out.push_str("mut ");
                }
                out.push_str(&self.ty(*pointee));
                out
            }
            Ty::Array { elem, len } => {
                format!("[{}; {}]", self.ty(*elem), self.expr(*len, 0, 0))
            }
            Ty::Slice(elem) => format!("[{}]", self.ty(*elem)),
            Ty::Tuple(elems) if elems.len() == 1 => format!("({},)", self.ty(elems[0])),
            Ty::Tuple(elems) => format!("({})", self.list(elems, 0)),
            Ty::Never => "!".to_string(),
            Ty::Infer => "_".to_string(),
            Ty::Mac { path, args } => format!("{path}!({})", self.list(args, 0)),
        }
    }
}

fn lit_source(lit: &Lit) -> String {
    match lit {
        Lit::Int { value, suffix } => format!("{value}{}", suffix.as_deref().unwrap_or("")),
        Lit::Float { text } => text.clone(),
        Lit::Bool(value) => value.to_string(),
        Lit::Char(c) => match c {
            '\'' => "'\\''".to_string(),
            '"' => "'\"'".to_string(),
            _ => format!("'{}'", escape_char(*c)),
        },
        Lit::Byte(b) => match b {
            b'\'' => "b'\\''".to_string(),
            b'"' => "b'\"'".to_string(),
            _ => format!("b'{}'", escape_byte(*b)),
        },
        Lit::Str(s) => format!("\"{}\"", s.chars().map(escape_char).collect::<String>()),
        Lit::ByteStr(bytes) => format!(
            "b\"{}\"",
            bytes.iter().map(|b| escape_byte(*b)).collect::<String>()
        ),
    }
}

fn escape_char(c: char) -> String {
    match c {
        '\\' => "\\\\".to_string(),
        '"' => "\\\"".to_string(),
        '\n' => "\\n".to_string(),
        '\r' => "\\r".to_string(),
        '\t' => "\\t".to_string(),
        '\0' => "\\0".to_string(),
        c if c.is_control() => format!("\\u{{{:x}}}", c as u32),
        c => c.to_string(),
    }
}

fn escape_byte(b: u8) -> String {
    match b {
        b'\\' => "\\\\".to_string(),
        b'"' => "\\\"".to_string(),
        b'\n' => "\\n".to_string(),
        b'\r' => "\\r".to_string(),
        b'\t' => "\\t".to_string(),
        0 => "\\0".to_string(),
        0x20..=0x7e => (b as char).to_string(),
        _ => format!("\\x{b:02x}"),
    }
}

impl Tree {
    /// Source text of one node.
    pub fn source_of(&self, id: NodeId) -> String {
        SourceGen::new(self).node(id, 0)
    }

    /// Printed form with lifetimes erased. Two types have the same shape
    /// exactly when their shapes compare equal.
    pub fn ty_shape(&self, id: NodeId) -> String {
        SourceGen::new(self).erase_lifetimes().node(id, 0)
    }
}
