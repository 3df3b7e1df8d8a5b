// Recursive descent parser for the supported Rust subset.
// Expressions use binding powers; see `binop_power` for the table.

use std::mem;

use crate::ast::{
    BinOp, Expr, FieldDef, Item, ItemKind, Lit, Mutability, NodeId, NodeKind, Param, Path,
    Stmt, Tree, Ty, UnOp, Visibility,
};

use super::ParseError;
use super::lexer::{Token, TokenKind, tokenize};

type PResult<T> = Result<T, ParseError>;

/// Left binding power of `as`.
const CAST_POWER: u8 = 21;
/// Operand binding power of prefix operators; tighter than `as`.
const PREFIX_POWER: u8 = 23;

fn binop_power(op: BinOp) -> (u8, u8) {
    let p = op.precedence();
    (2 * p - 3, 2 * p - 2)
}

pub(super) struct Parser<'s, 't> {
    src: &'s str,
    tokens: Vec<Token>,
    pos: usize,
    tree: &'t mut Tree,
    /// Set while parsing `if`/`while` conditions, where `{` opens the body.
    no_struct: bool,
}

impl<'s, 't> Parser<'s, 't> {
    pub(super) fn new(src: &'s str, tree: &'t mut Tree) -> PResult<Self> {
        Ok(Self {
            src,
            tokens: tokenize(src)?,
            pos: 0,
            tree,
            no_struct: false,
        })
    }

    // ---- token helpers ----

    fn peek(&self) -> Option<&TokenKind> {
        self.peek_nth(0)
    }

    fn peek_nth(&self, n: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + n).map(|t| &t.kind)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|t| t.start)
            .unwrap_or(self.src.len())
    }

    fn current_text(&self) -> String {
        match self.tokens.get(self.pos) {
            Some(token) => format!("`{}`", &self.src[token.start..token.end]),
            None => "end of input".to_string(),
        }
    }

    fn expected<T>(&self, what: &str) -> PResult<T> {
        Err(ParseError::new(
            self.offset(),
            format!("expected {what}, found {}", self.current_text()),
        ))
    }

    fn bump(&mut self) -> Option<TokenKind> {
        let kind = self.peek().cloned();
        if kind.is_some() {
            self.pos += 1;
        }
        kind
    }

    fn is_punct_at(&self, n: usize, punct: &str) -> bool {
        matches!(self.peek_nth(n), Some(TokenKind::Punct(p)) if *p == punct)
    }

    fn is_punct(&self, punct: &str) -> bool {
        self.is_punct_at(0, punct)
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        let found = self.is_punct(punct);
        if found {
            self.pos += 1;
        }
        found
    }

    fn expect_punct(&mut self, punct: &str) -> PResult<()> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            self.expected(&format!("`{punct}`"))
        }
    }

    /// Two adjacent single-character tokens, for `<<` and `>>`.
    fn joined(&self, punct: &str) -> bool {
        match (self.tokens.get(self.pos), self.tokens.get(self.pos + 1)) {
            (Some(a), Some(b)) => {
                matches!(&a.kind, TokenKind::Punct(p) if *p == punct)
                    && b.kind == a.kind
                    && a.end == b.start
            }
            _ => false,
        }
    }

    fn is_keyword_at(&self, n: usize, keyword: &str) -> bool {
        matches!(self.peek_nth(n), Some(TokenKind::Ident(name)) if name == keyword)
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        self.is_keyword_at(0, keyword)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let found = self.is_keyword(keyword);
        if found {
            self.pos += 1;
        }
        found
    }

    fn expect_keyword(&mut self, keyword: &str) -> PResult<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            self.expected(&format!("`{keyword}`"))
        }
    }

    fn expect_ident(&mut self) -> PResult<String> {
        match self.peek() {
            Some(TokenKind::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => self.expected("identifier"),
        }
    }

    fn expect_str(&mut self) -> PResult<String> {
        match self.peek() {
            Some(TokenKind::Str(text)) => {
                let text = text.clone();
                self.pos += 1;
                Ok(text)
            }
            _ => self.expected("string literal"),
        }
    }

    fn tree_error(&self, err: crate::ast::TreeError) -> ParseError {
        ParseError::new(self.offset(), err.to_string())
    }

    /// Skips a balanced `()`, `[]` or `{}` group; returns the end offset of
    /// its closing delimiter.
    fn skip_group(&mut self) -> PResult<usize> {
        if !(self.is_punct("(") || self.is_punct("[") || self.is_punct("{")) {
            return self.expected("delimited group");
        }
        let mut depth = 0usize;
        while let Some(token) = self.tokens.get(self.pos) {
            let end = token.end;
            match &token.kind {
                TokenKind::Punct("(" | "[" | "{") => depth += 1,
                TokenKind::Punct(")" | "]" | "}") => depth -= 1,
                _ => {}
            }
            self.pos += 1;
            if depth == 0 {
                return Ok(end);
            }
        }
        self.expected("closing delimiter")
    }

    /// `#[..]` or `#![..]`, verbatim.
    fn raw_attribute(&mut self) -> PResult<String> {
        let start = self.offset();
        self.expect_punct("#")?;
        self.eat_punct("!");
        if !self.is_punct("[") {
            return self.expected("`[`");
        }
        let end = self.skip_group()?;
        Ok(self.src[start..end].to_string())
    }

    fn starts_expr(&self) -> bool {
        !self.at_end()
            && !self.is_punct(";")
            && !self.is_punct("}")
            && !self.is_punct(")")
            && !self.is_punct("]")
            && !self.is_punct(",")
    }

    // ---- entry points ----

    pub(super) fn parse_crate_into(mut self, root: NodeId) -> PResult<()> {
        let mut attrs = Vec::new();
        while self.is_punct("#") && self.is_punct_at(1, "!") {
            attrs.push(self.raw_attribute()?);
        }
        let items = self.parse_items_to_end_ref()?;
        if let Some(NodeKind::Crate(krate)) = self.tree.get_mut(root) {
            krate.attrs = attrs;
        }
        for item in items {
            self.tree
                .insert_child(root, usize::MAX, item)
                .map_err(|e| self.tree_error(e))?;
        }
        Ok(())
    }

    pub(super) fn parse_items_to_end(mut self) -> PResult<Vec<NodeId>> {
        self.parse_items_to_end_ref()
    }

    fn parse_items_to_end_ref(&mut self) -> PResult<Vec<NodeId>> {
        let mut items = Vec::new();
        while !self.at_end() {
            items.push(self.parse_item()?);
        }
        Ok(items)
    }

    pub(super) fn parse_expr_to_end(mut self) -> PResult<NodeId> {
        let expr = self.parse_expr()?;
        if !self.at_end() {
            return self.expected("end of expression");
        }
        Ok(expr)
    }

    pub(super) fn parse_ty_to_end(mut self) -> PResult<NodeId> {
        let ty = self.parse_ty()?;
        if !self.at_end() {
            return self.expected("end of type");
        }
        Ok(ty)
    }

    // ---- items ----

    fn starts_item(&self) -> bool {
        if self.is_punct("#") {
            return true;
        }
        match self.peek() {
            Some(TokenKind::Ident(word)) => match word.as_str() {
                "fn" | "static" | "struct" | "type" | "mod" | "use" | "extern" | "pub" => true,
                "const" => !self.is_punct_at(1, "{"),
                "macro_rules" => self.is_punct_at(1, "!"),
                "unsafe" => self.is_keyword_at(1, "fn") || self.is_keyword_at(1, "extern"),
                _ => false,
            },
            _ => false,
        }
    }

    fn parse_visibility(&mut self) -> Visibility {
        if !self.eat_keyword("pub") {
            return Visibility::Inherited;
        }
        if self.is_punct("(") && self.is_keyword_at(1, "crate") && self.is_punct_at(2, ")") {
            self.pos += 3;
            Visibility::Crate
        } else {
            Visibility::Public
        }
    }

    fn parse_item(&mut self) -> PResult<NodeId> {
        let mut attrs = Vec::new();
        while self.is_punct("#") {
            attrs.push(self.raw_attribute()?);
        }
        let vis = self.parse_visibility();
        let (name, kind) = if self.is_keyword("static") {
            self.parse_static()?
        } else if self.is_keyword("const") {
            self.parse_const()?
        } else if self.is_keyword("struct") {
            self.parse_struct()?
        } else if self.eat_keyword("type") {
            let name = self.expect_ident()?;
            self.expect_punct("=")?;
            let ty = self.parse_ty()?;
            self.expect_punct(";")?;
            (name, ItemKind::TypeAlias { ty })
        } else if self.eat_keyword("mod") {
            let name = self.expect_ident()?;
            let items = self.parse_item_block()?;
            (name, ItemKind::Mod { items })
        } else if self.is_keyword("use") {
            self.parse_use()?
        } else if self.is_keyword("macro_rules") {
            self.parse_macro_rules()?
        } else if self.is_keyword("extern") && self.is_keyword_at(1, "crate") {
            self.pos += 2;
            let name = self.expect_ident()?;
            if self.eat_keyword("as") {
                self.expect_ident()?;
            }
            self.expect_punct(";")?;
            (name, ItemKind::ExternCrate)
        } else if self.is_keyword("extern")
            && matches!(self.peek_nth(1), Some(TokenKind::Str(_)))
            && self.is_punct_at(2, "{")
        {
            self.pos += 1;
            let abi = self.expect_str()?;
            let items = self.parse_item_block()?;
            (String::new(), ItemKind::ForeignMod { abi, items })
        } else if self.is_keyword("fn") || self.is_keyword("unsafe") || self.is_keyword("extern") {
            self.parse_fn()?
        } else {
            return self.expected("item");
        };
        Ok(self.tree.alloc(NodeKind::Item(Item {
            attrs,
            vis,
            name,
            kind,
        })))
    }

    fn parse_item_block(&mut self) -> PResult<Vec<NodeId>> {
        self.expect_punct("{")?;
        let mut items = Vec::new();
        while !self.eat_punct("}") {
            if self.at_end() {
                return self.expected("`}`");
            }
            items.push(self.parse_item()?);
        }
        Ok(items)
    }

    fn parse_static(&mut self) -> PResult<(String, ItemKind)> {
        self.expect_keyword("static")?;
        let mutability = if self.eat_keyword("mut") {
            Mutability::Mut
        } else {
            Mutability::Not
        };
        let name = self.expect_ident()?;
        self.expect_punct(":")?;
        let ty = self.parse_ty()?;
        let init = if self.eat_punct("=") {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.expect_punct(";")?;
        Ok((
            name,
            ItemKind::Static {
                mutability,
                ty,
                init,
            },
        ))
    }

    fn parse_const(&mut self) -> PResult<(String, ItemKind)> {
        self.expect_keyword("const")?;
        let name = self.expect_ident()?;
        self.expect_punct(":")?;
        let ty = self.parse_ty()?;
        self.expect_punct("=")?;
        let init = self.parse_expr()?;
        self.expect_punct(";")?;
        Ok((name, ItemKind::Const { ty, init }))
    }

    fn parse_struct(&mut self) -> PResult<(String, ItemKind)> {
        self.expect_keyword("struct")?;
        let name = self.expect_ident()?;
        let mut fields = Vec::new();
        if self.eat_punct(";") {
            return Ok((name, ItemKind::Struct { fields }));
        }
        self.expect_punct("{")?;
        while !self.eat_punct("}") {
            while self.is_punct("#") {
                self.raw_attribute()?;
            }
            let vis = self.parse_visibility();
            let field_name = self.expect_ident()?;
            self.expect_punct(":")?;
            let ty = self.parse_ty()?;
            fields.push(FieldDef {
                vis,
                name: field_name,
                ty,
            });
            if !self.eat_punct(",") && !self.is_punct("}") {
                return self.expected("`,` or `}`");
            }
        }
        Ok((name, ItemKind::Struct { fields }))
    }

    fn parse_use(&mut self) -> PResult<(String, ItemKind)> {
        self.expect_keyword("use")?;
        let start = self.offset();
        let mut end = start;
        let mut depth = 0usize;
        loop {
            match self.tokens.get(self.pos) {
                None => return self.expected("`;`"),
                Some(token) if depth == 0 && token.kind == TokenKind::Punct(";") => break,
                Some(token) => {
                    match token.kind {
                        TokenKind::Punct("{") => depth += 1,
                        TokenKind::Punct("}") => depth = depth.saturating_sub(1),
                        _ => {}
                    }
                    end = token.end;
                    self.pos += 1;
                }
            }
        }
        self.expect_punct(";")?;
        Ok((
            String::new(),
            ItemKind::Use {
                tree: self.src[start..end].to_string(),
            },
        ))
    }

    fn parse_macro_rules(&mut self) -> PResult<(String, ItemKind)> {
        self.expect_keyword("macro_rules")?;
        self.expect_punct("!")?;
        let name = self.expect_ident()?;
        let start = self.offset();
        let braced = self.is_punct("{");
        let end = self.skip_group()?;
        if !braced {
            self.expect_punct(";")?;
        }
        Ok((
            name,
            ItemKind::MacroRules {
                body: self.src[start..end].to_string(),
            },
        ))
    }

    fn parse_fn(&mut self) -> PResult<(String, ItemKind)> {
        let is_unsafe = self.eat_keyword("unsafe");
        let abi = if self.eat_keyword("extern") {
            match self.peek() {
                Some(TokenKind::Str(_)) => Some(self.expect_str()?),
                _ => Some("C".to_string()),
            }
        } else {
            None
        };
        self.expect_keyword("fn")?;
        let name = self.expect_ident()?;
        self.expect_punct("(")?;
        let mut params = Vec::new();
        let mut variadic = false;
        while !self.eat_punct(")") {
            if self.eat_punct("...") {
                variadic = true;
            } else {
                let mutability = if self.eat_keyword("mut") {
                    Mutability::Mut
                } else {
                    Mutability::Not
                };
                let name = self.expect_ident()?;
                self.expect_punct(":")?;
                let ty = self.parse_ty()?;
                params.push(Param {
                    name,
                    mutability,
                    ty,
                });
            }
            if !self.eat_punct(",") && !self.is_punct(")") {
                return self.expected("`,` or `)`");
            }
        }
        let ret = if self.eat_punct("->") {
            Some(self.parse_ty()?)
        } else {
            None
        };
        let body = if self.eat_punct(";") {
            None
        } else {
            Some(self.parse_block(false)?)
        };
        Ok((
            name,
            ItemKind::Fn {
                is_unsafe,
                abi,
                params,
                variadic,
                ret,
                body,
            },
        ))
    }

    // ---- statements ----

    fn parse_block(&mut self, is_unsafe: bool) -> PResult<NodeId> {
        let saved = mem::replace(&mut self.no_struct, false);
        self.expect_punct("{")?;
        let mut stmts = Vec::new();
        while !self.eat_punct("}") {
            if self.at_end() {
                return self.expected("`}`");
            }
            if self.eat_punct(";") {
                continue;
            }
            stmts.push(self.parse_stmt()?);
        }
        self.no_struct = saved;
        Ok(self.tree.alloc_expr(Expr::Block { is_unsafe, stmts }))
    }

    fn starts_block_like(&self) -> bool {
        self.is_punct("{")
            || (self.is_keyword("unsafe") && self.is_punct_at(1, "{"))
            || self.is_keyword("if")
            || self.is_keyword("while")
            || self.is_keyword("loop")
    }

    fn parse_stmt(&mut self) -> PResult<NodeId> {
        if self.eat_keyword("let") {
            let mutability = if self.eat_keyword("mut") {
                Mutability::Mut
            } else {
                Mutability::Not
            };
            let name = self.expect_ident()?;
            let ty = if self.eat_punct(":") {
                Some(self.parse_ty()?)
            } else {
                None
            };
            let init = if self.eat_punct("=") {
                Some(self.parse_expr()?)
            } else {
                None
            };
            self.expect_punct(";")?;
            return Ok(self.tree.alloc(NodeKind::Stmt(Stmt::Let {
                name,
                mutability,
                ty,
                init,
            })));
        }
        if self.starts_item() {
            let item = self.parse_item()?;
            return Ok(self.tree.alloc(NodeKind::Stmt(Stmt::Item(item))));
        }
        let (expr, semi) = if self.starts_block_like() {
            let expr = self.parse_primary()?;
            (expr, self.eat_punct(";"))
        } else {
            let expr = self.parse_expr()?;
            if self.eat_punct(";") {
                (expr, true)
            } else if self.is_punct("}") {
                (expr, false)
            } else {
                return self.expected("`;`");
            }
        };
        Ok(self.tree.alloc(NodeKind::Stmt(Stmt::Expr { expr, semi })))
    }

    // ---- expressions ----

    fn parse_expr(&mut self) -> PResult<NodeId> {
        self.parse_expr_bp(0)
    }

    /// Expression inside delimiters, where struct literals are allowed again.
    fn parse_nested_expr(&mut self) -> PResult<NodeId> {
        let saved = mem::replace(&mut self.no_struct, false);
        let expr = self.parse_expr();
        self.no_struct = saved;
        expr
    }

    fn parse_cond(&mut self) -> PResult<NodeId> {
        let saved = mem::replace(&mut self.no_struct, true);
        let expr = self.parse_expr();
        self.no_struct = saved;
        expr
    }

    fn peek_binop(&self) -> Option<(BinOp, usize)> {
        let op = match self.peek()? {
            TokenKind::Punct(p) => match *p {
                "||" => BinOp::Or,
                "&&" => BinOp::And,
                "==" => BinOp::Eq,
                "!=" => BinOp::Ne,
                "<=" => BinOp::Le,
                ">=" => BinOp::Ge,
                "<" if self.joined("<") => return Some((BinOp::Shl, 2)),
                ">" if self.joined(">") => return Some((BinOp::Shr, 2)),
                "<" => BinOp::Lt,
                ">" => BinOp::Gt,
                "|" => BinOp::BitOr,
                "^" => BinOp::BitXor,
                "&" => BinOp::BitAnd,
                "+" => BinOp::Add,
                "-" => BinOp::Sub,
                "*" => BinOp::Mul,
                "/" => BinOp::Div,
                "%" => BinOp::Rem,
                _ => return None,
            },
            _ => return None,
        };
        Some((op, 1))
    }

    fn peek_assign_op(&self) -> Option<Option<BinOp>> {
        let op = match self.peek()? {
            TokenKind::Punct(p) => match *p {
                "=" => None,
                "+=" => Some(BinOp::Add),
                "-=" => Some(BinOp::Sub),
                "*=" => Some(BinOp::Mul),
                "/=" => Some(BinOp::Div),
                "%=" => Some(BinOp::Rem),
                "^=" => Some(BinOp::BitXor),
                "&=" => Some(BinOp::BitAnd),
                "|=" => Some(BinOp::BitOr),
                "<<=" => Some(BinOp::Shl),
                ">>=" => Some(BinOp::Shr),
                _ => return None,
            },
            _ => return None,
        };
        Some(op)
    }

    fn parse_expr_bp(&mut self, min_bp: u8) -> PResult<NodeId> {
        let mut lhs = self.parse_prefix()?;
        loop {
            if self.is_keyword("as") {
                if CAST_POWER < min_bp {
                    break;
                }
                self.pos += 1;
                let ty = self.parse_ty()?;
                lhs = self.tree.alloc_expr(Expr::Cast { expr: lhs, ty });
                continue;
            }
            if let Some(op) = self.peek_assign_op() {
                if 2 < min_bp {
                    break;
                }
                self.pos += 1;
                let rhs = self.parse_expr_bp(1)?;
                lhs = self.tree.alloc_expr(match op {
                    None => Expr::Assign { lhs, rhs },
                    Some(op) => Expr::AssignOp { op, lhs, rhs },
                });
                continue;
            }
            let Some((op, width)) = self.peek_binop() else {
                break;
            };
            let (l_bp, r_bp) = binop_power(op);
            if l_bp < min_bp {
                break;
            }
            self.pos += width;
            let rhs = self.parse_expr_bp(r_bp)?;
            lhs = self.tree.alloc_expr(Expr::Binary { op, lhs, rhs });
        }
        Ok(lhs)
    }

    fn parse_prefix(&mut self) -> PResult<NodeId> {
        let unary = match self.peek() {
            Some(TokenKind::Punct("-")) => Some(UnOp::Neg),
            Some(TokenKind::Punct("!")) => Some(UnOp::Not),
            Some(TokenKind::Punct("*")) => Some(UnOp::Deref),
            _ => None,
        };
        if let Some(op) = unary {
            self.pos += 1;
            let operand = self.parse_expr_bp(PREFIX_POWER)?;
            return Ok(self.tree.alloc_expr(Expr::Unary { op, operand }));
        }
        if self.is_punct("&") || self.is_punct("&&") {
            let double = self.is_punct("&&");
            self.pos += 1;
            let mutability = if self.eat_keyword("mut") {
                Mutability::Mut
            } else {
                Mutability::Not
            };
            let operand = self.parse_expr_bp(PREFIX_POWER)?;
            let mut expr = self.tree.alloc_expr(Expr::AddrOf {
                mutability,
                operand,
            });
            if double {
                expr = self.tree.alloc_expr(Expr::AddrOf {
                    mutability: Mutability::Not,
                    operand: expr,
                });
            }
            return Ok(expr);
        }
        if self.eat_keyword("return") {
            let value = if self.starts_expr() {
                Some(self.parse_expr()?)
            } else {
                None
            };
            return Ok(self.tree.alloc_expr(Expr::Return(value)));
        }
        if self.eat_keyword("break") {
            return Ok(self.tree.alloc_expr(Expr::Break));
        }
        if self.eat_keyword("continue") {
            return Ok(self.tree.alloc_expr(Expr::Continue));
        }
        let primary = self.parse_primary()?;
        self.parse_postfix(primary)
    }

    fn parse_postfix(&mut self, mut expr: NodeId) -> PResult<NodeId> {
        loop {
            if self.eat_punct("(") {
                let args = self.parse_exprs_until(")")?;
                expr = self.tree.alloc_expr(Expr::Call { func: expr, args });
            } else if self.eat_punct("[") {
                let index = self.parse_nested_expr()?;
                self.expect_punct("]")?;
                expr = self.tree.alloc_expr(Expr::Index { base: expr, index });
            } else if self.eat_punct(".") {
                match self.bump() {
                    Some(TokenKind::Ident(name)) => {
                        if self.eat_punct("(") {
                            let args = self.parse_exprs_until(")")?;
                            expr = self.tree.alloc_expr(Expr::MethodCall {
                                receiver: expr,
                                method: name,
                                args,
                            });
                        } else {
                            expr = self.tree.alloc_expr(Expr::Field { base: expr, name });
                        }
                    }
                    Some(TokenKind::Int { value, suffix: None }) => {
                        expr = self.tree.alloc_expr(Expr::Field {
                            base: expr,
                            name: value.to_string(),
                        });
                    }
                    // `t.0.1` lexes its tail as one float
                    Some(TokenKind::Float(text))
                        if text.chars().all(|c| c.is_ascii_digit() || c == '.') =>
                    {
                        for name in text.split('.') {
                            expr = self.tree.alloc_expr(Expr::Field {
                                base: expr,
                                name: name.to_string(),
                            });
                        }
                    }
                    Some(_) => {
                        self.pos -= 1;
                        return self.expected("field or method name");
                    }
                    None => return self.expected("field or method name"),
                }
            } else {
                return Ok(expr);
            }
        }
    }

    /// Comma-separated expressions up to and including `closer`.
    fn parse_exprs_until(&mut self, closer: &str) -> PResult<Vec<NodeId>> {
        let mut out = Vec::new();
        while !self.eat_punct(closer) {
            out.push(self.parse_nested_expr()?);
            if !self.eat_punct(",") && !self.is_punct(closer) {
                return self.expected(&format!("`,` or `{closer}`"));
            }
        }
        Ok(out)
    }

    fn lit(&mut self, lit: Lit) -> NodeId {
        self.pos += 1;
        self.tree.alloc_expr(Expr::Lit(lit))
    }

    fn parse_primary(&mut self) -> PResult<NodeId> {
        let Some(kind) = self.peek().cloned() else {
            return self.expected("expression");
        };
        match kind {
            TokenKind::Int { value, suffix } => Ok(self.lit(Lit::Int { value, suffix })),
            TokenKind::Float(text) => Ok(self.lit(Lit::Float { text })),
            TokenKind::Char(c) => Ok(self.lit(Lit::Char(c))),
            TokenKind::Byte(b) => Ok(self.lit(Lit::Byte(b))),
            TokenKind::Str(s) => Ok(self.lit(Lit::Str(s))),
            TokenKind::ByteStr(bytes) => Ok(self.lit(Lit::ByteStr(bytes))),
            TokenKind::Ident(word) => match word.as_str() {
                "true" => Ok(self.lit(Lit::Bool(true))),
                "false" => Ok(self.lit(Lit::Bool(false))),
                "if" => self.parse_if(),
                "while" => {
                    self.pos += 1;
                    let cond = self.parse_cond()?;
                    let body = self.parse_block(false)?;
                    Ok(self.tree.alloc_expr(Expr::While { cond, body }))
                }
                "loop" => {
                    self.pos += 1;
                    let body = self.parse_block(false)?;
                    Ok(self.tree.alloc_expr(Expr::Loop { body }))
                }
                "unsafe" => {
                    self.pos += 1;
                    self.parse_block(true)
                }
                "match" | "for" | "move" => self.expected("supported expression"),
                _ => self.parse_path_expr(),
            },
            TokenKind::Punct("::") => self.parse_path_expr(),
            TokenKind::Punct("{") => self.parse_block(false),
            TokenKind::Punct("(") => {
                self.pos += 1;
                let mut elems = Vec::new();
                let mut trailing_comma = false;
                while !self.eat_punct(")") {
                    elems.push(self.parse_nested_expr()?);
                    trailing_comma = self.eat_punct(",");
                    if !trailing_comma && !self.is_punct(")") {
                        return self.expected("`,` or `)`");
                    }
                }
                if elems.len() == 1 && !trailing_comma {
                    Ok(self.tree.alloc_expr(Expr::Paren(elems[0])))
                } else {
                    Ok(self.tree.alloc_expr(Expr::Tuple(elems)))
                }
            }
            TokenKind::Punct("[") => {
                self.pos += 1;
                if self.eat_punct("]") {
                    return Ok(self.tree.alloc_expr(Expr::Array(Vec::new())));
                }
                let first = self.parse_nested_expr()?;
                if self.eat_punct(";") {
                    let len = self.parse_nested_expr()?;
                    self.expect_punct("]")?;
                    return Ok(self.tree.alloc_expr(Expr::Repeat { elem: first, len }));
                }
                let mut elems = vec![first];
                if self.eat_punct(",") {
                    elems.extend(self.parse_exprs_until("]")?);
                } else {
                    self.expect_punct("]")?;
                }
                Ok(self.tree.alloc_expr(Expr::Array(elems)))
            }
            _ => self.expected("expression"),
        }
    }

    fn parse_if(&mut self) -> PResult<NodeId> {
        self.expect_keyword("if")?;
        let cond = self.parse_cond()?;
        let then_branch = self.parse_block(false)?;
        let else_branch = if self.eat_keyword("else") {
            if self.is_keyword("if") {
                Some(self.parse_if()?)
            } else {
                Some(self.parse_block(false)?)
            }
        } else {
            None
        };
        Ok(self.tree.alloc_expr(Expr::If {
            cond,
            then_branch,
            else_branch,
        }))
    }

    fn parse_path(&mut self) -> PResult<Path> {
        let global = self.eat_punct("::");
        let mut segments = vec![self.expect_ident()?];
        while self.is_punct("::") && matches!(self.peek_nth(1), Some(TokenKind::Ident(_))) {
            self.pos += 1;
            segments.push(self.expect_ident()?);
        }
        Ok(Path { global, segments })
    }

    fn starts_struct_literal(&self) -> bool {
        !self.no_struct
            && self.is_punct("{")
            && (self.is_punct_at(1, "}")
                || self.is_punct_at(1, "..")
                || (matches!(self.peek_nth(1), Some(TokenKind::Ident(_)))
                    && self.is_punct_at(2, ":")))
    }

    fn macro_closer(&mut self) -> PResult<&'static str> {
        let closer = match self.peek() {
            Some(TokenKind::Punct("(")) => ")",
            Some(TokenKind::Punct("[")) => "]",
            Some(TokenKind::Punct("{")) => "}",
            _ => return self.expected("macro arguments"),
        };
        self.pos += 1;
        Ok(closer)
    }

    fn parse_path_expr(&mut self) -> PResult<NodeId> {
        let path = self.parse_path()?;
        if self.is_punct("!")
            && (self.is_punct_at(1, "(") || self.is_punct_at(1, "[") || self.is_punct_at(1, "{"))
        {
            self.pos += 1;
            let closer = self.macro_closer()?;
            let args = self.parse_exprs_until(closer)?;
            return Ok(self.tree.alloc_expr(Expr::MacCall { path, args }));
        }
        if self.starts_struct_literal() {
            self.pos += 1;
            let mut fields = Vec::new();
            let mut base = None;
            while !self.eat_punct("}") {
                if self.eat_punct("..") {
                    base = Some(self.parse_nested_expr()?);
                    self.expect_punct("}")?;
                    break;
                }
                let name = self.expect_ident()?;
                self.expect_punct(":")?;
                let value = self.parse_nested_expr()?;
                fields.push((name, value));
                if !self.eat_punct(",") && !self.is_punct("}") {
                    return self.expected("`,` or `}`");
                }
            }
            return Ok(self.tree.alloc_expr(Expr::Struct { path, fields, base }));
        }
        Ok(self.tree.alloc_expr(Expr::Path(path)))
    }

    // ---- types ----

    fn parse_ty(&mut self) -> PResult<NodeId> {
        if self.eat_punct("*") {
            let mutability = if self.eat_keyword("mut") {
                Mutability::Mut
            } else {
                self.expect_keyword("const")?;
                Mutability::Not
            };
            let pointee = self.parse_ty()?;
            return Ok(self.tree.alloc_ty(Ty::Ptr {
                mutability,
                pointee,
            }));
        }
        if self.is_punct("&") || self.is_punct("&&") {
            let double = self.is_punct("&&");
            self.pos += 1;
            let lifetime = match self.peek() {
                Some(TokenKind::Lifetime(name)) => {
                    let name = name.clone();
                    self.pos += 1;
                    Some(name)
                }
                _ => None,
            };
            let mutability = if self.eat_keyword("mut") {
                Mutability::Mut
            } else {
                Mutability::Not
            };
            let pointee = self.parse_ty()?;
            let mut ty = self.tree.alloc_ty(Ty::Ref {
                lifetime,
                mutability,
                pointee,
            });
            if double {
                ty = self.tree.alloc_ty(Ty::Ref {
                    lifetime: None,
                    mutability: Mutability::Not,
                    pointee: ty,
                });
            }
            return Ok(ty);
        }
        if self.eat_punct("[") {
            let elem = self.parse_ty()?;
            if self.eat_punct(";") {
                let len = self.parse_nested_expr()?;
                self.expect_punct("]")?;
                return Ok(self.tree.alloc_ty(Ty::Array { elem, len }));
            }
            self.expect_punct("]")?;
            return Ok(self.tree.alloc_ty(Ty::Slice(elem)));
        }
        if self.eat_punct("(") {
            let mut elems = Vec::new();
            let mut trailing_comma = false;
            while !self.eat_punct(")") {
                elems.push(self.parse_ty()?);
                trailing_comma = self.eat_punct(",");
                if !trailing_comma && !self.is_punct(")") {
                    return self.expected("`,` or `)`");
                }
            }
            if elems.len() == 1 && !trailing_comma {
                return Ok(elems[0]);
            }
            return Ok(self.tree.alloc_ty(Ty::Tuple(elems)));
        }
        if self.eat_punct("!") {
            return Ok(self.tree.alloc_ty(Ty::Never));
        }
        if self.eat_keyword("_") {
            return Ok(self.tree.alloc_ty(Ty::Infer));
        }
        if self.is_keyword("fn") || self.is_keyword("dyn") || self.is_keyword("impl") {
            return self.expected("supported type");
        }
        let path = self.parse_path()?;
        if self.is_punct("!") && self.is_punct_at(1, "(") {
            self.pos += 2;
            let args = self.parse_tys_until(")")?;
            return Ok(self.tree.alloc_ty(Ty::Mac { path, args }));
        }
        let args = if self.eat_punct("<") {
            self.parse_tys_until(">")?
        } else {
            Vec::new()
        };
        Ok(self.tree.alloc_ty(Ty::Path { path, args }))
    }

    fn parse_tys_until(&mut self, closer: &str) -> PResult<Vec<NodeId>> {
        let mut out = Vec::new();
        while !self.eat_punct(closer) {
            if matches!(self.peek(), Some(TokenKind::Lifetime(_))) {
                // lifetime arguments are not tracked
                self.pos += 1;
            } else {
                out.push(self.parse_ty()?);
            }
            if !self.eat_punct(",") && !self.is_punct(closer) {
                return self.expected(&format!("`,` or `{closer}`"));
            }
        }
        Ok(out)
    }
}
