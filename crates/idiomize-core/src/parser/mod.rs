// Parser module - source text to arena trees
use thiserror::Error;

use crate::ast::{NodeId, Tree};

pub mod lexer;
mod rust;

#[cfg(test)]
mod tests;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("parse error at offset {offset}: {message}")]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

/// Trait for source parsers that build arena trees
pub trait SourceParser: Send + Sync {
    /// Parse a whole crate into a fresh tree
    fn parse_crate(&self, source: &str) -> Result<Tree, ParseError>;

    /// Parse items into `tree`; the new items are left detached
    fn parse_items(&self, source: &str, tree: &mut Tree) -> Result<Vec<NodeId>, ParseError>;

    /// Parse one expression into `tree`, detached
    fn parse_expr(&self, source: &str, tree: &mut Tree) -> Result<NodeId, ParseError>;

    /// Parse one type into `tree`, detached
    fn parse_ty(&self, source: &str, tree: &mut Tree) -> Result<NodeId, ParseError>;

    /// Parser name for logging
    fn name(&self) -> &'static str;
}

/// Built-in parser for the supported Rust subset
#[derive(Debug, Default, Clone, Copy)]
pub struct RustParser;

impl SourceParser for RustParser {
    fn parse_crate(&self, source: &str) -> Result<Tree, ParseError> {
        parse_crate(source)
    }

    fn parse_items(&self, source: &str, tree: &mut Tree) -> Result<Vec<NodeId>, ParseError> {
        parse_items_into(tree, source)
    }

    fn parse_expr(&self, source: &str, tree: &mut Tree) -> Result<NodeId, ParseError> {
        parse_expr_into(tree, source)
    }

    fn parse_ty(&self, source: &str, tree: &mut Tree) -> Result<NodeId, ParseError> {
        parse_ty_into(tree, source)
    }

    fn name(&self) -> &'static str {
        "rust"
    }
}

/// Create a parser by name
pub fn create_parser(parser_type: &str) -> Result<Box<dyn SourceParser>, ParseError> {
    match parser_type {
        "rust" => Ok(Box::new(RustParser)),
        _ => Err(ParseError::new(0, format!("unknown parser type: {parser_type}"))),
    }
}

pub fn parse_crate(source: &str) -> Result<Tree, ParseError> {
    let mut tree = Tree::new();
    let root = tree.root();
    rust::Parser::new(source, &mut tree)?.parse_crate_into(root)?;
    Ok(tree)
}

pub fn parse_items_into(tree: &mut Tree, source: &str) -> Result<Vec<NodeId>, ParseError> {
    rust::Parser::new(source, tree)?.parse_items_to_end()
}

pub fn parse_expr_into(tree: &mut Tree, source: &str) -> Result<NodeId, ParseError> {
    rust::Parser::new(source, tree)?.parse_expr_to_end()
}

pub fn parse_ty_into(tree: &mut Tree, source: &str) -> Result<NodeId, ParseError> {
    rust::Parser::new(source, tree)?.parse_ty_to_end()
}

/// Parses a standalone expression fragment into its own tree, rooted at it.
pub fn parse_expr_fragment(source: &str) -> Result<Tree, ParseError> {
    let mut tree = Tree::empty();
    let root = parse_expr_into(&mut tree, source)?;
    tree.set_root(root);
    Ok(tree)
}

/// Parses a standalone type fragment into its own tree, rooted at it.
pub fn parse_ty_fragment(source: &str) -> Result<Tree, ParseError> {
    let mut tree = Tree::empty();
    let root = parse_ty_into(&mut tree, source)?;
    tree.set_root(root);
    Ok(tree)
}
