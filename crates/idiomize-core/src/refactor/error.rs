use thiserror::Error;

use crate::ast::TreeError;
use crate::parser::ParseError;

/// Errors raised while building or running refactoring commands
#[derive(Error, Debug)]
pub enum RefactorError {
    #[error("Query error at offset {offset}: {message}")]
    Query { offset: usize, message: String },

    #[error("Rewrite conflict: {message}")]
    RewriteConflict { message: String },

    #[error("Template error: {0}")]
    Template(#[from] ParseError),

    #[error("Script error at offset {offset}: {message}")]
    Script { offset: usize, message: String },

    #[error("Invalid arguments for `{command}`: {message}")]
    InvalidArgument { command: String, message: String },

    #[error("Item `{name}` not found")]
    UnknownItem { name: String },

    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),
}

impl RefactorError {
    /// Create a rewrite conflict
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::RewriteConflict {
            message: message.into(),
        }
    }

    /// Create a query error
    pub fn query(offset: usize, message: impl Into<String>) -> Self {
        Self::Query {
            offset,
            message: message.into(),
        }
    }

    /// Create a script syntax error
    pub fn script(offset: usize, message: impl Into<String>) -> Self {
        Self::Script {
            offset,
            message: message.into(),
        }
    }

    /// Create an argument error for a command
    pub fn invalid_argument(command: &str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            command: command.to_string(),
            message: message.into(),
        }
    }

    /// Create an unknown item error
    pub fn unknown_item(name: &str) -> Self {
        Self::UnknownItem {
            name: name.to_string(),
        }
    }
}
