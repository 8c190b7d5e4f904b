//! Error types for catalog construction, DSL ingestion, and execution.
//!
//! Synthesis failure is not represented here: "no plan within budget" is
//! data (an empty result list or `None`), never an error.

use thiserror::Error;

/// Catalog lookup errors
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    /// A consumer asked for a type name absent from the model
    #[error("unknown type: {0}")]
    UnknownType(String),

    /// Catalog entries are append-only; replacing an existing name is forbidden
    #[error("duplicate definition: {0}")]
    Duplicate(String),
}

/// DSL ingestion errors, with the line number and offending text
#[derive(Debug, Clone, Error)]
#[error("line {line}: {message}: {text}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
    pub text: String,
}

impl ParseError {
    pub fn new(line: usize, message: impl Into<String>, text: impl Into<String>) -> Self {
        ParseError {
            line,
            message: message.into(),
            text: text.into(),
        }
    }
}

/// Execution errors
///
/// Backend failures carry the offending function id and the cause. Formula
/// evaluation failures are wrapped here with the expression in the cause.
#[derive(Debug, Clone, Error)]
pub enum ExecError {
    /// A backend raised or returned an unparseable result
    #[error("execution of '{func}' failed: {cause}")]
    Failed { func: String, cause: String },

    /// Cooperative cancellation; partial provenance is retained on the context
    #[error("execution cancelled")]
    Cancelled,
}

impl ExecError {
    pub fn failed(func: &str, cause: impl Into<String>) -> Self {
        ExecError::Failed {
            func: func.to_string(),
            cause: cause.into(),
        }
    }
}

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Result type for execution
pub type ExecResult<T> = Result<T, ExecError>;
