//! Construction-time errors for the type and expression algebra.
//!
//! These are raised eagerly at the host call that introduces the
//! inconsistency (§7 of the specification), before any code generation is
//! attempted.

use thiserror::Error;

/// Errors raised while building the expression graph on the host.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AstError {
    /// A value payload did not match its declared type, or two operands of
    /// an operation disagreed in type.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Two fields of a `Product`/`Struct` share a name.
    #[error("duplicate field name: {0}")]
    DuplicateField(String),

    /// A `Values` type was constructed with an empty value list.
    #[error("Values type must carry at least one value")]
    EmptyValueSet,
}

/// Result type for `qit-ast` construction operations.
pub type AstResult<T> = Result<T, AstError>;
