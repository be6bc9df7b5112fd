//! Errors raised while declaring, emitting, compiling, and running a QIT
//! program (§7).

use std::path::PathBuf;

use qit_ast::AstError;
use qit_runtime::ReadError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QitError {
    /// A free variable was referenced by the root expression but not
    /// supplied in `args`.
    #[error("unbound free variable: {0}")]
    UnboundVariable(String),

    /// `args` supplied a variable the root expression does not read.
    #[error("superfluous argument: {0}")]
    SuperfluousArgument(String),

    /// A function's `uses` dependencies formed a cycle; should be
    /// impossible by construction, hence an assertion rather than a
    /// constructed-on-purpose error path (§7, §9).
    #[error("declaration cycle detected while declaring {0}")]
    DeclarationCycle(String),

    /// The native compiler invocation exited non-zero.
    #[error("native compiler failed (exit status {status}); source written to {source_path}\n{stderr}")]
    CompileFailure {
        status: i32,
        source_path: PathBuf,
        stderr: String,
    },

    /// The generated executable exited non-zero or was killed by a
    /// signal.
    #[error("generated program failed (exit status {status}): {stderr}")]
    RunFailure { status: i32, stderr: String },

    /// The generated executable's own `assert` fired (detected via a
    /// signal or conventional abort exit status).
    #[error("generated program's runtime assertion failed: {0}")]
    Assertion(String),

    #[error(transparent)]
    Ast(#[from] AstError),

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type QitResult<T> = Result<T, QitError>;
