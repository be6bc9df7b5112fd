//! Errors raised while reconstructing values from a generated program's
//! output stream (§7 — `IncompleteRecord`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("binary stream ended mid-element")]
    IncompleteRecord,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type ReadResult<T> = Result<T, ReadError>;
