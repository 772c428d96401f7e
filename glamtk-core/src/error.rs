//! The error taxonomy described in the design (CLI argument, file format, I/O,
//! internal invariant). Library code returns [`GlamtkError`]; callers at the
//! process boundary map variants to the documented exit codes.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// One of the four error kinds the toolkit distinguishes.
#[derive(Debug, Error)]
pub enum GlamtkError {
    /// A CLI argument was malformed or missing. No stack trace unless debug.
    #[error("argument error: {0}")]
    CliArgument(String),

    /// The corpus, query file, or a store file violated the grammar it is
    /// supposed to follow.
    #[error("{path}:{line}: {cause}")]
    FileFormat {
        path: PathBuf,
        line: usize,
        cause: String,
    },

    /// An I/O operation failed; context is attached at the call site.
    #[error("I/O error during {op} on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// An aggregation or store invariant was violated. Always a bug.
    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

impl GlamtkError {
    pub fn io(path: impl Into<PathBuf>, op: &'static str, source: std::io::Error) -> Self {
        GlamtkError::Io {
            path: path.into(),
            op,
            source,
        }
    }

    pub fn file_format(path: impl Into<PathBuf>, line: usize, cause: impl fmt::Display) -> Self {
        GlamtkError::FileFormat {
            path: path.into(),
            line,
            cause: cause.to_string(),
        }
    }

    pub fn invariant(cause: impl fmt::Display) -> Self {
        GlamtkError::Invariant(cause.to_string())
    }

    /// Exit code category, per spec §6: 0 success, non-zero distinguishable
    /// by kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            GlamtkError::CliArgument(_) => 1,
            GlamtkError::FileFormat { .. } => 2,
            GlamtkError::Io { .. } => 3,
            GlamtkError::Invariant(_) => 4,
        }
    }
}

pub type Result<T> = std::result::Result<T, GlamtkError>;
