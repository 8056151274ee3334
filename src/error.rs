//! Error types for this crate.
use thiserror::Error;

use crate::Item;

/// Any error raised by a blob store or key-value store client.
pub type TransportError = Box<dyn std::error::Error + Send + Sync>;

/// Any kind of error that can happen when parsing user-provided values.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Error)]
pub enum ParseError {
    #[error("invalid billing date '{0}', expected YYYY-MM")]
    InvalidDate(String),
}

/// Any kind of error in the pipeline check -> fetch -> unzip -> load -> commit.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("store request failed: {0}")]
    Transport(#[source] TransportError),
    #[error("found {count} objects matching '{prefix}', expected exactly one")]
    AmbiguousReport { prefix: String, count: usize },
    #[error("no object matching '{prefix}'")]
    MissingReport { prefix: String },
    #[error("no '{field}' field present for report '{name}'")]
    CorruptMetadata { name: String, field: &'static str },
    #[error("unexpected archive shape: {0}")]
    UnexpectedArchiveShape(String),
    #[error("malformed row {row}: {reason}")]
    MalformedRow { row: u64, reason: String },
    #[error("{} items still unprocessed after {attempts} attempts", residual.len())]
    WriteTimeout { attempts: u32, residual: Vec<Item> },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ingestion cancelled")]
    Cancelled,
}

impl IngestError {
    pub fn transport(error: impl Into<TransportError>) -> Self {
        Self::Transport(error.into())
    }
}

pub type IngestResult<T> = Result<T, IngestError>;
