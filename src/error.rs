use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Catalog unavailable at {}: {reason}", path.display())]
    CatalogUnavailable { path: PathBuf, reason: String },

    #[error("Embedding model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Invalid query embedding: {0}")]
    InvalidQueryEmbedding(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Malformed record '{name}': {reason}")]
    MalformedRecord { name: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("ONNX Runtime error: {0}")]
    Ort(#[from] ort::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn catalog(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::CatalogUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the search engine may recover from this error by falling back
    /// to lexical matching.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ModelUnavailable(_) | Error::InvalidQueryEmbedding(_) | Error::MalformedRecord { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
