//! Error type shared by every policy, model, and table loader.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by selection policies and their collaborators.
///
/// None of these are transient: a missing or incompatible model is a caller
/// bug, so they are returned immediately and never retried internally.
#[derive(Debug, Error)]
pub enum SelectionError {
    /// The policy was asked to choose without a usable model attached.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An argument did not satisfy its contract (model shape, arm index, table).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A policy that needs a Beta-Bernoulli posterior got some other model.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Reading a Gittins index table from disk failed.
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A JSON Gittins index table could not be parsed.
    #[cfg(feature = "serde")]
    #[error("malformed json table: {0}")]
    Json(#[from] serde_json::Error),
}

impl SelectionError {
    pub(crate) fn no_model() -> Self {
        Self::InvalidState("must set predictive model".to_string())
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, SelectionError>;
