//! Typed error type for the store crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} not found: '{id}'")]
    NotFound { kind: &'static str, id: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A record that can never be stored (empty id, duplicate key, ...).
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}
