//! Error taxonomy (§7). Library code returns these; the CLI boundary maps
//! them to the exit-code taxonomy in §6.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("node id collision: {a} and {b} both hash to {hash:#x} with different names")]
    IdHashCollision { a: String, b: String, hash: u64 },

    #[error("metadata type mismatch on key '{key}': expected {expected}, found {found}")]
    MetadataTypeMismatch {
        key: String,
        expected: String,
        found: String,
    },

    #[error("unsupported MetaCG format version {found}; supported versions are {supported:?}")]
    FormatVersionMismatch { found: String, supported: Vec<u32> },

    #[error("lossy export to format version {to}: {reason}")]
    LossyExport { to: u32, reason: String },

    #[error("malformed MetaCG document: {0}")]
    MalformedDocument(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
