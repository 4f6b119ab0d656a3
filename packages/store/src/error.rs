use crate::models::FileId;

/// Errors raised by local store implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no file with id {0}")]
    NotFound(FileId),

    #[error("a file already exists at {0}")]
    PathTaken(String),

    #[error("content of kind {found:?} cannot be stored in a {expected:?} file")]
    KindMismatch {
        expected: crate::models::FileKind,
        found: crate::models::FileKind,
    },

    #[error("store I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("store snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
