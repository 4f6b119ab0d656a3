use store::StoreError;

/// Errors raised while talking to the remote or reconciling against it.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("remote returned {status} for {path}: {message}")]
    Transport {
        status: u16,
        path: String,
        message: String,
    },

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("branch {branch} moved (expected {expected:?}, found {actual:?})")]
    Conflict {
        branch: String,
        expected: Option<String>,
        actual: Option<String>,
    },

    #[error("cannot decode {path}: {reason}")]
    Decode { path: String, reason: String },

    #[error("no bytes available for {path}")]
    MissingContent { path: String },

    #[error("tree {sha} is too large to list in one request")]
    TruncatedTree { sha: String },

    #[error("this operation requires an access token")]
    Unauthenticated,

    #[error("a sync pass is already running")]
    InFlight,

    #[error("local store: {0}")]
    Store(#[from] StoreError),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Whether this error only affects a single file and the pass may go on.
    pub fn is_file_local(&self) -> bool {
        matches!(
            self,
            SyncError::Decode { .. } | SyncError::MissingContent { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
