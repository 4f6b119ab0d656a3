//! Bidirectional sync between a local document store and a Git-hosted tree.

pub mod auth;
pub mod cache;
pub mod commit;
pub mod diff;
pub mod error;
pub mod merge;
pub mod pull;
pub mod remote;
pub mod sync;
pub mod tree;

pub use auth::{StaticToken, TokenProvider};
pub use cache::TtlCache;
pub use commit::{Change, CommitOutcome};
pub use error::{Result, SyncError};
pub use merge::merge;
pub use pull::PulledFile;
pub use remote::{GitHubTransport, MemoryRemote, RemoteTransport};
pub use sync::{SyncSummary, Syncer};
pub use tree::RemoteEntry;
