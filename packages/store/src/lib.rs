pub mod config;
pub mod error;
pub mod fingerprint;
pub mod local;
pub mod models;
pub mod objects;
pub mod repo;

mod file_store;
mod memory;

pub use config::TrackingConfig;
pub use error::{Result, StoreError};
pub use file_store::FileStore;
pub use local::{current_fingerprint, is_dirty, LocalStore};
pub use memory::{MemoryLocalStore, MemoryObjectStore, Snapshot};
pub use models::{Content, FileId, FileKind, FileMeta, RepoFile, SyncMark, Tombstone};
pub use objects::Sha;
pub use repo::{FlatEntry, ObjectStore, Repository, TreeOverride};
