//! Remote synchronization layer.
//!
//! Sessions are exchanged with a remote document store as whole snapshots.
//! `sync_version` decides which copy wins; nothing is merged.

pub mod conflict_resolver;
pub mod http_remote;
pub mod remote;
pub mod types;

pub use conflict_resolver::{decide, decide_by_version, MergeDecision};
pub use http_remote::HttpRemoteStore;
pub use remote::{MemoryRemoteStore, RemoteSessionStore};
pub use types::{ReconcileOutcome, SyncError, SyncStatus};
