//! Snapshot persistence.
//!
//! This module defines the contract the engine uses to checkpoint resource
//! state around every step, and the stores implementing it:
//!
//! - [`LocalSnapshotStore`]: JSON file with atomic writes and an update lock
//! - [`MemorySnapshotStore`]: in-process store with an observable mutation log

mod local;
mod lock;
mod manager;
mod memory;
mod types;

pub use local::{LocalSnapshotStore, STATE_DIR};
pub use lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
pub use manager::{SnapshotManager, SnapshotMutation};
pub use memory::{MemorySnapshotStore, MutationRecord};
pub use types::{PendingOperation, Snapshot, SNAPSHOT_VERSION};
