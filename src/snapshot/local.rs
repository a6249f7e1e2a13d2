//! Local file-based snapshot store.
//!
//! The whole snapshot is rewritten after every begin and every end, through a
//! temporary file and an atomic rename, so a crash leaves either the previous
//! checkpoint or one carrying the open mutation in `pending_operations`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::deploy::{PluginInfo, Step};
use crate::error::{EngineError, Result, SnapshotError};

use super::lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
use super::manager::{SnapshotManager, SnapshotMutation};
use super::types::Snapshot;

/// Default state directory name.
pub const STATE_DIR: &str = ".halldyll";

/// Snapshot file name.
const SNAPSHOT_FILE: &str = "snapshot.json";

/// Lock file name.
const LOCK_FILE: &str = "snapshot.lock";

/// Snapshot store backed by a JSON file.
#[derive(Debug, Clone)]
pub struct LocalSnapshotStore {
    /// Directory holding the snapshot and lock files.
    base_dir: PathBuf,
    /// Path to the snapshot file.
    state_path: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
    /// The working copy, written through on every change.
    snapshot: Arc<Mutex<Snapshot>>,
}

/// Open mutation against a [`LocalSnapshotStore`].
#[derive(Debug)]
struct LocalMutation {
    store: LocalSnapshotStore,
}

impl LocalSnapshotStore {
    /// Opens the store in the given directory, loading the existing snapshot
    /// or starting an empty one for `stack`.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing snapshot cannot be read or fails its
    /// integrity check.
    pub async fn open(base_dir: impl Into<PathBuf>, stack: &str) -> Result<Self> {
        let base_dir = base_dir.into();
        Self::open_at(base_dir.join(SNAPSHOT_FILE), stack).await
    }

    /// Opens the store from an explicit snapshot file path.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing snapshot cannot be read or fails its
    /// integrity check.
    pub async fn open_at(state_path: impl Into<PathBuf>, stack: &str) -> Result<Self> {
        let state_path = state_path.into();
        let base_dir = state_path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let lock_path = base_dir.join(LOCK_FILE);

        let snapshot = match Self::load(&state_path).await? {
            Some(snapshot) => {
                if snapshot.stack != stack {
                    warn!(
                        "Snapshot at {} belongs to stack '{}', not '{stack}'",
                        state_path.display(),
                        snapshot.stack
                    );
                }
                if !snapshot.is_consistent() {
                    warn!(
                        "Snapshot has {} unfinished operation(s) from a previous update; \
                         the affected resources may have drifted",
                        snapshot.pending_operations.len()
                    );
                }
                snapshot
            }
            None => Snapshot::new(stack),
        };

        Ok(Self {
            base_dir,
            state_path,
            lock_path,
            snapshot: Arc::new(Mutex::new(snapshot)),
        })
    }

    /// Returns the path of the snapshot file.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Returns a copy of the current snapshot.
    pub async fn snapshot(&self) -> Snapshot {
        self.snapshot.lock().await.clone()
    }

    /// Returns true if the snapshot file exists on disk.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.state_path.exists()
    }

    /// Reads and verifies a snapshot file, if present.
    async fn load(state_path: &Path) -> Result<Option<Snapshot>> {
        if !state_path.exists() {
            debug!("Snapshot file does not exist: {}", state_path.display());
            return Ok(None);
        }

        info!("Loading snapshot from: {}", state_path.display());

        let content = fs::read_to_string(state_path).await.map_err(|e| {
            EngineError::Snapshot(SnapshotError::Corrupted {
                message: format!("Failed to read snapshot file: {e}"),
            })
        })?;

        let snapshot: Snapshot = serde_json::from_str(&content).map_err(|e| {
            EngineError::Snapshot(SnapshotError::Corrupted {
                message: format!("Failed to parse snapshot file: {e}"),
            })
        })?;

        snapshot.verify()?;
        Ok(Some(snapshot))
    }

    /// Applies a change to a copy of the working snapshot and writes it.
    ///
    /// The working copy only takes the change once it is on disk, so a failed
    /// write leaves both unchanged.
    async fn apply_and_save<F>(&self, change: F) -> std::result::Result<(), SnapshotError>
    where
        F: FnOnce(&mut Snapshot) + Send,
    {
        let mut snapshot = self.snapshot.lock().await;
        let mut next = snapshot.clone();
        change(&mut next);
        self.save(&mut next).await?;
        *snapshot = next;
        Ok(())
    }

    /// Seals and writes the snapshot atomically.
    async fn save(&self, snapshot: &mut Snapshot) -> std::result::Result<(), SnapshotError> {
        self.ensure_dir().await?;
        snapshot.seal();

        let content = serde_json::to_string_pretty(snapshot)
            .map_err(|e| SnapshotError::serialization(format!("Failed to serialize snapshot: {e}")))?;

        let temp_path = self.state_path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| SnapshotError::write(format!("Failed to create temp snapshot file: {e}")))?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| SnapshotError::write(format!("Failed to write snapshot file: {e}")))?;

        file.sync_all()
            .await
            .map_err(|e| SnapshotError::write(format!("Failed to sync snapshot file: {e}")))?;

        fs::rename(&temp_path, &self.state_path)
            .await
            .map_err(|e| SnapshotError::write(format!("Failed to rename snapshot file: {e}")))?;

        debug!("Snapshot saved to {}", self.state_path.display());
        Ok(())
    }

    /// Ensures the state directory exists.
    async fn ensure_dir(&self) -> std::result::Result<(), SnapshotError> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir)
                .await
                .map_err(|e| SnapshotError::write(format!("Failed to create state directory: {e}")))?;
        }
        Ok(())
    }

    /// Acquires the update lock for this snapshot.
    ///
    /// An expired lock is taken over. An empty `holder` gets a generated
    /// identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if another live lock is held or the lock file cannot
    /// be written.
    pub async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        if let Some(existing) = self.lock_info().await? {
            if !existing.is_expired() {
                return Err(EngineError::Snapshot(SnapshotError::LockedByOther {
                    holder: existing.holder.clone(),
                    since: existing.acquired_at.to_rfc3339(),
                }));
            }
            debug!("Expired lock found, taking over");
        }

        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };

        let stack = self.snapshot.lock().await.stack.clone();
        let lock_info = LockInfo::new(&holder_id, &stack);
        self.write_lock_file(&lock_info).await?;

        info!(
            "Acquired snapshot lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    /// Releases the lock if `lock_id` still owns it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be read or removed.
    pub async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.lock_info().await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file().await?;
                info!("Released snapshot lock: {lock_id}");
            } else {
                debug!(
                    "Lock ID mismatch: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
        }
        Ok(())
    }

    /// Removes the lock regardless of who holds it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be removed.
    pub async fn force_unlock(&self) -> Result<Option<LockInfo>> {
        let existing = self.lock_info().await?;
        if let Some(lock) = &existing {
            warn!("Forcibly removing snapshot lock held by {}", lock.holder);
            self.delete_lock_file().await?;
        }
        Ok(existing)
    }

    /// Returns true if a live lock is held.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be read.
    pub async fn is_locked(&self) -> Result<bool> {
        Ok(self
            .lock_info()
            .await?
            .is_some_and(|lock| !lock.is_expired()))
    }

    /// Reads the lock file if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file exists but cannot be parsed.
    pub async fn lock_info(&self) -> Result<Option<LockInfo>> {
        if !self.lock_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.lock_path).await.map_err(|e| {
            EngineError::Snapshot(SnapshotError::Corrupted {
                message: format!("Failed to read lock file: {e}"),
            })
        })?;

        let lock_info: LockInfo = serde_json::from_str(&content).map_err(|e| {
            EngineError::Snapshot(SnapshotError::Corrupted {
                message: format!("Failed to parse lock file: {e}"),
            })
        })?;

        Ok(Some(lock_info))
    }

    async fn write_lock_file(&self, lock_info: &LockInfo) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(lock_info)
            .map_err(|e| SnapshotError::serialization(format!("Failed to serialize lock: {e}")))?;

        let mut file = fs::File::create(&self.lock_path).await.map_err(|e| SnapshotError::LockFailed {
            message: format!("Failed to create lock file: {e}"),
        })?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| SnapshotError::LockFailed {
                message: format!("Failed to write lock file: {e}"),
            })?;

        file.sync_all().await.map_err(|e| SnapshotError::LockFailed {
            message: format!("Failed to sync lock file: {e}"),
        })?;

        Ok(())
    }

    async fn delete_lock_file(&self) -> Result<()> {
        if self.lock_path.exists() {
            fs::remove_file(&self.lock_path)
                .await
                .map_err(|e| SnapshotError::LockFailed {
                    message: format!("Failed to delete lock file: {e}"),
                })?;
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotManager for LocalSnapshotStore {
    async fn begin_mutation(&self, step: &Step) -> Result<Box<dyn SnapshotMutation>> {
        self.apply_and_save(|snapshot| snapshot.begin(step))
            .await
            .map_err(|e| SnapshotError::BeginMutation {
                urn: step.urn().clone(),
                message: e.to_string(),
            })?;

        Ok(Box::new(LocalMutation { store: self.clone() }))
    }

    async fn record_plugin(&self, plugin: &PluginInfo) -> Result<()> {
        self.apply_and_save(|snapshot| snapshot.record_plugin(plugin))
            .await?;
        Ok(())
    }

    async fn register_resource_outputs(&self, step: &Step) -> Result<()> {
        self.apply_and_save(|snapshot| snapshot.register_outputs(step))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotMutation for LocalMutation {
    async fn end(self: Box<Self>, step: &Step, keep: bool) -> Result<()> {
        self.store
            .apply_and_save(|snapshot| snapshot.end(step, keep))
            .await
            .map_err(|e| SnapshotError::EndMutation {
                urn: step.urn().clone(),
                message: e.to_string(),
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{ResourceState, Urn};
    use tempfile::TempDir;

    async fn create_test_store() -> (LocalSnapshotStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalSnapshotStore::open(temp_dir.path(), "dev")
            .await
            .expect("Failed to open store");
        (store, temp_dir)
    }

    fn bucket(name: &str) -> ResourceState {
        ResourceState::new(Urn::new("dev", "web", "aws:s3:Bucket", name))
    }

    #[tokio::test]
    async fn test_open_empty() {
        let (store, _temp) = create_test_store().await;

        assert!(!store.exists());
        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.stack, "dev");
        assert!(snapshot.resources.is_empty());
    }

    #[tokio::test]
    async fn test_mutations_are_persisted() {
        let (store, temp) = create_test_store().await;
        let step = Step::create(bucket("assets").with_id("bucket-1"));

        let mutation = store.begin_mutation(&step).await.expect("begin");
        assert!(store.exists());

        let reopened = LocalSnapshotStore::open(temp.path(), "dev")
            .await
            .expect("reopen mid-mutation");
        assert_eq!(reopened.snapshot().await.pending_operations.len(), 1);

        mutation.end(&step, true).await.expect("end");

        let reopened = LocalSnapshotStore::open(temp.path(), "dev")
            .await
            .expect("reopen");
        let snapshot = reopened.snapshot().await;
        assert!(snapshot.is_consistent());
        assert_eq!(
            snapshot.get(step.urn()).and_then(|r| r.id.as_deref()),
            Some("bucket-1")
        );
    }

    #[tokio::test]
    async fn test_failed_begin_leaves_no_pending_operation() {
        let (store, temp) = create_test_store().await;
        let failed = Step::create(bucket("assets"));
        let later = Step::create(bucket("logs"));

        // A directory at the snapshot path makes the final rename fail.
        let state_path = store.state_path().to_path_buf();
        std::fs::create_dir_all(&state_path).expect("block snapshot path");
        assert!(store.begin_mutation(&failed).await.is_err());
        std::fs::remove_dir_all(&state_path).expect("unblock snapshot path");

        let mutation = store.begin_mutation(&later).await.expect("begin");
        mutation.end(&later, true).await.expect("end");

        let reopened = LocalSnapshotStore::open(temp.path(), "dev")
            .await
            .expect("reopen");
        let snapshot = reopened.snapshot().await;
        assert!(snapshot.pending_operations.is_empty());
        assert!(snapshot.get(later.urn()).is_some());
        assert!(snapshot.get(failed.urn()).is_none());
    }

    #[tokio::test]
    async fn test_failed_end_does_not_record_resource() {
        let (store, temp) = create_test_store().await;
        let failed = Step::create(bucket("assets"));
        let later = Step::create(bucket("logs"));

        let mutation = store.begin_mutation(&failed).await.expect("begin");

        let state_path = store.state_path().to_path_buf();
        std::fs::remove_file(&state_path).expect("remove snapshot file");
        std::fs::create_dir_all(&state_path).expect("block snapshot path");
        assert!(mutation.end(&failed, true).await.is_err());
        std::fs::remove_dir_all(&state_path).expect("unblock snapshot path");

        let mutation = store.begin_mutation(&later).await.expect("begin");
        mutation.end(&later, true).await.expect("end");

        let reopened = LocalSnapshotStore::open(temp.path(), "dev")
            .await
            .expect("reopen");
        let snapshot = reopened.snapshot().await;
        assert!(snapshot.get(failed.urn()).is_none());
        assert_eq!(snapshot.pending_operations.len(), 1);
        assert_eq!(&snapshot.pending_operations[0].urn, failed.urn());
    }

    #[tokio::test]
    async fn test_tampered_file_is_rejected() {
        let (store, temp) = create_test_store().await;
        let step = Step::create(bucket("assets"));
        let mutation = store.begin_mutation(&step).await.expect("begin");
        mutation.end(&step, true).await.expect("end");

        let content = std::fs::read_to_string(store.state_path()).expect("read");
        let tampered = content.replace("assets", "other");
        std::fs::write(store.state_path(), tampered).expect("write");

        let result = LocalSnapshotStore::open(temp.path(), "dev").await;
        assert!(matches!(
            result,
            Err(EngineError::Snapshot(SnapshotError::Corrupted { .. }))
        ));
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (store, _temp) = create_test_store().await;

        let lock = store
            .acquire_lock("test-holder")
            .await
            .expect("Failed to acquire lock");
        assert_eq!(lock.stack, "dev");
        assert!(store.is_locked().await.expect("is_locked failed"));

        store
            .release_lock(&lock.lock_id)
            .await
            .expect("Failed to release lock");

        assert!(!store.is_locked().await.expect("is_locked failed"));
    }

    #[tokio::test]
    async fn test_lock_conflict_and_force_unlock() {
        let (store, _temp) = create_test_store().await;

        let _lock = store
            .acquire_lock("holder-1")
            .await
            .expect("Failed to acquire first lock");

        let result = store.acquire_lock("holder-2").await;
        assert!(matches!(
            result,
            Err(EngineError::Snapshot(SnapshotError::LockedByOther { .. }))
        ));

        let removed = store.force_unlock().await.expect("force unlock");
        assert_eq!(removed.map(|l| l.holder), Some(String::from("holder-1")));
        assert!(!store.is_locked().await.expect("is_locked failed"));
    }
}
