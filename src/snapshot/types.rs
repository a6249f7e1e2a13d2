//! Snapshot types.
//!
//! A [`Snapshot`] is the durable record of every resource believed to exist,
//! plus the plugins used to manage them and any mutation that was begun but
//! never ended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::deploy::{PluginInfo, Step, StepOp};
use crate::error::SnapshotError;
use crate::resource::{ResourceState, Urn};

/// Current version of the snapshot format.
pub const SNAPSHOT_VERSION: &str = "1.0";

/// The complete recorded state of a stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Snapshot format version.
    pub version: String,
    /// Stack name.
    pub stack: String,
    /// Resources in the order they were recorded.
    pub resources: Vec<ResourceState>,
    /// Plugins loaded by updates of this stack.
    #[serde(default)]
    pub plugins: Vec<PluginInfo>,
    /// Mutations that were begun but not yet ended.
    #[serde(default)]
    pub pending_operations: Vec<PendingOperation>,
    /// When the snapshot was last changed.
    pub last_updated: DateTime<Utc>,
    /// SHA-256 digest of resources and plugins, hex-encoded.
    #[serde(default)]
    pub integrity: String,
}

/// A mutation recorded at begin time and cleared at end time.
///
/// One left behind after a crash means the resource may have changed without
/// the snapshot knowing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Resource being mutated.
    pub urn: Urn,
    /// Operation being performed.
    pub op: StepOp,
    /// When the mutation was begun.
    pub started_at: DateTime<Utc>,
}

impl Snapshot {
    /// Creates an empty snapshot for a stack.
    #[must_use]
    pub fn new(stack: &str) -> Self {
        let mut snapshot = Self {
            version: SNAPSHOT_VERSION.to_string(),
            stack: stack.to_string(),
            resources: Vec::new(),
            plugins: Vec::new(),
            pending_operations: Vec::new(),
            last_updated: Utc::now(),
            integrity: String::new(),
        };
        snapshot.seal();
        snapshot
    }

    /// Gets the live (not pending-delete) resource with the given URN.
    #[must_use]
    pub fn get(&self, urn: &Urn) -> Option<&ResourceState> {
        self.resources.iter().find(|r| &r.urn == urn && !r.delete)
    }

    /// Returns true if no mutation is left open.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.pending_operations.is_empty()
    }

    /// Records that a mutation for the step has begun.
    pub fn begin(&mut self, step: &Step) {
        self.pending_operations.push(PendingOperation {
            urn: step.urn().clone(),
            op: step.op(),
            started_at: Utc::now(),
        });
        self.touch();
    }

    /// Ends the mutation for the step, applying the step's effect when `keep`.
    pub fn end(&mut self, step: &Step, keep: bool) {
        if let Some(index) = self
            .pending_operations
            .iter()
            .position(|p| &p.urn == step.urn() && p.op == step.op())
        {
            self.pending_operations.remove(index);
        }

        if keep {
            self.apply(step);
        }
        self.touch();
    }

    /// Applies the effect of a completed step to the resource list.
    fn apply(&mut self, step: &Step) {
        let urn = step.urn();
        match step.op() {
            StepOp::Same | StepOp::Create | StepOp::Update | StepOp::Read => {
                if let Some(new) = step.new_state() {
                    self.upsert(new.clone());
                }
            }
            StepOp::CreateReplacement => {
                if let Some(old) = self.resources.iter_mut().find(|r| &r.urn == urn && !r.delete) {
                    old.delete = true;
                }
                if let Some(new) = step.new_state() {
                    self.resources.push(new.clone());
                }
            }
            StepOp::Replace => {}
            StepOp::Delete => self.resources.retain(|r| &r.urn != urn || r.delete),
            StepOp::DeleteReplaced => self.resources.retain(|r| &r.urn != urn || !r.delete),
        }
    }

    /// Inserts a resource, or replaces the live one with the same URN in place.
    fn upsert(&mut self, state: ResourceState) {
        match self
            .resources
            .iter_mut()
            .find(|r| r.urn == state.urn && !r.delete)
        {
            Some(existing) => *existing = state,
            None => self.resources.push(state),
        }
    }

    /// Records a loaded plugin, ignoring exact duplicates.
    pub fn record_plugin(&mut self, plugin: &PluginInfo) {
        if !self.plugins.contains(plugin) {
            self.plugins.push(plugin.clone());
            self.touch();
        }
    }

    /// Updates the outputs of the live resource the step targets.
    pub fn register_outputs(&mut self, step: &Step) {
        let outputs = step.res().outputs.clone();
        if let Some(resource) = self
            .resources
            .iter_mut()
            .find(|r| &r.urn == step.urn() && !r.delete)
        {
            resource.outputs = outputs;
            self.touch();
        }
    }

    fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    /// Computes the integrity digest of the current contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the contents cannot be serialized.
    pub fn compute_integrity(&self) -> Result<String, SnapshotError> {
        let mut hasher = Sha256::new();
        let resources = serde_json::to_vec(&self.resources)
            .map_err(|e| SnapshotError::serialization(format!("Failed to hash resources: {e}")))?;
        let plugins = serde_json::to_vec(&self.plugins)
            .map_err(|e| SnapshotError::serialization(format!("Failed to hash plugins: {e}")))?;
        hasher.update(self.stack.as_bytes());
        hasher.update(resources);
        hasher.update(plugins);
        Ok(hex::encode(hasher.finalize()))
    }

    /// Stores the current integrity digest.
    pub fn seal(&mut self) {
        if let Ok(digest) = self.compute_integrity() {
            self.integrity = digest;
        }
    }

    /// Checks the format version and the integrity digest.
    ///
    /// # Errors
    ///
    /// Returns an error if the version is unsupported or the digest does not
    /// match the contents.
    pub fn verify(&self) -> Result<(), SnapshotError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::VersionMismatch {
                expected: SNAPSHOT_VERSION.to_string(),
                found: self.version.clone(),
            });
        }

        let digest = self.compute_integrity()?;
        if digest != self.integrity {
            return Err(SnapshotError::Corrupted {
                message: format!(
                    "integrity digest mismatch (recorded {}, computed {digest})",
                    self.integrity
                ),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(name: &str) -> ResourceState {
        ResourceState::new(Urn::new("dev", "web", "aws:s3:Bucket", name))
    }

    #[test]
    fn test_begin_end_keeps_new_state() {
        let mut snapshot = Snapshot::new("dev");
        let step = Step::create(bucket("assets"));

        snapshot.begin(&step);
        assert!(!snapshot.is_consistent());

        snapshot.end(&step, true);
        assert!(snapshot.is_consistent());
        assert!(snapshot.get(step.urn()).is_some());
    }

    #[test]
    fn test_end_without_keep_leaves_resources_alone() {
        let mut snapshot = Snapshot::new("dev");
        let old = bucket("legacy");
        snapshot.end(&Step::create(old.clone()), true);

        let delete = Step::delete(old);
        snapshot.begin(&delete);
        snapshot.end(&delete, false);

        assert!(snapshot.is_consistent());
        assert!(snapshot.get(delete.urn()).is_some());
    }

    #[test]
    fn test_replacement_sequence() {
        let mut snapshot = Snapshot::new("dev");
        let old = bucket("assets").with_id("old");
        snapshot.end(&Step::create(old.clone()), true);

        let new = bucket("assets").with_id("new");
        let mut replaced = old.clone();
        replaced.delete = true;

        snapshot.end(&Step::create_replacement(old.clone(), new.clone()), true);
        assert_eq!(snapshot.resources.len(), 2);
        assert_eq!(snapshot.get(&new.urn).and_then(|r| r.id.as_deref()), Some("new"));

        snapshot.end(&Step::replace(old, new.clone(), vec![]), true);
        snapshot.end(&Step::delete_replaced(replaced), true);

        assert_eq!(snapshot.resources.len(), 1);
        assert_eq!(snapshot.resources[0].id.as_deref(), Some("new"));
    }

    #[test]
    fn test_integrity_detects_tampering() {
        let mut snapshot = Snapshot::new("dev");
        snapshot.end(&Step::create(bucket("assets")), true);
        snapshot.seal();
        assert!(snapshot.verify().is_ok());

        snapshot.resources[0].id = Some(String::from("tampered"));
        assert!(matches!(snapshot.verify(), Err(SnapshotError::Corrupted { .. })));
    }

    #[test]
    fn test_version_mismatch() {
        let mut snapshot = Snapshot::new("dev");
        snapshot.version = String::from("0.1");
        assert!(matches!(snapshot.verify(), Err(SnapshotError::VersionMismatch { .. })));
    }
}
