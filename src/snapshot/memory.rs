//! In-memory snapshot store.
//!
//! Keeps the snapshot in process memory and records every begin and end it
//! sees, in order. Used for previews that still want a manager and for
//! observing mutation ordering in tests.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};

use crate::deploy::{PluginInfo, Step, StepOp};
use crate::error::Result;
use crate::resource::Urn;

use super::manager::{SnapshotManager, SnapshotMutation};
use super::types::Snapshot;

/// One entry of the mutation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationRecord {
    /// A mutation was begun.
    Begin {
        /// Resource being mutated.
        urn: Urn,
        /// Operation being performed.
        op: StepOp,
    },
    /// A mutation was ended.
    End {
        /// Resource being mutated.
        urn: Urn,
        /// Operation being performed.
        op: StepOp,
        /// Whether the new state was kept.
        keep: bool,
    },
}

#[derive(Debug)]
struct MemoryInner {
    snapshot: Snapshot,
    log: Vec<MutationRecord>,
}

/// Snapshot store held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemorySnapshotStore {
    inner: Arc<Mutex<MemoryInner>>,
}

/// Open mutation against a [`MemorySnapshotStore`].
#[derive(Debug)]
struct MemoryMutation {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemorySnapshotStore {
    /// Creates a store with an empty snapshot.
    #[must_use]
    pub fn new(stack: &str) -> Self {
        Self::with_snapshot(Snapshot::new(stack))
    }

    /// Creates a store seeded with an existing snapshot.
    #[must_use]
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryInner {
                snapshot,
                log: Vec::new(),
            })),
        }
    }

    /// Returns a copy of the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.lock().snapshot.clone()
    }

    /// Returns a copy of the mutation log.
    #[must_use]
    pub fn log(&self) -> Vec<MutationRecord> {
        self.lock().log.clone()
    }

    /// Returns the ended mutations as `(urn, op, keep)`, in commit order.
    #[must_use]
    pub fn commits(&self) -> Vec<(Urn, StepOp, bool)> {
        self.lock()
            .log
            .iter()
            .filter_map(|record| match record {
                MutationRecord::End { urn, op, keep } => Some((urn.clone(), *op, *keep)),
                MutationRecord::Begin { .. } => None,
            })
            .collect()
    }

    /// Returns the number of mutations begun.
    #[must_use]
    pub fn begin_count(&self) -> usize {
        self.lock()
            .log
            .iter()
            .filter(|record| matches!(record, MutationRecord::Begin { .. }))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SnapshotManager for MemorySnapshotStore {
    async fn begin_mutation(&self, step: &Step) -> Result<Box<dyn SnapshotMutation>> {
        {
            let mut inner = self.lock();
            inner.snapshot.begin(step);
            inner.log.push(MutationRecord::Begin {
                urn: step.urn().clone(),
                op: step.op(),
            });
        }
        Ok(Box::new(MemoryMutation {
            inner: Arc::clone(&self.inner),
        }))
    }

    async fn record_plugin(&self, plugin: &PluginInfo) -> Result<()> {
        self.lock().snapshot.record_plugin(plugin);
        Ok(())
    }

    async fn register_resource_outputs(&self, step: &Step) -> Result<()> {
        self.lock().snapshot.register_outputs(step);
        Ok(())
    }
}

#[async_trait]
impl SnapshotMutation for MemoryMutation {
    async fn end(self: Box<Self>, step: &Step, keep: bool) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.snapshot.end(step, keep);
        inner.log.push(MutationRecord::End {
            urn: step.urn().clone(),
            op: step.op(),
            keep,
        });
        Ok(())
    }
}
