//! Snapshot manager trait definitions.
//!
//! This module defines the interface the engine uses to checkpoint every
//! mutation it performs.

use async_trait::async_trait;

use crate::deploy::{PluginInfo, Step};
use crate::error::Result;

/// Durable, ordered record of resources, mutated one step at a time.
///
/// Implementations must guarantee that a crash between
/// [`SnapshotManager::begin_mutation`] and [`SnapshotMutation::end`] leaves
/// the record either in its prior state or in a state flagged as
/// inconsistent, never silently corrupted.
#[async_trait]
pub trait SnapshotManager: Send + Sync {
    /// Announces that the step is about to be applied.
    async fn begin_mutation(&self, step: &Step) -> Result<Box<dyn SnapshotMutation>>;

    /// Records a plugin loaded for the update.
    async fn record_plugin(&self, plugin: &PluginInfo) -> Result<()>;

    /// Persists outputs registered after the resource's step completed.
    async fn register_resource_outputs(&self, step: &Step) -> Result<()>;
}

/// Exclusive intent to modify the snapshot for exactly one step.
///
/// Ending consumes the handle, so a mutation can be ended at most once.
#[async_trait]
pub trait SnapshotMutation: Send {
    /// Commits the mutation. When `keep` is true the step's new state is
    /// recorded; otherwise the record keeps what it had before the step.
    async fn end(self: Box<Self>, step: &Step, keep: bool) -> Result<()>;
}

#[async_trait]
impl<T: SnapshotManager + ?Sized> SnapshotManager for std::sync::Arc<T> {
    async fn begin_mutation(&self, step: &Step) -> Result<Box<dyn SnapshotMutation>> {
        (**self).begin_mutation(step).await
    }

    async fn record_plugin(&self, plugin: &PluginInfo) -> Result<()> {
        (**self).record_plugin(plugin).await
    }

    async fn register_resource_outputs(&self, step: &Step) -> Result<()> {
        (**self).register_resource_outputs(step).await
    }
}
