//! Step executor.
//!
//! [`UpdateActions`] implements the per-step callbacks the plan walker drives:
//! a pre-step hook that reports the step and opens a snapshot mutation, and a
//! post-step hook that classifies the provider outcome, counts the step and
//! commits the mutation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::deploy::{ApplyOutcome, PluginInfo, Step, StepOp};
use crate::error::Result;
use crate::resource::{ResourceStatus, Urn};
use crate::snapshot::{SnapshotManager, SnapshotMutation};

use super::cancel::Cancellation;
use super::changes::ResourceChanges;
use super::events::EventEmitter;
use super::options::{UnknownStatusPolicy, UpdateOptions};

/// Bookkeeping shared by concurrently executing steps.
#[derive(Debug, Default)]
struct WalkState {
    /// Logical steps completed.
    steps: usize,
    /// Counted steps by kind.
    ops: ResourceChanges,
    /// Step most recently started for each resource.
    seen: HashMap<Urn, Step>,
}

/// Per-step callbacks for a real update.
pub struct UpdateActions {
    snapshot: Arc<dyn SnapshotManager>,
    emitter: EventEmitter,
    cancel: Cancellation,
    report_default_provider_steps: bool,
    unknown_status_policy: UnknownStatusPolicy,
    state: Mutex<WalkState>,
    maybe_corrupt: AtomicBool,
}

/// Persists plugins as they are loaded.
#[derive(Clone)]
pub struct PluginActions {
    snapshot: Arc<dyn SnapshotManager>,
}

impl UpdateActions {
    /// Creates the callbacks for one update.
    #[must_use]
    pub fn new(
        snapshot: Arc<dyn SnapshotManager>,
        emitter: EventEmitter,
        cancel: Cancellation,
        options: &UpdateOptions,
    ) -> Self {
        Self {
            snapshot,
            emitter,
            cancel,
            report_default_provider_steps: options.report_default_provider_steps,
            unknown_status_policy: options.unknown_status_policy,
            state: Mutex::new(WalkState::default()),
            maybe_corrupt: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WalkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_reportable(&self, step: &Step) -> bool {
        self.report_default_provider_steps || !step.is_default_provider_step()
    }

    fn assert_seen(&self, step: &Step) {
        let seen = self.lock().seen.contains_key(step.urn());
        assert!(seen, "step for {} finished before it was started", step.urn());
    }

    /// Registers the step, reports it, and opens its snapshot mutation.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot refuses the mutation. The step must
    /// not be applied in that case.
    pub async fn on_step_pre(&self, step: &Step) -> Result<Box<dyn SnapshotMutation>> {
        self.lock().seen.insert(step.urn().clone(), step.clone());

        if self.is_reportable(step) {
            self.emitter.resource_pre(step, false);

            if let Some(warning) = init_error_warning(step) {
                self.emitter.diag_warning(warning, Some(step.urn().clone()));
            }
        }

        debug!(urn = %step.urn(), op = %step.op(), "beginning snapshot mutation");
        self.snapshot.begin_mutation(step).await
    }

    /// Classifies the outcome, reports it, counts the step and commits the
    /// mutation.
    ///
    /// Returns immediately, leaving the mutation open, if the update has been
    /// terminated.
    ///
    /// # Errors
    ///
    /// Returns an error if the mutation cannot be committed. The step is not
    /// counted in that case.
    ///
    /// # Panics
    ///
    /// Panics if the step was never passed to [`Self::on_step_pre`].
    pub async fn on_step_post(
        &self,
        mutation: Box<dyn SnapshotMutation>,
        step: &Step,
        outcome: &ApplyOutcome,
    ) -> Result<()> {
        self.assert_seen(step);

        if self.cancel.is_terminated() {
            debug!(urn = %step.urn(), "update terminated, leaving mutation open");
            return Ok(());
        }

        let report = self.is_reportable(step);
        let mut count = false;

        if let Some(error) = &outcome.error {
            if outcome.status == ResourceStatus::Unknown {
                self.mark_corrupt(step);
            }

            warn!(urn = %step.urn(), op = %step.op(), status = %outcome.status, "step failed: {error}");
            let urn = report.then(|| step.urn().clone());
            self.emitter.diag_error(format!("Step apply failed: {error}"), urn);
            if report {
                let steps = self.lock().steps;
                self.emitter.resource_operation_failed(step, outcome.status, steps);
            }
        } else {
            if outcome.status == ResourceStatus::Unknown
                && self.unknown_status_policy == UnknownStatusPolicy::AlwaysCorrupt
            {
                self.mark_corrupt(step);
            }

            if report {
                count = step.logical();
                if step.res().custom {
                    self.emitter.resource_outputs(step, false);
                }
            }
        }

        let keep = outcome.error.is_none() || outcome.status == ResourceStatus::PartialFailure;
        mutation.end(step, keep).await?;

        if count {
            let mut state = self.lock();
            state.steps += 1;
            state.ops.increment(step.op());
        }

        Ok(())
    }

    /// Reports late outputs for a resource and persists them.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot record the outputs.
    ///
    /// # Panics
    ///
    /// Panics if no step for the resource was started.
    pub async fn on_resource_outputs(&self, step: &Step) -> Result<()> {
        self.assert_seen(step);

        if self.is_reportable(step) {
            self.emitter.resource_outputs(step, false);
        }

        self.snapshot.register_resource_outputs(step).await
    }

    /// Reports a step that was not applied because a resource it depends on
    /// did not make it.
    pub fn on_step_skipped(&self, step: &Step, blocked_by: &Urn) {
        debug!(urn = %step.urn(), blocked_by = %blocked_by, "skipping step");
        if self.is_reportable(step) {
            self.emitter.diag_infoerr(
                format!("Skipped {} because {blocked_by} was not updated", step.op()),
                Some(step.urn().clone()),
            );
        }
    }

    fn mark_corrupt(&self, step: &Step) {
        if !self.maybe_corrupt.swap(true, Ordering::SeqCst) {
            warn!(urn = %step.urn(), "snapshot may no longer match real infrastructure");
        }
    }

    /// Returns true if a step ended in an indeterminate state.
    #[must_use]
    pub fn maybe_corrupt(&self) -> bool {
        self.maybe_corrupt.load(Ordering::SeqCst)
    }

    /// Returns the number of logical steps completed.
    #[must_use]
    pub fn steps(&self) -> usize {
        self.lock().steps
    }

    /// Returns the counted steps by kind.
    #[must_use]
    pub fn changes(&self) -> ResourceChanges {
        self.lock().ops.clone()
    }
}

impl std::fmt::Debug for UpdateActions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateActions")
            .field("report_default_provider_steps", &self.report_default_provider_steps)
            .field("unknown_status_policy", &self.unknown_status_policy)
            .field("maybe_corrupt", &self.maybe_corrupt)
            .finish_non_exhaustive()
    }
}

/// Builds the warning shown when a resource that failed to initialize is
/// carried forward unchanged.
fn init_error_warning(step: &Step) -> Option<String> {
    if step.op() != StepOp::Same {
        return None;
    }
    let old = step.old()?;
    if !old.has_init_errors() {
        return None;
    }

    let mut warning = String::from(
        "This resource failed to initialize in a previous update. \
         It is recommended to update it to fix these issues:\n",
    );
    for (index, error) in old.init_errors.iter().enumerate() {
        warning.push_str(&format!("  - Problem #{}: {error}\n", index + 1));
    }
    Some(warning)
}

impl PluginActions {
    /// Creates plugin callbacks writing to the given snapshot.
    #[must_use]
    pub fn new(snapshot: Arc<dyn SnapshotManager>) -> Self {
        Self { snapshot }
    }

    /// Records a loaded plugin in the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot record the plugin.
    pub async fn on_plugin_load(&self, plugin: &PluginInfo) -> Result<()> {
        debug!(plugin = %plugin, "recording loaded plugin");
        self.snapshot.record_plugin(plugin).await
    }
}

impl std::fmt::Debug for PluginActions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginActions").finish_non_exhaustive()
    }
}
