//! Plan walker.
//!
//! Pulls events from a [`Source`] and runs each step through the
//! [`UpdateActions`] callbacks, either one at a time or with up to
//! `parallel` steps in flight.
//!
//! In parallel mode a step waits for every resource it depends on, and for
//! the previous step on its own resource, before it takes a slot. A step
//! whose prerequisite failed or was skipped is skipped in turn.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::deploy::{Source, SourceEvent, Step, StepApplier};
use crate::error::{EngineError, Result};
use crate::resource::Urn;

use super::actions::UpdateActions;
use super::cancel::Cancellation;

/// What happened to one source event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    /// Ran to completion and the provider reported success.
    Applied,
    /// Ran, but the provider reported an error or bookkeeping failed.
    Failed,
    /// Never ran.
    Skipped,
}

impl Disposition {
    const fn blocks_dependents(self) -> bool {
        !matches!(self, Self::Applied)
    }
}

/// Totals for one walk.
///
/// Only steps are counted; late output registrations are not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkSummary {
    /// Steps that ran and succeeded.
    pub applied: usize,
    /// Resources whose step failed.
    pub failed: Vec<Urn>,
    /// Resources whose step was not run.
    pub skipped: Vec<Urn>,
    /// Whether dispatch stopped because of a cancel.
    pub canceled: bool,
}

/// Result of a walk: the summary always, plus the error that stopped it.
#[derive(Debug)]
pub struct WalkOutcome {
    /// What the walk did.
    pub summary: WalkSummary,
    /// The hard failure that ended the walk early, if any.
    pub error: Option<EngineError>,
}

/// Drives the steps of one update.
pub struct PlanWalker {
    actions: Arc<UpdateActions>,
    applier: Arc<dyn StepApplier>,
    cancel: Cancellation,
    parallel: usize,
}

/// Outcome of one dispatched event in parallel mode.
struct TaskReport {
    urn: Urn,
    disposition: Disposition,
    error: Option<EngineError>,
    /// False for output registrations, which are not steps.
    counted: bool,
}

impl WalkSummary {
    fn record(&mut self, urn: Urn, disposition: Disposition) {
        match disposition {
            Disposition::Applied => self.applied += 1,
            Disposition::Failed => self.failed.push(urn),
            Disposition::Skipped => self.skipped.push(urn),
        }
    }
}

impl PlanWalker {
    /// Creates a walker. A `parallel` of 0 or 1 walks serially.
    #[must_use]
    pub fn new(
        actions: Arc<UpdateActions>,
        applier: Arc<dyn StepApplier>,
        cancel: Cancellation,
        parallel: usize,
    ) -> Self {
        Self {
            actions,
            applier,
            cancel,
            parallel,
        }
    }

    /// Walks the source to exhaustion, cancellation, or the first hard error.
    pub async fn walk(&self, source: &mut dyn Source) -> WalkOutcome {
        let outcome = if self.parallel <= 1 {
            self.walk_serial(source).await
        } else {
            self.walk_parallel(source).await
        };

        info!(
            applied = outcome.summary.applied,
            failed = outcome.summary.failed.len(),
            skipped = outcome.summary.skipped.len(),
            canceled = outcome.summary.canceled,
            "walk finished"
        );
        outcome
    }

    async fn walk_serial(&self, source: &mut dyn Source) -> WalkOutcome {
        let mut summary = WalkSummary::default();
        let mut last: HashMap<Urn, Disposition> = HashMap::new();

        loop {
            if self.cancel.is_canceled() {
                summary.canceled = true;
                break;
            }

            let event = match source.next().await {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(err) => {
                    warn!("step source failed: {err}");
                    return WalkOutcome {
                        summary,
                        error: Some(err),
                    };
                }
            };

            let step = event.step();
            let counted = is_step(&event);
            if let Some(blocker) = blocked_by(step, |urn| last.get(urn).copied()) {
                self.actions.on_step_skipped(step, &blocker);
                last.insert(step.urn().clone(), Disposition::Skipped);
                if counted {
                    summary.record(step.urn().clone(), Disposition::Skipped);
                }
                continue;
            }

            let urn = step.urn().clone();
            match run_event(&self.actions, self.applier.as_ref(), &event).await {
                Ok(disposition) => {
                    last.insert(urn.clone(), disposition);
                    if counted {
                        summary.record(urn, disposition);
                    }
                }
                Err(err) => {
                    warn!(urn = %urn, "stopping walk: {err}");
                    if counted {
                        summary.record(urn, Disposition::Failed);
                    }
                    return WalkOutcome {
                        summary,
                        error: Some(err),
                    };
                }
            }
        }

        WalkOutcome {
            summary,
            error: None,
        }
    }

    async fn walk_parallel(&self, source: &mut dyn Source) -> WalkOutcome {
        let semaphore = Arc::new(Semaphore::new(self.parallel));
        let halted = Arc::new(AtomicBool::new(false));
        let mut done: HashMap<Urn, watch::Receiver<Option<Disposition>>> = HashMap::new();
        let mut tasks: JoinSet<TaskReport> = JoinSet::new();
        let mut summary = WalkSummary::default();
        let mut error = None;

        debug!(parallel = self.parallel, "walking in parallel");

        loop {
            if halted.load(Ordering::SeqCst) {
                break;
            }
            if self.cancel.is_canceled() {
                summary.canceled = true;
                break;
            }

            let event = match source.next().await {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(err) => {
                    // Steps already received still run; only dispatch stops.
                    warn!("step source failed: {err}");
                    error = Some(err);
                    break;
                }
            };

            let step = event.step();
            let counted = is_step(&event);
            let mut waits = Vec::new();
            let mut waiting_on = HashSet::new();
            for urn in step.dependencies().iter().chain(std::iter::once(step.urn())) {
                if !waiting_on.insert(urn.clone()) {
                    continue;
                }
                if let Some(receiver) = done.get(urn) {
                    waits.push((urn.clone(), receiver.clone()));
                }
            }

            let (finished, receiver) = watch::channel(None);
            done.insert(step.urn().clone(), receiver);

            let actions = Arc::clone(&self.actions);
            let applier = Arc::clone(&self.applier);
            let semaphore = Arc::clone(&semaphore);
            let halted = Arc::clone(&halted);
            let cancel = self.cancel.clone();

            tasks.spawn(async move {
                let urn = event.step().urn().clone();
                let report = |disposition, error| TaskReport {
                    urn: urn.clone(),
                    disposition,
                    error,
                    counted,
                };

                for (dependency, receiver) in waits {
                    if wait_for(receiver).await.blocks_dependents() {
                        actions.on_step_skipped(event.step(), &dependency);
                        finished.send_replace(Some(Disposition::Skipped));
                        return report(Disposition::Skipped, None);
                    }
                }

                let Ok(_permit) = semaphore.acquire_owned().await else {
                    finished.send_replace(Some(Disposition::Skipped));
                    return report(Disposition::Skipped, None);
                };

                if halted.load(Ordering::SeqCst) || cancel.is_canceled() {
                    finished.send_replace(Some(Disposition::Skipped));
                    return report(Disposition::Skipped, None);
                }

                match run_event(&actions, applier.as_ref(), &event).await {
                    Ok(disposition) => {
                        finished.send_replace(Some(disposition));
                        report(disposition, None)
                    }
                    Err(err) => {
                        warn!(urn = %urn, "stopping walk: {err}");
                        halted.store(true, Ordering::SeqCst);
                        finished.send_replace(Some(Disposition::Failed));
                        report(Disposition::Failed, Some(err))
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => {
                    if report.counted {
                        summary.record(report.urn, report.disposition);
                    }
                    if error.is_none() {
                        error = report.error;
                    }
                }
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Err(err) => {
                    if error.is_none() {
                        error = Some(EngineError::internal(format!("step task failed: {err}")));
                    }
                }
            }
        }

        WalkOutcome { summary, error }
    }
}

impl std::fmt::Debug for PlanWalker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanWalker")
            .field("parallel", &self.parallel)
            .finish_non_exhaustive()
    }
}

const fn is_step(event: &SourceEvent) -> bool {
    matches!(event, SourceEvent::Step(_))
}

/// Returns the first prerequisite of `step` that did not succeed.
fn blocked_by(step: &Step, last: impl Fn(&Urn) -> Option<Disposition>) -> Option<Urn> {
    step.dependencies()
        .iter()
        .chain(std::iter::once(step.urn()))
        .find(|urn| last(urn).is_some_and(Disposition::blocks_dependents))
        .cloned()
}

/// Waits until the watched event reports how it ended.
///
/// A sender dropped without reporting means its task died.
async fn wait_for(mut receiver: watch::Receiver<Option<Disposition>>) -> Disposition {
    loop {
        if let Some(disposition) = *receiver.borrow_and_update() {
            return disposition;
        }
        if receiver.changed().await.is_err() {
            return receiver.borrow().unwrap_or(Disposition::Failed);
        }
    }
}

/// Runs one source event through the callbacks.
async fn run_event(
    actions: &UpdateActions,
    applier: &dyn StepApplier,
    event: &SourceEvent,
) -> Result<Disposition> {
    match event {
        SourceEvent::Step(step) => {
            let mutation = actions.on_step_pre(step).await?;
            let outcome = applier.apply(step).await;
            let failed = outcome.is_failure();
            actions.on_step_post(mutation, step, &outcome).await?;
            Ok(if failed {
                Disposition::Failed
            } else {
                Disposition::Applied
            })
        }
        SourceEvent::RegisterOutputs(step) => {
            actions.on_resource_outputs(step).await?;
            Ok(Disposition::Applied)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::{ApplyOutcome, FixedSource, ScriptedApplier, StepOp};
    use crate::engine::cancel::CancellationSource;
    use crate::engine::events::{event_channel, EventEmitter};
    use crate::engine::options::UpdateOptions;
    use crate::error::PlanError;
    use crate::resource::{ResourceState, ResourceStatus};
    use crate::snapshot::{MemorySnapshotStore, SnapshotManager, SnapshotMutation};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn urn(name: &str) -> Urn {
        Urn::new("dev", "web", "aws:s3:Bucket", name)
    }

    fn create(name: &str) -> Step {
        Step::create(ResourceState::new(urn(name)))
    }

    fn walker_with(
        store: Arc<dyn SnapshotManager>,
        applier: Arc<dyn StepApplier>,
        cancel: Cancellation,
        parallel: usize,
    ) -> (PlanWalker, Arc<UpdateActions>) {
        let (tx, _rx) = event_channel();
        let actions = Arc::new(UpdateActions::new(
            store,
            EventEmitter::new(tx),
            cancel.clone(),
            &UpdateOptions::new(),
        ));
        let walker = PlanWalker::new(Arc::clone(&actions), applier, cancel, parallel);
        (walker, actions)
    }

    struct FailingSource {
        steps: Vec<Step>,
    }

    #[async_trait]
    impl Source for FailingSource {
        async fn next(&mut self) -> Result<Option<SourceEvent>> {
            match self.steps.pop() {
                Some(step) => Ok(Some(SourceEvent::Step(step))),
                None => Err(PlanError::source_failed("program crashed").into()),
            }
        }
    }

    /// Applier that records the peak number of concurrent calls.
    #[derive(Default)]
    struct SlowApplier {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl StepApplier for SlowApplier {
        async fn apply(&self, _step: &Step) -> ApplyOutcome {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            ApplyOutcome::ok()
        }
    }

    /// Snapshot store that refuses to end mutations for one resource.
    struct BrokenEnd {
        inner: MemorySnapshotStore,
        broken: Urn,
    }

    struct BrokenMutation {
        inner: Box<dyn SnapshotMutation>,
        broken: bool,
    }

    #[async_trait]
    impl SnapshotManager for BrokenEnd {
        async fn begin_mutation(&self, step: &Step) -> Result<Box<dyn SnapshotMutation>> {
            let inner = self.inner.begin_mutation(step).await?;
            Ok(Box::new(BrokenMutation {
                inner,
                broken: step.urn() == &self.broken,
            }))
        }

        async fn record_plugin(&self, plugin: &crate::deploy::PluginInfo) -> Result<()> {
            self.inner.record_plugin(plugin).await
        }

        async fn register_resource_outputs(&self, step: &Step) -> Result<()> {
            self.inner.register_resource_outputs(step).await
        }
    }

    #[async_trait]
    impl SnapshotMutation for BrokenMutation {
        async fn end(self: Box<Self>, step: &Step, keep: bool) -> Result<()> {
            if self.broken {
                return Err(crate::error::SnapshotError::write("disk full").into());
            }
            self.inner.end(step, keep).await
        }
    }

    #[tokio::test]
    async fn test_serial_walk_commits_in_order() {
        let store = MemorySnapshotStore::new("dev");
        let (walker, actions) = walker_with(
            Arc::new(store.clone()),
            Arc::new(ScriptedApplier::new()),
            Cancellation::none(),
            1,
        );
        let mut source = FixedSource::from_steps(vec![create("a"), create("b"), create("c")]);

        let outcome = walker.walk(&mut source).await;

        assert!(outcome.error.is_none());
        assert_eq!(outcome.summary.applied, 3);
        let order: Vec<_> = store.commits().into_iter().map(|(u, _, _)| u).collect();
        assert_eq!(order, vec![urn("a"), urn("b"), urn("c")]);
        assert_eq!(actions.changes().get(StepOp::Create), 3);
    }

    #[tokio::test]
    async fn test_failed_step_does_not_stop_siblings() {
        let store = MemorySnapshotStore::new("dev");
        let applier = ScriptedApplier::new().with_outcome(
            urn("a"),
            StepOp::Create,
            ApplyOutcome::failed(ResourceStatus::Ok, "quota exceeded"),
        );
        let (walker, actions) =
            walker_with(Arc::new(store.clone()), Arc::new(applier), Cancellation::none(), 1);
        let dependent = create("b").with_dependencies(vec![urn("a")]);
        let mut source = FixedSource::from_steps(vec![create("a"), dependent, create("c")]);

        let outcome = walker.walk(&mut source).await;

        assert!(outcome.error.is_none());
        assert_eq!(outcome.summary.failed, vec![urn("a")]);
        assert_eq!(outcome.summary.skipped, vec![urn("b")]);
        assert_eq!(outcome.summary.applied, 1);
        assert_eq!(actions.changes().get(StepOp::Create), 1);
        assert_eq!(store.begin_count(), 2);
    }

    #[tokio::test]
    async fn test_source_error_returns_partial_changes() {
        let store = MemorySnapshotStore::new("dev");
        let (walker, actions) = walker_with(
            Arc::new(store.clone()),
            Arc::new(ScriptedApplier::new()),
            Cancellation::none(),
            1,
        );
        let mut source = FailingSource {
            steps: vec![create("a")],
        };

        let outcome = walker.walk(&mut source).await;

        assert!(matches!(outcome.error, Some(EngineError::Plan(PlanError::Source { .. }))));
        assert_eq!(actions.changes().get(StepOp::Create), 1);
    }

    #[tokio::test]
    async fn test_end_failure_is_fatal_and_uncounted() {
        let store = MemorySnapshotStore::new("dev");
        let broken = BrokenEnd {
            inner: store.clone(),
            broken: urn("b"),
        };
        let (walker, actions) = walker_with(
            Arc::new(broken),
            Arc::new(ScriptedApplier::new()),
            Cancellation::none(),
            1,
        );
        let mut source = FixedSource::from_steps(vec![create("a"), create("b"), create("c")]);

        let outcome = walker.walk(&mut source).await;

        assert!(matches!(outcome.error, Some(EngineError::Snapshot(_))));
        assert_eq!(actions.changes().get(StepOp::Create), 1);
        assert_eq!(store.begin_count(), 2);
        assert_eq!(source.remaining(), 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_dispatch() {
        let store = MemorySnapshotStore::new("dev");
        let cancel = CancellationSource::new();
        cancel.cancel();
        let (walker, _actions) = walker_with(
            Arc::new(store.clone()),
            Arc::new(ScriptedApplier::new()),
            cancel.token(),
            1,
        );
        let mut source = FixedSource::from_steps(vec![create("a")]);

        let outcome = walker.walk(&mut source).await;

        assert!(outcome.error.is_none());
        assert!(outcome.summary.canceled);
        assert_eq!(store.begin_count(), 0);
    }

    #[tokio::test]
    async fn test_parallel_walk_respects_bound() {
        let store = MemorySnapshotStore::new("dev");
        let applier = Arc::new(SlowApplier::default());
        let (walker, actions) = walker_with(
            Arc::new(store.clone()),
            applier.clone(),
            Cancellation::none(),
            2,
        );
        let steps = (0..6).map(|i| create(&format!("r{i}"))).collect();
        let mut source = FixedSource::from_steps(steps);

        let outcome = walker.walk(&mut source).await;

        assert!(outcome.error.is_none());
        assert_eq!(outcome.summary.applied, 6);
        assert_eq!(actions.changes().get(StepOp::Create), 6);
        assert_eq!(store.commits().len(), 6);
        assert!(applier.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_parallel_dependencies_run_in_order() {
        let store = MemorySnapshotStore::new("dev");
        let (walker, _actions) = walker_with(
            Arc::new(store.clone()),
            Arc::new(SlowApplier::default()),
            Cancellation::none(),
            4,
        );
        let b = create("b").with_dependencies(vec![urn("a")]);
        let c = create("c").with_dependencies(vec![urn("b")]);
        let mut source = FixedSource::from_steps(vec![create("a"), b, c]);

        let outcome = walker.walk(&mut source).await;

        assert!(outcome.error.is_none());
        let order: Vec<_> = store.commits().into_iter().map(|(u, _, _)| u).collect();
        assert_eq!(order, vec![urn("a"), urn("b"), urn("c")]);
    }

    #[tokio::test]
    async fn test_parallel_skips_dependents_of_failures() {
        let store = MemorySnapshotStore::new("dev");
        let applier = ScriptedApplier::new().with_outcome(
            urn("a"),
            StepOp::Create,
            ApplyOutcome::failed(ResourceStatus::Unknown, "timeout"),
        );
        let (walker, actions) =
            walker_with(Arc::new(store.clone()), Arc::new(applier), Cancellation::none(), 3);
        let b = create("b").with_dependencies(vec![urn("a")]);
        let mut source = FixedSource::from_steps(vec![create("a"), b, create("c")]);

        let outcome = walker.walk(&mut source).await;

        assert!(outcome.error.is_none());
        assert_eq!(outcome.summary.failed, vec![urn("a")]);
        assert_eq!(outcome.summary.skipped, vec![urn("b")]);
        assert!(actions.maybe_corrupt());
        assert_eq!(actions.changes().get(StepOp::Create), 1);
    }

    fn events_with_late_outputs() -> Vec<SourceEvent> {
        let late = Step::create(
            ResourceState::new(urn("a")).with_output("arn", serde_json::json!("arn:aws:s3:::a")),
        );
        vec![
            SourceEvent::Step(create("a")),
            SourceEvent::RegisterOutputs(late),
            SourceEvent::Step(create("c")),
        ]
    }

    #[tokio::test]
    async fn test_output_registrations_are_not_counted_in_either_mode() {
        let mut summaries = Vec::new();
        for parallel in [1, 3] {
            let applier = ScriptedApplier::new().with_outcome(
                urn("a"),
                StepOp::Create,
                ApplyOutcome::failed(ResourceStatus::Ok, "quota exceeded"),
            );
            let (walker, _actions) = walker_with(
                Arc::new(MemorySnapshotStore::new("dev")),
                Arc::new(applier),
                Cancellation::none(),
                parallel,
            );
            let mut source = FixedSource::new(events_with_late_outputs());

            let outcome = walker.walk(&mut source).await;
            assert!(outcome.error.is_none());
            summaries.push(outcome.summary);
        }

        assert_eq!(summaries[0], summaries[1]);
        assert_eq!(summaries[0].applied, 1);
        assert_eq!(summaries[0].failed, vec![urn("a")]);
        assert!(summaries[0].skipped.is_empty());
    }

    #[tokio::test]
    async fn test_parallel_source_error_keeps_received_steps() {
        let store = MemorySnapshotStore::new("dev");
        let (walker, actions) = walker_with(
            Arc::new(store.clone()),
            Arc::new(SlowApplier::default()),
            Cancellation::none(),
            2,
        );
        let mut source = FailingSource {
            steps: vec![create("b"), create("a")],
        };

        let outcome = walker.walk(&mut source).await;

        assert!(matches!(outcome.error, Some(EngineError::Plan(PlanError::Source { .. }))));
        assert_eq!(outcome.summary.applied, 2);
        assert_eq!(actions.changes().get(StepOp::Create), 2);
        assert_eq!(store.commits().len(), 2);
    }

    #[tokio::test]
    async fn test_parallel_end_failure_halts_dispatch() {
        let store = MemorySnapshotStore::new("dev");
        let broken = BrokenEnd {
            inner: store.clone(),
            broken: urn("b"),
        };
        let (walker, actions) = walker_with(
            Arc::new(broken),
            Arc::new(SlowApplier::default()),
            Cancellation::none(),
            2,
        );
        let steps = ["a", "b", "c", "d", "e"].into_iter().map(create).collect();
        let mut source = FixedSource::from_steps(steps);

        let outcome = walker.walk(&mut source).await;

        assert!(matches!(outcome.error, Some(EngineError::Snapshot(_))));
        assert_eq!(outcome.summary.failed, vec![urn("b")]);
        assert!(outcome.summary.skipped.contains(&urn("d")));
        assert!(outcome.summary.skipped.contains(&urn("e")));

        // The step running alongside the failure still finished and was recorded.
        let committed: Vec<_> = store.commits().into_iter().map(|(u, _, _)| u).collect();
        assert!(committed.contains(&urn("a")));
        assert!(!committed.contains(&urn("b")));
        assert_eq!(actions.changes().get(StepOp::Create), outcome.summary.applied);
        assert!(store.begin_count() <= 3);
    }
}
