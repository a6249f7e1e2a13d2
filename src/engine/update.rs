//! Update orchestration.
//!
//! [`update`] is the single entry point: it resolves plugins, builds the step
//! source, then either previews the plan or walks it for real, and always
//! closes the event stream with a `cancel` event.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::deploy::{PluginKind, Source, SourceEvent, SourceRequest};
use crate::error::{EngineError, Result, UpdateError};

use super::actions::{PluginActions, UpdateActions};
use super::changes::ResourceChanges;
use super::context::{Context, UpdateInfo};
use super::events::{EventEmitter, EventSender};
use super::options::UpdateOptions;
use super::walk::PlanWalker;

/// Lifecycle of one update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdatePhase {
    Initializing,
    Planning,
    DryRunReporting,
    Applying,
    Summarizing,
    Terminated,
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initializing => "initializing",
            Self::Planning => "planning",
            Self::DryRunReporting => "dry-run-reporting",
            Self::Applying => "applying",
            Self::Summarizing => "summarizing",
            Self::Terminated => "terminated",
        };
        write!(f, "{s}")
    }
}

/// Tracks the update phase and sends the closing `cancel` event when dropped,
/// whichever way the update ends.
struct UpdateLifecycle {
    phase: UpdatePhase,
    events: EventSender,
}

impl UpdateLifecycle {
    fn start(events: EventSender) -> Self {
        debug!(phase = %UpdatePhase::Initializing, "update phase");
        Self {
            phase: UpdatePhase::Initializing,
            events,
        }
    }

    fn enter(&mut self, phase: UpdatePhase) {
        debug!(from = %self.phase, to = %phase, "update phase");
        self.phase = phase;
    }
}

impl Drop for UpdateLifecycle {
    fn drop(&mut self) {
        self.enter(UpdatePhase::Terminated);
        EventEmitter::new(self.events.clone()).cancel();
    }
}

/// Runs an update.
///
/// With `dry_run` the plan is computed and reported but nothing is applied and
/// no checkpoint is written. Otherwise every step is applied and checkpointed.
///
/// # Errors
///
/// Returns an [`UpdateError`] carrying the changes applied before the failure
/// when the walk had started, and no changes when the update failed earlier.
pub async fn update(
    info: &UpdateInfo,
    ctx: &Context,
    options: &UpdateOptions,
    dry_run: bool,
) -> std::result::Result<ResourceChanges, UpdateError> {
    info.validate().map_err(UpdateError::without_changes)?;

    let mut lifecycle = UpdateLifecycle::start(ctx.events.clone());
    let span = match &ctx.parent_span {
        Some(parent) => info_span!(parent: parent, "update", target = %info.target.name, dry_run),
        None => info_span!("update", target = %info.target.name, dry_run),
    };

    run_update(info, ctx, options, dry_run, &mut lifecycle)
        .instrument(span)
        .await
}

async fn run_update(
    info: &UpdateInfo,
    ctx: &Context,
    options: &UpdateOptions,
    dry_run: bool,
    lifecycle: &mut UpdateLifecycle,
) -> std::result::Result<ResourceChanges, UpdateError> {
    let emitter = EventEmitter::for_update(ctx.events.clone(), options);

    lifecycle.enter(UpdatePhase::Planning);
    let mut source = new_update_source(info, ctx, options, dry_run)
        .await
        .map_err(UpdateError::without_changes)?;

    if dry_run {
        lifecycle.enter(UpdatePhase::DryRunReporting);
        emitter.prelude(true, &info.target.config);
        let start = Instant::now();
        let (changes, error) = preview(source.as_mut(), &emitter, options).await;

        lifecycle.enter(UpdatePhase::Summarizing);
        emitter.update_summary(true, false, start.elapsed(), &changes);
        return match error {
            Some(error) => Err(UpdateError::with_changes(changes, error)),
            None => Ok(changes),
        };
    }

    lifecycle.enter(UpdatePhase::Applying);
    emitter.prelude(false, &info.target.config);

    let start = Instant::now();
    let actions = Arc::new(UpdateActions::new(
        Arc::clone(&ctx.snapshot_manager),
        emitter.clone(),
        ctx.cancel.clone(),
        options,
    ));
    let walker = PlanWalker::new(
        Arc::clone(&actions),
        Arc::clone(&ctx.applier),
        ctx.cancel.clone(),
        options.parallel,
    );
    let outcome = walker.walk(source.as_mut()).await;

    lifecycle.enter(UpdatePhase::Summarizing);
    let changes = actions.changes();
    let maybe_corrupt = actions.maybe_corrupt();
    emitter.update_summary(false, maybe_corrupt, start.elapsed(), &changes);
    info!(
        steps = actions.steps(),
        maybe_corrupt,
        has_changes = changes.has_changes(),
        "update finished"
    );

    match outcome.error {
        Some(error) => Err(UpdateError::with_changes(changes, error)),
        None => Ok(changes),
    }
}

/// Resolves the plugins the program needs and builds its step source.
///
/// Analyzer and language plugins are loaded up front. Resource plugins are
/// only recorded as versions for default providers. On a real run every
/// loaded plugin is recorded in the snapshot.
///
/// # Errors
///
/// Returns an error if plugin resolution or loading fails, or if the source
/// cannot be built.
pub async fn new_update_source(
    info: &UpdateInfo,
    ctx: &Context,
    options: &UpdateOptions,
    dry_run: bool,
) -> Result<Box<dyn Source>> {
    let program = info.program_info();

    let plugins = ctx.plugin_host.required_plugins(&program).await?;
    debug!(count = plugins.len(), "resolved required plugins");

    let loaded = ctx
        .plugin_host
        .ensure_plugins(&plugins, &[PluginKind::Analyzer, PluginKind::Language])
        .await?;

    if !dry_run {
        let plugin_actions = PluginActions::new(Arc::clone(&ctx.snapshot_manager));
        for plugin in &loaded {
            plugin_actions.on_plugin_load(plugin).await?;
        }
    }

    let default_provider_versions: BTreeMap<String, Option<String>> = plugins
        .iter()
        .filter(|p| p.kind == PluginKind::Resource)
        .map(|p| (p.name.clone(), p.version.clone()))
        .collect();

    ctx.source_factory
        .new_source(SourceRequest {
            program,
            target: info.target.name.clone(),
            default_provider_versions,
            analyzers: options.analyzers.clone(),
            dry_run,
        })
        .await
}

/// Consumes the whole source, reporting each step as planned and counting
/// logical ones. Nothing is applied.
async fn preview(
    source: &mut dyn Source,
    emitter: &EventEmitter,
    options: &UpdateOptions,
) -> (ResourceChanges, Option<EngineError>) {
    let mut changes = ResourceChanges::new();

    loop {
        match source.next().await {
            Ok(Some(SourceEvent::Step(step))) => {
                if options.report_default_provider_steps || !step.is_default_provider_step() {
                    emitter.resource_pre(&step, true);
                    if step.logical() {
                        changes.increment(step.op());
                    }
                }
            }
            Ok(Some(SourceEvent::RegisterOutputs(step))) => {
                if options.report_default_provider_steps || !step.is_default_provider_step() {
                    emitter.resource_outputs(&step, true);
                }
            }
            Ok(None) => return (changes, None),
            Err(err) => {
                warn!("step source failed during preview: {err}");
                return (changes, Some(err));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::{
        ApplyOutcome, FixedSource, MockStepApplier, PluginHost, PluginInfo, PrecomputedSourceFactory,
        ProgramInfo, ScriptedApplier, SourceFactory, StaticPluginHost, Step, StepApplier, StepOp,
    };
    use crate::engine::context::Target;
    use crate::engine::events::{drain_events, event_channel, Event, EventReceiver, Severity};
    use crate::error::PlanError;
    use crate::resource::{ResourceState, ResourceStatus, Urn};
    use crate::snapshot::{MemorySnapshotStore, Snapshot};
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn urn(name: &str) -> Urn {
        Urn::new("dev", "web", "aws:s3:Bucket", name)
    }

    fn bucket(name: &str) -> ResourceState {
        ResourceState::new(urn(name))
    }

    fn info() -> UpdateInfo {
        UpdateInfo::new(
            "web",
            "/srv/web",
            Target::new("dev").with_config("aws:region", "eu-west-1"),
        )
    }

    fn context(
        store: &MemorySnapshotStore,
        host: Arc<dyn PluginHost>,
        factory: Arc<dyn SourceFactory>,
        applier: Arc<dyn StepApplier>,
    ) -> (Context, EventReceiver) {
        let (tx, rx) = event_channel();
        let ctx = Context::new(Arc::new(store.clone()), tx, host, factory, applier);
        (ctx, rx)
    }

    fn warnings(events: &[Event]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Diag(d) if d.severity == Severity::Warning => Some(d.message.as_str()),
                _ => None,
            })
            .collect()
    }

    struct BrokenHost;

    #[async_trait]
    impl PluginHost for BrokenHost {
        async fn required_plugins(&self, _program: &ProgramInfo) -> Result<Vec<PluginInfo>> {
            Err(PlanError::PluginResolution {
                message: String::from("no language host for program"),
            }
            .into())
        }

        async fn ensure_plugins(
            &self,
            _plugins: &[PluginInfo],
            _kinds: &[PluginKind],
        ) -> Result<Vec<PluginInfo>> {
            Ok(Vec::new())
        }
    }

    struct TruncatedSource {
        steps: Vec<Step>,
    }

    #[async_trait]
    impl Source for TruncatedSource {
        async fn next(&mut self) -> Result<Option<SourceEvent>> {
            if self.steps.is_empty() {
                return Err(PlanError::source_failed("program exited with code 1").into());
            }
            Ok(Some(SourceEvent::Step(self.steps.remove(0))))
        }
    }

    struct TruncatedFactory {
        steps: Mutex<Vec<Step>>,
    }

    #[async_trait]
    impl SourceFactory for TruncatedFactory {
        async fn new_source(&self, _request: SourceRequest) -> Result<Box<dyn Source>> {
            let steps = std::mem::take(&mut *self.steps.lock().expect("lock"));
            Ok(Box::new(TruncatedSource { steps }))
        }
    }

    #[derive(Default)]
    struct RecordingFactory {
        request: Mutex<Option<SourceRequest>>,
    }

    #[async_trait]
    impl SourceFactory for RecordingFactory {
        async fn new_source(&self, request: SourceRequest) -> Result<Box<dyn Source>> {
            *self.request.lock().expect("lock") = Some(request);
            Ok(Box::new(FixedSource::default()))
        }
    }

    #[tokio::test]
    async fn test_serial_create_update_same() {
        let store = MemorySnapshotStore::new("dev");
        let old_b = bucket("b").with_init_errors(vec![
            String::from("health check failed"),
            String::from("missing tag"),
        ]);
        let steps = vec![
            Step::create(bucket("a")),
            Step::update(old_b, bucket("b").with_input("acl", serde_json::json!("private")), vec![
                String::from("acl"),
            ]),
            Step::same(bucket("c"), bucket("c")),
        ];
        let (ctx, mut rx) = context(
            &store,
            Arc::new(StaticPluginHost::default()),
            Arc::new(PrecomputedSourceFactory::from_steps(steps)),
            Arc::new(ScriptedApplier::new()),
        );

        let changes = update(&info(), &ctx, &UpdateOptions::new().with_parallel(1), false)
            .await
            .expect("update");

        assert_eq!(changes.get(StepOp::Create), 1);
        assert_eq!(changes.get(StepOp::Update), 1);
        assert_eq!(changes.get(StepOp::Same), 1);
        assert!(changes.has_changes());
        assert_eq!(
            store.commits(),
            vec![
                (urn("a"), StepOp::Create, true),
                (urn("b"), StepOp::Update, true),
                (urn("c"), StepOp::Same, true),
            ]
        );

        let events = drain_events(&mut rx);
        assert!(warnings(&events).is_empty());
        assert!(matches!(events.first(), Some(Event::Prelude(p)) if !p.is_preview));
        assert!(events.iter().any(|e| matches!(
            e,
            Event::UpdateSummary(s) if !s.maybe_corrupt && s.resource_changes == changes
        )));
        assert_eq!(events.last(), Some(&Event::Cancel));
    }

    #[tokio::test]
    async fn test_same_with_init_errors_lists_each_problem() {
        let store = MemorySnapshotStore::new("dev");
        let old = bucket("c").with_init_errors(vec![String::from("a"), String::from("b")]);
        let (ctx, mut rx) = context(
            &store,
            Arc::new(StaticPluginHost::default()),
            Arc::new(PrecomputedSourceFactory::from_steps(vec![Step::same(old.clone(), old)])),
            Arc::new(ScriptedApplier::new()),
        );

        let changes = update(&info(), &ctx, &UpdateOptions::new(), false)
            .await
            .expect("update");

        assert!(!changes.has_changes());
        let events = drain_events(&mut rx);
        let warnings = warnings(&events);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].matches("Problem #").count(), 2);
    }

    #[tokio::test]
    async fn test_delete_with_unknown_failure() {
        let mut seeded = Snapshot::new("dev");
        let old = bucket("d").with_id("bucket-d");
        seeded.end(&Step::create(old.clone()), true);
        let store = MemorySnapshotStore::with_snapshot(seeded);

        let applier = ScriptedApplier::new().with_outcome(
            urn("d"),
            StepOp::Delete,
            ApplyOutcome::failed(ResourceStatus::Unknown, "connection reset"),
        );
        let (ctx, mut rx) = context(
            &store,
            Arc::new(StaticPluginHost::default()),
            Arc::new(PrecomputedSourceFactory::from_steps(vec![Step::delete(old)])),
            Arc::new(applier),
        );

        let changes = update(&info(), &ctx, &UpdateOptions::new(), false)
            .await
            .expect("per-step failures do not fail the update");

        assert!(!changes.has_changes());
        assert_eq!(store.commits(), vec![(urn("d"), StepOp::Delete, false)]);
        assert!(store.snapshot().get(&urn("d")).is_some());

        let events = drain_events(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            Event::ResourceOperationFailed(p) if p.metadata.urn == urn("d")
        )));
        assert!(events.iter().any(|e| matches!(e, Event::UpdateSummary(s) if s.maybe_corrupt)));
    }

    #[tokio::test]
    async fn test_corruption_flag_is_sticky() {
        let store = MemorySnapshotStore::new("dev");
        let applier = ScriptedApplier::new().with_outcome(
            urn("a"),
            StepOp::Create,
            ApplyOutcome::failed(ResourceStatus::Unknown, "timeout"),
        );
        let steps = vec![
            Step::create(bucket("a")),
            Step::create(bucket("b")),
            Step::create(bucket("c")),
        ];
        let (ctx, mut rx) = context(
            &store,
            Arc::new(StaticPluginHost::default()),
            Arc::new(PrecomputedSourceFactory::from_steps(steps)),
            Arc::new(applier),
        );

        let changes = update(&info(), &ctx, &UpdateOptions::new(), false)
            .await
            .expect("update");

        assert_eq!(changes.get(StepOp::Create), 2);
        let events = drain_events(&mut rx);
        assert!(events.iter().any(|e| matches!(e, Event::UpdateSummary(s) if s.maybe_corrupt)));
    }

    #[tokio::test]
    async fn test_dry_run_never_applies_or_checkpoints() {
        let store = MemorySnapshotStore::new("dev");
        let mut applier = MockStepApplier::new();
        applier.expect_apply().never();

        let host = StaticPluginHost::new(vec![PluginInfo::new("nodejs", PluginKind::Language, None)]);
        let steps = vec![
            Step::create(bucket("a")),
            Step::update(bucket("b"), bucket("b"), vec![String::from("tags")]),
        ];
        let (ctx, mut rx) = context(
            &store,
            Arc::new(host),
            Arc::new(PrecomputedSourceFactory::from_steps(steps)),
            Arc::new(applier),
        );

        let changes = update(&info(), &ctx, &UpdateOptions::new(), true)
            .await
            .expect("preview");

        assert_eq!(changes.get(StepOp::Create), 1);
        assert_eq!(changes.get(StepOp::Update), 1);
        assert_eq!(store.begin_count(), 0);
        assert!(store.snapshot().plugins.is_empty());

        let events = drain_events(&mut rx);
        assert!(matches!(events.first(), Some(Event::Prelude(p)) if p.is_preview));
        assert!(events.iter().all(|e| match e {
            Event::ResourcePre(p) => p.planning,
            Event::ResourceOutputs(_) | Event::ResourceOperationFailed(_) => false,
            _ => true,
        }));
        assert!(events.iter().any(|e| matches!(e, Event::UpdateSummary(s) if s.is_preview)));
        assert_eq!(events.last(), Some(&Event::Cancel));
    }

    #[tokio::test]
    async fn test_planning_failure_returns_no_changes() {
        let store = MemorySnapshotStore::new("dev");
        let (ctx, mut rx) = context(
            &store,
            Arc::new(BrokenHost),
            Arc::new(RecordingFactory::default()),
            Arc::new(ScriptedApplier::new()),
        );

        let err = update(&info(), &ctx, &UpdateOptions::new(), false)
            .await
            .expect_err("planning should fail");

        assert!(err.changes.is_none());
        assert!(matches!(err.error, EngineError::Plan(PlanError::PluginResolution { .. })));
        assert_eq!(drain_events(&mut rx), vec![Event::Cancel]);
    }

    #[tokio::test]
    async fn test_precondition_failure_has_no_side_effects() {
        let store = MemorySnapshotStore::new("dev");
        let (ctx, mut rx) = context(
            &store,
            Arc::new(StaticPluginHost::default()),
            Arc::new(RecordingFactory::default()),
            Arc::new(ScriptedApplier::new()),
        );
        let no_target = UpdateInfo::new("web", "/srv/web", Target::new(""));

        let err = update(&no_target, &ctx, &UpdateOptions::new(), false)
            .await
            .expect_err("precondition");

        assert!(matches!(err.error, EngineError::Precondition(_)));
        assert!(drain_events(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_walk_failure_keeps_partial_changes() {
        let store = MemorySnapshotStore::new("dev");
        let factory = TruncatedFactory {
            steps: Mutex::new(vec![Step::create(bucket("a")), Step::delete(bucket("b"))]),
        };
        let (ctx, mut rx) = context(
            &store,
            Arc::new(StaticPluginHost::default()),
            Arc::new(factory),
            Arc::new(ScriptedApplier::new()),
        );

        let err = update(&info(), &ctx, &UpdateOptions::new(), false)
            .await
            .expect_err("source fails after two steps");

        let changes = err.changes.expect("walk had started");
        assert_eq!(changes.get(StepOp::Create), 1);
        assert_eq!(changes.get(StepOp::Delete), 1);
        assert!(matches!(err.error, EngineError::Plan(PlanError::Source { .. })));

        let events = drain_events(&mut rx);
        assert!(events.iter().any(|e| matches!(e, Event::UpdateSummary(_))));
        assert_eq!(events.last(), Some(&Event::Cancel));
    }

    #[tokio::test]
    async fn test_source_request_and_plugin_recording() {
        let store = MemorySnapshotStore::new("dev");
        let host = StaticPluginHost::new(vec![
            PluginInfo::new("aws", PluginKind::Resource, Some("6.0.0")),
            PluginInfo::new("nodejs", PluginKind::Language, None),
            PluginInfo::new("policy", PluginKind::Analyzer, Some("1.0.0")),
        ]);
        let factory = Arc::new(RecordingFactory::default());
        let (ctx, _rx) = context(
            &store,
            Arc::new(host),
            factory.clone(),
            Arc::new(ScriptedApplier::new()),
        );
        let options = UpdateOptions::new().with_analyzers(vec![String::from("policy")]);

        update(&info(), &ctx, &options, false).await.expect("update");

        let request = factory
            .request
            .lock()
            .expect("lock")
            .take()
            .expect("source requested");
        assert_eq!(request.target, "dev");
        assert_eq!(request.analyzers, vec![String::from("policy")]);
        assert!(!request.dry_run);
        assert_eq!(
            request.default_provider_versions.get("aws"),
            Some(&Some(String::from("6.0.0")))
        );
        assert_eq!(request.default_provider_versions.len(), 1);

        let recorded: Vec<_> = store.snapshot().plugins.into_iter().map(|p| p.name).collect();
        assert_eq!(recorded, vec![String::from("nodejs"), String::from("policy")]);
    }

    #[tokio::test]
    async fn test_parallel_update_counts_every_step() {
        let store = MemorySnapshotStore::new("dev");
        let steps = (0..8).map(|i| Step::create(bucket(&format!("r{i}")))).collect();
        let (ctx, _rx) = context(
            &store,
            Arc::new(StaticPluginHost::default()),
            Arc::new(PrecomputedSourceFactory::from_steps(steps)),
            Arc::new(ScriptedApplier::new()),
        );

        let changes = update(&info(), &ctx, &UpdateOptions::new().with_parallel(4), false)
            .await
            .expect("update");

        assert_eq!(changes.get(StepOp::Create), 8);
        assert_eq!(store.commits().len(), 8);
        assert_eq!(store.snapshot().resources.len(), 8);
    }

    #[test]
    fn test_lifecycle_sends_cancel_on_drop() {
        let (tx, mut rx) = event_channel();
        {
            let mut lifecycle = UpdateLifecycle::start(tx);
            lifecycle.enter(UpdatePhase::Planning);
            assert_eq!(lifecycle.phase, UpdatePhase::Planning);
        }
        assert_eq!(drain_events(&mut rx), vec![Event::Cancel]);
    }
}
