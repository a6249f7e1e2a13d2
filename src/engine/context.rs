//! Update inputs and collaborators.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Span;

use crate::deploy::{PluginHost, ProgramInfo, SourceFactory, StepApplier};
use crate::error::{EngineError, Result};
use crate::snapshot::SnapshotManager;

use super::cancel::Cancellation;
use super::events::EventSender;

/// The deployment target of an update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Target {
    /// Target (stack) name.
    pub name: String,
    /// Resolved configuration values.
    pub config: BTreeMap<String, String>,
}

/// What is being updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateInfo {
    /// Project name.
    pub project: String,
    /// Root directory of the project.
    pub root: PathBuf,
    /// Program entry point, relative to `root`.
    pub program: PathBuf,
    /// Target being updated.
    pub target: Target,
}

/// Collaborators an update talks to.
#[derive(Clone)]
pub struct Context {
    /// Where checkpoints are written.
    pub snapshot_manager: Arc<dyn SnapshotManager>,
    /// Where events are sent.
    pub events: EventSender,
    /// Cancellation signal for the update.
    pub cancel: Cancellation,
    /// Span the update's span is parented to.
    pub parent_span: Option<Span>,
    /// Resolves and loads plugins.
    pub plugin_host: Arc<dyn PluginHost>,
    /// Builds the step source.
    pub source_factory: Arc<dyn SourceFactory>,
    /// Performs provider operations.
    pub applier: Arc<dyn StepApplier>,
}

impl Target {
    /// Creates a target without configuration.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: BTreeMap::new(),
        }
    }

    /// Adds a configuration value.
    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}

impl UpdateInfo {
    /// Creates update info for a project and target.
    #[must_use]
    pub fn new(project: impl Into<String>, root: impl Into<PathBuf>, target: Target) -> Self {
        Self {
            project: project.into(),
            root: root.into(),
            program: PathBuf::from("."),
            target,
        }
    }

    /// Sets the program entry point.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Checks the inputs an update cannot run without.
    ///
    /// # Errors
    ///
    /// Returns a precondition error naming the missing input.
    pub fn validate(&self) -> Result<()> {
        if self.project.trim().is_empty() {
            return Err(EngineError::precondition("update requires a project name"));
        }
        if self.target.name.trim().is_empty() {
            return Err(EngineError::precondition("update requires a target name"));
        }
        if self.root.as_os_str().is_empty() {
            return Err(EngineError::precondition("update requires a project root"));
        }
        Ok(())
    }

    /// Describes the program for plugin resolution and evaluation.
    #[must_use]
    pub fn program_info(&self) -> ProgramInfo {
        ProgramInfo {
            project: self.project.clone(),
            pwd: self.root.clone(),
            program: self.program.clone(),
        }
    }
}

impl Context {
    /// Creates a context that is never canceled and has no parent span.
    #[must_use]
    pub fn new(
        snapshot_manager: Arc<dyn SnapshotManager>,
        events: EventSender,
        plugin_host: Arc<dyn PluginHost>,
        source_factory: Arc<dyn SourceFactory>,
        applier: Arc<dyn StepApplier>,
    ) -> Self {
        Self {
            snapshot_manager,
            events,
            cancel: Cancellation::none(),
            parent_span: None,
            plugin_host,
            source_factory,
            applier,
        }
    }

    /// Sets the cancellation signal.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sets the parent span.
    #[must_use]
    pub fn with_parent_span(mut self, span: Span) -> Self {
        self.parent_span = Some(span);
        self
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("cancel", &self.cancel)
            .field("parent_span", &self.parent_span)
            .finish_non_exhaustive()
    }
}
