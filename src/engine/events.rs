//! Engine events.
//!
//! Everything the engine wants a user to see goes through an [`EventEmitter`]
//! as an [`Event`]. Rendering is left to whoever drains the channel.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::deploy::{Step, StepOp};
use crate::resource::{ResourceState, ResourceStatus, Urn};

use super::changes::ResourceChanges;
use super::options::UpdateOptions;

/// Sending half of an event channel.
pub type EventSender = mpsc::UnboundedSender<Event>;

/// Receiving half of an event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

/// Creates an event channel.
///
/// The channel is unbounded so a slow renderer never stalls the engine.
#[must_use]
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Verbose output, only emitted in debug mode.
    Debug,
    /// Informational message.
    Info,
    /// Informational message destined for stderr.
    Infoerr,
    /// Something the operator should look at.
    Warning,
    /// A failure.
    Error,
}

/// An event produced by the engine during an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum Event {
    /// Preformatted, possibly colorized text.
    StdoutColor(String),
    /// A diagnostic message.
    Diag(DiagEventPayload),
    /// A step is about to run.
    ResourcePre(ResourcePreEventPayload),
    /// A resource's outputs are known.
    ResourceOutputs(ResourceOutputsEventPayload),
    /// A step failed.
    ResourceOperationFailed(ResourceOperationFailedPayload),
    /// The update is about to start.
    Prelude(PreludeEventPayload),
    /// The update finished.
    UpdateSummary(SummaryEventPayload),
    /// No more events will follow for this update.
    Cancel,
}

/// Payload of a diagnostic event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagEventPayload {
    /// How serious the message is.
    pub severity: Severity,
    /// Whether the message may carry color codes.
    pub use_color: bool,
    /// The message text.
    pub message: String,
    /// Resource the message is about, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urn: Option<Urn>,
}

/// Description of a step as seen by renderers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEventMetadata {
    /// Operation kind.
    pub op: StepOp,
    /// Target resource.
    pub urn: Urn,
    /// Resource type token.
    #[serde(rename = "type")]
    pub type_token: String,
    /// Whether the resource is provider-backed.
    pub custom: bool,
    /// Prior state, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<ResourceState>,
    /// Desired state, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<ResourceState>,
    /// Properties that differ.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diffs: Vec<String>,
    /// Whether the step counts toward change totals.
    pub logical: bool,
}

/// Payload of a resource-pre event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourcePreEventPayload {
    /// The step about to run.
    pub metadata: StepEventMetadata,
    /// True when reported by a preview.
    pub planning: bool,
    /// Whether debug output is enabled.
    pub debug: bool,
}

/// Payload of a resource-outputs event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceOutputsEventPayload {
    /// The step whose outputs are reported.
    pub metadata: StepEventMetadata,
    /// True when reported by a preview.
    pub planning: bool,
    /// Whether debug output is enabled.
    pub debug: bool,
}

/// Payload of a resource-operation-failed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceOperationFailedPayload {
    /// The step that failed.
    pub metadata: StepEventMetadata,
    /// What the provider reported.
    pub status: ResourceStatus,
    /// Logical steps completed before this failure.
    pub steps: usize,
    /// Whether debug output is enabled.
    pub debug: bool,
}

/// Payload of a prelude event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreludeEventPayload {
    /// True for previews.
    pub is_preview: bool,
    /// Resolved target configuration.
    pub config: BTreeMap<String, String>,
}

/// Payload of an update-summary event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryEventPayload {
    /// True for previews.
    pub is_preview: bool,
    /// Whether the snapshot may no longer match real infrastructure.
    pub maybe_corrupt: bool,
    /// Wall-clock duration of the update in milliseconds.
    pub duration_ms: u64,
    /// Counted operations by kind.
    pub resource_changes: ResourceChanges,
}

impl Event {
    /// Returns the wire name of the event type.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::StdoutColor(_) => "stdout-color",
            Self::Diag(_) => "diag",
            Self::ResourcePre(_) => "resource-pre",
            Self::ResourceOutputs(_) => "resource-outputs",
            Self::ResourceOperationFailed(_) => "resource-operation-failed",
            Self::Prelude(_) => "prelude",
            Self::UpdateSummary(_) => "update-summary",
            Self::Cancel => "cancel",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Debug => "debug",
            Self::Info | Self::Infoerr => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

impl StepEventMetadata {
    /// Describes a step.
    #[must_use]
    pub fn from_step(step: &Step) -> Self {
        let res = step.res();
        Self {
            op: step.op(),
            urn: step.urn().clone(),
            type_token: res.type_token.clone(),
            custom: res.custom,
            old: step.old().cloned(),
            new: step.new_state().cloned(),
            diffs: step.diffs().to_vec(),
            logical: step.logical(),
        }
    }
}

/// Pushes events for one update into a channel.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: EventSender,
    use_color: bool,
    debug: bool,
}

impl EventEmitter {
    /// Creates an emitter over the given channel.
    #[must_use]
    pub const fn new(sender: EventSender) -> Self {
        Self {
            sender,
            use_color: false,
            debug: false,
        }
    }

    /// Creates an emitter configured from update options.
    #[must_use]
    pub fn for_update(sender: EventSender, options: &UpdateOptions) -> Self {
        Self::new(sender)
            .with_color(options.use_color)
            .with_debug(options.debug)
    }

    /// Sets whether diagnostics may carry color.
    #[must_use]
    pub const fn with_color(mut self, use_color: bool) -> Self {
        self.use_color = use_color;
        self
    }

    /// Sets whether debug diagnostics are emitted.
    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Sends an event. A closed channel only drops the event.
    pub fn emit(&self, event: Event) {
        if let Err(err) = self.sender.send(event) {
            debug!(event = err.0.event_type(), "event receiver closed, dropping event");
        }
    }

    /// Emits preformatted text.
    pub fn stdout_color(&self, text: impl Into<String>) {
        self.emit(Event::StdoutColor(text.into()));
    }

    fn diag(&self, severity: Severity, message: String, urn: Option<Urn>) {
        self.emit(Event::Diag(DiagEventPayload {
            severity,
            use_color: self.use_color,
            message,
            urn,
        }));
    }

    /// Emits a debug diagnostic when debug output is enabled.
    pub fn diag_debug(&self, message: impl Into<String>) {
        if self.debug {
            self.diag(Severity::Debug, message.into(), None);
        }
    }

    /// Emits an informational diagnostic.
    pub fn diag_info(&self, message: impl Into<String>, urn: Option<Urn>) {
        self.diag(Severity::Info, message.into(), urn);
    }

    /// Emits an informational diagnostic destined for stderr.
    pub fn diag_infoerr(&self, message: impl Into<String>, urn: Option<Urn>) {
        self.diag(Severity::Infoerr, message.into(), urn);
    }

    /// Emits a warning diagnostic.
    pub fn diag_warning(&self, message: impl Into<String>, urn: Option<Urn>) {
        self.diag(Severity::Warning, message.into(), urn);
    }

    /// Emits an error diagnostic.
    pub fn diag_error(&self, message: impl Into<String>, urn: Option<Urn>) {
        self.diag(Severity::Error, message.into(), urn);
    }

    /// Reports that a step is about to run.
    pub fn resource_pre(&self, step: &Step, planning: bool) {
        self.emit(Event::ResourcePre(ResourcePreEventPayload {
            metadata: StepEventMetadata::from_step(step),
            planning,
            debug: self.debug,
        }));
    }

    /// Reports a resource's outputs.
    pub fn resource_outputs(&self, step: &Step, planning: bool) {
        self.emit(Event::ResourceOutputs(ResourceOutputsEventPayload {
            metadata: StepEventMetadata::from_step(step),
            planning,
            debug: self.debug,
        }));
    }

    /// Reports a failed step.
    pub fn resource_operation_failed(&self, step: &Step, status: ResourceStatus, steps: usize) {
        self.emit(Event::ResourceOperationFailed(ResourceOperationFailedPayload {
            metadata: StepEventMetadata::from_step(step),
            status,
            steps,
            debug: self.debug,
        }));
    }

    /// Reports the start of an update.
    pub fn prelude(&self, is_preview: bool, config: &BTreeMap<String, String>) {
        self.emit(Event::Prelude(PreludeEventPayload {
            is_preview,
            config: config.clone(),
        }));
    }

    /// Reports the end of an update.
    pub fn update_summary(
        &self,
        is_preview: bool,
        maybe_corrupt: bool,
        duration: Duration,
        resource_changes: &ResourceChanges,
    ) {
        self.emit(Event::UpdateSummary(SummaryEventPayload {
            is_preview,
            maybe_corrupt,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            resource_changes: resource_changes.clone(),
        }));
    }

    /// Reports that the event stream for the update has ended.
    pub fn cancel(&self) {
        self.emit(Event::Cancel);
    }
}

/// Drains every event currently buffered in a receiver.
#[must_use]
pub fn drain_events(receiver: &mut EventReceiver) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}
