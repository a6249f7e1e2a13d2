//! Step execution engine.
//!
//! This module contains the core of an update:
//!
//! - [`update`]: entry point, preview or real run
//! - [`PlanWalker`]: serial or bounded-parallel traversal of the steps
//! - [`UpdateActions`]: per-step callbacks (report, checkpoint, count)
//! - [`EventEmitter`]: structured progress events for renderers

mod actions;
mod cancel;
mod changes;
mod context;
mod events;
mod options;
mod update;
mod walk;

pub use actions::{PluginActions, UpdateActions};
pub use cancel::{CancelState, Cancellation, CancellationSource};
pub use changes::ResourceChanges;
pub use context::{Context, Target, UpdateInfo};
pub use events::{
    drain_events, event_channel, DiagEventPayload, Event, EventEmitter, EventReceiver, EventSender,
    PreludeEventPayload, ResourceOperationFailedPayload, ResourceOutputsEventPayload,
    ResourcePreEventPayload, Severity, StepEventMetadata, SummaryEventPayload,
};
pub use options::{UnknownStatusPolicy, UpdateOptions};
pub use update::{new_update_source, update};
pub use walk::{PlanWalker, WalkOutcome, WalkSummary};
