//! Planner-facing types.
//!
//! Steps, the sources that produce them, the plugin host contract, and the
//! provider apply contract. Everything here is produced or implemented by
//! collaborators of the engine; the engine only consumes it.

mod plan_file;
mod plugin;
mod provider;
mod source;
mod step;

pub use plan_file::{PlanFile, PlannedOutcome, PlannedStep};
pub use plugin::{PluginHost, PluginInfo, PluginKind, ProgramInfo, StaticPluginHost};
pub use provider::{ApplyOutcome, ScriptedApplier, StepApplier};
#[cfg(test)]
pub use provider::MockStepApplier;
pub use source::{
    FixedSource, PrecomputedSourceFactory, Source, SourceEvent, SourceFactory, SourceRequest,
};
pub use step::{Step, StepKind, StepOp};
