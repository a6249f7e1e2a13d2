//! Provider apply contract.
//!
//! How infrastructure is actually created, updated, or deleted is up to the
//! provider layer. The engine only sees the classified outcome of each call.

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

use crate::error::ProviderError;
use crate::resource::{ResourceStatus, Urn};

use super::step::{Step, StepOp};

/// Result of applying one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Classification of what the provider did.
    pub status: ResourceStatus,
    /// The failure, if the provider reported one.
    pub error: Option<ProviderError>,
}

/// Applies steps against real infrastructure.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StepApplier: Send + Sync {
    /// Performs the step's operation.
    async fn apply(&self, step: &Step) -> ApplyOutcome;
}

/// Applier that replays outcomes declared ahead of time, keyed by resource
/// and operation. Steps without a declared outcome succeed.
#[derive(Debug, Clone, Default)]
pub struct ScriptedApplier {
    outcomes: HashMap<(Urn, StepOp), ApplyOutcome>,
}

impl ApplyOutcome {
    /// A successful outcome.
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            status: ResourceStatus::Ok,
            error: None,
        }
    }

    /// A failed outcome with the given status.
    #[must_use]
    pub fn failed(status: ResourceStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            error: Some(ProviderError::new(message)),
        }
    }

    /// Returns true if the provider reported an error.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

impl Default for ApplyOutcome {
    fn default() -> Self {
        Self::ok()
    }
}

impl ScriptedApplier {
    /// Creates an applier where every step succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares the outcome for a resource and operation.
    pub fn set_outcome(&mut self, urn: Urn, op: StepOp, outcome: ApplyOutcome) {
        self.outcomes.insert((urn, op), outcome);
    }

    /// Declares the outcome for a resource and operation.
    #[must_use]
    pub fn with_outcome(mut self, urn: Urn, op: StepOp, outcome: ApplyOutcome) -> Self {
        self.set_outcome(urn, op, outcome);
        self
    }
}

#[async_trait]
impl StepApplier for ScriptedApplier {
    async fn apply(&self, step: &Step) -> ApplyOutcome {
        let outcome = self
            .outcomes
            .get(&(step.urn().clone(), step.op()))
            .cloned()
            .unwrap_or_default();
        debug!(urn = %step.urn(), op = %step.op(), status = %outcome.status, "scripted apply");
        outcome
    }
}
