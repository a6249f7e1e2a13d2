//! Step types.
//!
//! A [`Step`] is one planned operation on one resource. Steps are produced by
//! the planner and only read by the engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::resource::{ResourceState, Urn};

/// The kind of operation a step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOp {
    /// Nothing changes; the resource is re-affirmed.
    Same,
    /// A new resource is created.
    Create,
    /// An existing resource is updated in place.
    Update,
    /// An existing resource is deleted.
    Delete,
    /// Logical marker for a resource being replaced.
    Replace,
    /// The replacement resource is created.
    CreateReplacement,
    /// The replaced resource is deleted.
    DeleteReplaced,
    /// An external resource is read into the snapshot.
    Read,
}

/// Operation-specific data of a step.
#[derive(Debug, Clone)]
pub enum StepKind {
    /// Re-affirm an unchanged resource.
    Same {
        /// State before the step.
        old: Arc<ResourceState>,
        /// State after the step.
        new: Arc<ResourceState>,
    },
    /// Create a resource.
    Create {
        /// State to create.
        new: Arc<ResourceState>,
    },
    /// Update a resource in place.
    Update {
        /// State before the step.
        old: Arc<ResourceState>,
        /// State after the step.
        new: Arc<ResourceState>,
        /// Property keys that changed.
        diffs: Vec<String>,
    },
    /// Delete a resource.
    Delete {
        /// State to delete.
        old: Arc<ResourceState>,
    },
    /// Replace a resource.
    Replace {
        /// State being replaced.
        old: Arc<ResourceState>,
        /// Replacement state.
        new: Arc<ResourceState>,
        /// Property keys that forced the replacement.
        diffs: Vec<String>,
    },
    /// Create the replacement for a resource.
    CreateReplacement {
        /// State being replaced.
        old: Arc<ResourceState>,
        /// Replacement state.
        new: Arc<ResourceState>,
    },
    /// Delete a resource that has been replaced.
    DeleteReplaced {
        /// Replaced state to delete.
        old: Arc<ResourceState>,
    },
    /// Read an external resource.
    Read {
        /// Previously read state, if any.
        old: Option<Arc<ResourceState>>,
        /// Freshly read state.
        new: Arc<ResourceState>,
    },
}

/// One planned operation on one resource.
#[derive(Debug, Clone)]
pub struct Step {
    urn: Urn,
    kind: StepKind,
    logical: bool,
    dependencies: Vec<Urn>,
}

impl Step {
    fn from_kind(urn: Urn, kind: StepKind, logical: bool) -> Self {
        Self {
            urn,
            kind,
            logical,
            dependencies: Vec::new(),
        }
    }

    /// Creates a step that re-affirms an unchanged resource.
    #[must_use]
    pub fn same(old: ResourceState, new: ResourceState) -> Self {
        let urn = new.urn.clone();
        Self::from_kind(
            urn,
            StepKind::Same {
                old: Arc::new(old),
                new: Arc::new(new),
            },
            true,
        )
    }

    /// Creates a step that creates a resource.
    #[must_use]
    pub fn create(new: ResourceState) -> Self {
        let urn = new.urn.clone();
        Self::from_kind(urn, StepKind::Create { new: Arc::new(new) }, true)
    }

    /// Creates a step that updates a resource in place.
    #[must_use]
    pub fn update(old: ResourceState, new: ResourceState, diffs: Vec<String>) -> Self {
        let urn = new.urn.clone();
        Self::from_kind(
            urn,
            StepKind::Update {
                old: Arc::new(old),
                new: Arc::new(new),
                diffs,
            },
            true,
        )
    }

    /// Creates a step that deletes a resource.
    #[must_use]
    pub fn delete(old: ResourceState) -> Self {
        let urn = old.urn.clone();
        Self::from_kind(urn, StepKind::Delete { old: Arc::new(old) }, true)
    }

    /// Creates the logical replace marker for a resource.
    #[must_use]
    pub fn replace(old: ResourceState, new: ResourceState, diffs: Vec<String>) -> Self {
        let urn = new.urn.clone();
        Self::from_kind(
            urn,
            StepKind::Replace {
                old: Arc::new(old),
                new: Arc::new(new),
                diffs,
            },
            true,
        )
    }

    /// Creates the step that brings up a replacement. Not logical: the
    /// replacement is counted once, through its [`StepOp::Replace`] marker.
    #[must_use]
    pub fn create_replacement(old: ResourceState, new: ResourceState) -> Self {
        let urn = new.urn.clone();
        Self::from_kind(
            urn,
            StepKind::CreateReplacement {
                old: Arc::new(old),
                new: Arc::new(new),
            },
            false,
        )
    }

    /// Creates the step that deletes a replaced resource. Not logical.
    #[must_use]
    pub fn delete_replaced(old: ResourceState) -> Self {
        let urn = old.urn.clone();
        Self::from_kind(urn, StepKind::DeleteReplaced { old: Arc::new(old) }, false)
    }

    /// Creates a step that reads an external resource.
    #[must_use]
    pub fn read(old: Option<ResourceState>, new: ResourceState) -> Self {
        let urn = new.urn.clone();
        Self::from_kind(
            urn,
            StepKind::Read {
                old: old.map(Arc::new),
                new: Arc::new(new),
            },
            true,
        )
    }

    /// Sets the resources this step must wait for.
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<Urn>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Overrides whether the step counts toward change totals.
    #[must_use]
    pub const fn with_logical(mut self, logical: bool) -> Self {
        self.logical = logical;
        self
    }

    /// Returns the resource identity.
    #[must_use]
    pub const fn urn(&self) -> &Urn {
        &self.urn
    }

    /// Returns the operation-specific data.
    #[must_use]
    pub const fn kind(&self) -> &StepKind {
        &self.kind
    }

    /// Returns the operation discriminant.
    #[must_use]
    pub const fn op(&self) -> StepOp {
        match self.kind {
            StepKind::Same { .. } => StepOp::Same,
            StepKind::Create { .. } => StepOp::Create,
            StepKind::Update { .. } => StepOp::Update,
            StepKind::Delete { .. } => StepOp::Delete,
            StepKind::Replace { .. } => StepOp::Replace,
            StepKind::CreateReplacement { .. } => StepOp::CreateReplacement,
            StepKind::DeleteReplaced { .. } => StepOp::DeleteReplaced,
            StepKind::Read { .. } => StepOp::Read,
        }
    }

    /// Returns the state before the step, if any.
    #[must_use]
    pub fn old(&self) -> Option<&ResourceState> {
        match &self.kind {
            StepKind::Create { .. } => None,
            StepKind::Read { old, .. } => old.as_deref(),
            StepKind::Same { old, .. }
            | StepKind::Update { old, .. }
            | StepKind::Delete { old }
            | StepKind::Replace { old, .. }
            | StepKind::CreateReplacement { old, .. }
            | StepKind::DeleteReplaced { old } => Some(&**old),
        }
    }

    /// Returns the state after the step, if any.
    #[must_use]
    pub fn new_state(&self) -> Option<&ResourceState> {
        match &self.kind {
            StepKind::Delete { .. } | StepKind::DeleteReplaced { .. } => None,
            StepKind::Same { new, .. }
            | StepKind::Create { new }
            | StepKind::Update { new, .. }
            | StepKind::Replace { new, .. }
            | StepKind::CreateReplacement { new, .. }
            | StepKind::Read { new, .. } => Some(&**new),
        }
    }

    /// Returns the state the step is about: the new state when there is one,
    /// otherwise the old state.
    #[must_use]
    pub fn res(&self) -> &ResourceState {
        match &self.kind {
            StepKind::Delete { old } | StepKind::DeleteReplaced { old } => &**old,
            StepKind::Same { new, .. }
            | StepKind::Create { new }
            | StepKind::Update { new, .. }
            | StepKind::Replace { new, .. }
            | StepKind::CreateReplacement { new, .. }
            | StepKind::Read { new, .. } => &**new,
        }
    }

    /// Returns the property keys that changed, for updates and replacements.
    #[must_use]
    pub fn diffs(&self) -> &[String] {
        match &self.kind {
            StepKind::Update { diffs, .. } | StepKind::Replace { diffs, .. } => diffs,
            _ => &[],
        }
    }

    /// Returns true if the step counts toward user-visible change totals.
    #[must_use]
    pub const fn logical(&self) -> bool {
        self.logical
    }

    /// Returns the resources this step must wait for.
    #[must_use]
    pub fn dependencies(&self) -> &[Urn] {
        &self.dependencies
    }

    /// Returns true if the step targets a provider the engine bootstrapped
    /// on its own.
    #[must_use]
    pub fn is_default_provider_step(&self) -> bool {
        self.urn.is_default_provider()
    }
}

impl fmt::Display for StepOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Self::Same => "same",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Replace => "replace",
            Self::CreateReplacement => "create-replacement",
            Self::DeleteReplaced => "delete-replaced",
            Self::Read => "read",
        };
        write!(f, "{op}")
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op(), self.urn)
    }
}
