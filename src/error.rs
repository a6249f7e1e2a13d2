//! Error types for the Halldyll step execution engine.
//!
//! This module provides the error hierarchy for every phase of an update:
//! configuration, planning, snapshot persistence, and per-step provider
//! failures.

use std::path::PathBuf;
use thiserror::Error;

use crate::engine::ResourceChanges;
use crate::resource::Urn;

/// The main error type for the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A required input was missing or empty.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Planning errors (source construction, plugin resolution, step iteration).
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Snapshot store errors.
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// An environment override could not be interpreted.
    #[error("Invalid value for environment variable {name}: {value}")]
    InvalidEnvVar {
        /// Name of the variable.
        name: String,
        /// The rejected value.
        value: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The plugin host could not determine the plugins a program needs.
    #[error("Failed to resolve required plugins: {message}")]
    PluginResolution {
        /// Description of the failure.
        message: String,
    },

    /// A required plugin could not be loaded.
    #[error("Failed to load plugin {name}: {message}")]
    PluginLoad {
        /// Plugin name.
        name: String,
        /// Description of the failure.
        message: String,
    },

    /// The step source failed while producing the next step.
    #[error("Step source failed: {message}")]
    Source {
        /// Description of the failure.
        message: String,
    },

    /// A plan file could not be read or is malformed.
    #[error("Invalid plan file {path}: {message}")]
    InvalidPlanFile {
        /// Path of the plan file.
        path: PathBuf,
        /// Description of the problem.
        message: String,
    },

    /// A step references state that does not exist.
    #[error("Step for {urn} is missing its {which} state")]
    MissingState {
        /// Resource the step targets.
        urn: Urn,
        /// Which state was missing (`old` or `new`).
        which: &'static str,
    },
}

/// Snapshot store errors.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// A mutation could not be opened.
    #[error("Failed to begin mutation for {urn}: {message}")]
    BeginMutation {
        /// Resource the mutation was for.
        urn: Urn,
        /// Description of the failure.
        message: String,
    },

    /// A mutation could not be committed.
    #[error("Failed to end mutation for {urn}: {message}")]
    EndMutation {
        /// Resource the mutation was for.
        urn: Urn,
        /// Description of the failure.
        message: String,
    },

    /// The checkpoint failed its integrity check or could not be read.
    #[error("Snapshot is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Snapshot lock acquisition failed.
    #[error("Failed to acquire snapshot lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// Snapshot lock is held by another update.
    #[error("Snapshot is locked by another update (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Writing the checkpoint failed.
    #[error("Failed to write snapshot: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// Serialization error.
    #[error("Snapshot serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// Snapshot format version mismatch.
    #[error("Snapshot version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected snapshot version.
        expected: String,
        /// Found snapshot version.
        found: String,
    },
}

/// A failure reported by a resource provider while applying a step.
///
/// Provider failures are recovered per step and never abort the walk on
/// their own, so they are not a variant of [`EngineError`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ProviderError {
    /// Description of the failure as reported by the provider.
    pub message: String,
}

/// Error returned by [`crate::engine::update`].
///
/// Carries whatever changes were applied before the failure so callers can
/// report "N changes applied" rather than only the error.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct UpdateError {
    /// Changes accumulated before the failure, if the walk started.
    pub changes: Option<ResourceChanges>,
    /// The causing error.
    #[source]
    pub error: EngineError,
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Creates a precondition error naming the offending input.
    #[must_use]
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl PlanError {
    /// Creates a source error with the given message.
    #[must_use]
    pub fn source_failed(message: impl Into<String>) -> Self {
        Self::Source {
            message: message.into(),
        }
    }
}

impl SnapshotError {
    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates a provider error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl UpdateError {
    /// Creates an update error for a failure that happened before any step ran.
    #[must_use]
    pub const fn without_changes(error: EngineError) -> Self {
        Self {
            changes: None,
            error,
        }
    }

    /// Creates an update error that still reports the accumulated changes.
    #[must_use]
    pub const fn with_changes(changes: ResourceChanges, error: EngineError) -> Self {
        Self {
            changes: Some(changes),
            error,
        }
    }
}
