//! Configuration validation.
//!
//! Checks engine settings before an update is built from them.

use crate::error::{ConfigError, EngineError, Result};
use std::collections::HashSet;
use tracing::{debug, warn};

use super::types::EngineConfig;

/// Upper bound for `engine.parallel`.
pub const MAX_PARALLEL: usize = 1024;

/// Validator for engine configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates an engine configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error found.
    pub fn validate(&self, config: &EngineConfig) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_parallel(config.engine.parallel, &mut result);
        Self::validate_analyzers(&config.engine.analyzers, &mut result);
        Self::validate_snapshot(config, &mut result);

        for warning in &result.warnings {
            warn!("{warning}");
        }

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(EngineError::Config(ConfigError::validation(
                first_error.message.clone(),
                first_error.field.clone(),
            )))
        }
    }

    fn validate_parallel(parallel: usize, result: &mut ValidationResult) {
        if parallel > MAX_PARALLEL {
            result.errors.push(ValidationError {
                field: String::from("engine.parallel"),
                message: format!("Parallelism {parallel} exceeds the maximum of {MAX_PARALLEL}"),
            });
        } else if parallel == 0 {
            result.warnings.push(String::from(
                "engine.parallel is 0; steps will run one at a time",
            ));
        }
    }

    fn validate_analyzers(analyzers: &[String], result: &mut ValidationResult) {
        let mut seen = HashSet::new();
        for (i, name) in analyzers.iter().enumerate() {
            let field = format!("engine.analyzers[{i}]");
            if name.trim().is_empty() {
                result.errors.push(ValidationError {
                    field,
                    message: String::from("Analyzer name cannot be empty"),
                });
            } else if !seen.insert(name.as_str()) {
                result.errors.push(ValidationError {
                    field,
                    message: format!("Duplicate analyzer: {name}"),
                });
            }
        }
    }

    fn validate_snapshot(config: &EngineConfig, result: &mut ValidationResult) {
        if let Some(path) = &config.snapshot.path {
            if path.as_os_str().is_empty() {
                result.errors.push(ValidationError {
                    field: String::from("snapshot.path"),
                    message: String::from("Snapshot path cannot be empty"),
                });
            }
        }
    }
}
