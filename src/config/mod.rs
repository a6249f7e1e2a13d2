//! Configuration module for the engine.
//!
//! This module handles:
//! - Parsing `halldyll.engine.yaml`
//! - Environment overrides and `.env` loading
//! - Validation of configuration values

mod parser;
mod types;
mod validator;

pub use parser::{
    find_config_file, ConfigParser, DEFAULT_CONFIG_FILES, ENV_DEBUG, ENV_PARALLEL,
    ENV_SNAPSHOT_PATH,
};
pub use types::{EngineConfig, EngineSettings, SnapshotSettings};
pub use validator::{ConfigValidator, ValidationError, ValidationResult, MAX_PARALLEL};
