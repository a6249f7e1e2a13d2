//! Configuration parser for loading engine settings.
//!
//! Settings come from a YAML file, then environment variables override
//! individual fields. A `.env` file next to the project is loaded first so
//! its values take part in the overrides.

use crate::error::{ConfigError, EngineError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::types::EngineConfig;

/// Overrides `engine.parallel`.
pub const ENV_PARALLEL: &str = "HALLDYLL_PARALLEL";

/// Overrides `engine.debug`.
pub const ENV_DEBUG: &str = "HALLDYLL_DEBUG";

/// Overrides `snapshot.path`.
pub const ENV_SNAPSHOT_PATH: &str = "HALLDYLL_SNAPSHOT_PATH";

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["halldyll.engine.yaml", "halldyll.engine.yml"];

/// Configuration parser for loading engine configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving the `.env` file.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<EngineConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(EngineError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// An empty document yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<EngineConfig> {
        debug!("Parsing YAML configuration");

        if content.trim().is_empty() {
            return Ok(EngineConfig::default());
        }

        let config: EngineConfig = serde_yaml::from_str(content).map_err(|e| {
            ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: source.map(|p| p.display().to_string()),
            }
        })?;

        debug!(
            parallel = config.engine.parallel,
            analyzers = config.engine.analyzers.len(),
            "Parsed engine configuration"
        );
        Ok(config)
    }

    /// Loads configuration and applies overrides from the process environment.
    ///
    /// Without a path, the defaults are used as the starting point.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if an
    /// override has an invalid value.
    pub fn load_with_env(&self, path: Option<&Path>) -> Result<EngineConfig> {
        let mut config = match path {
            Some(path) => self.load_file(path)?,
            None => EngineConfig::default(),
        };
        Self::apply_env_overrides(&mut config, std::env::vars())?;
        Ok(config)
    }

    /// Applies environment overrides from the given variables.
    ///
    /// # Errors
    ///
    /// Returns an error naming the variable if a value cannot be interpreted.
    pub fn apply_env_overrides<I, K, V>(config: &mut EngineConfig, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (name, value) in vars {
            let name = name.as_ref();
            match name {
                ENV_PARALLEL => {
                    let value = value.into();
                    debug!("Overriding engine.parallel from environment");
                    config.engine.parallel = value
                        .trim()
                        .parse()
                        .map_err(|_| invalid_env_var(name, &value))?;
                }
                ENV_DEBUG => {
                    let value = value.into();
                    debug!("Overriding engine.debug from environment");
                    config.engine.debug =
                        parse_flag(&value).ok_or_else(|| invalid_env_var(name, &value))?;
                }
                ENV_SNAPSHOT_PATH => {
                    debug!("Overriding snapshot.path from environment");
                    config.snapshot.path = Some(PathBuf::from(value.into()));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| ConfigError::ParseError {
                message: format!("Failed to load .env file: {e}"),
                location: Some(env_path.display().to_string()),
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

fn invalid_env_var(name: &str, value: &str) -> EngineError {
    EngineError::Config(ConfigError::InvalidEnvVar {
        name: name.to_string(),
        value: value.to_string(),
    })
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Finds the configuration file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(EngineError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}
