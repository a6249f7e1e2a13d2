//! Configuration types for the engine.
//!
//! These structs map to the `halldyll.engine.yaml` file. Every section is
//! optional; a missing file behaves like an empty one.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::engine::{UnknownStatusPolicy, UpdateOptions};
use crate::snapshot::STATE_DIR;

/// Name of the checkpoint file inside the state directory.
const SNAPSHOT_FILE: &str = "snapshot.json";

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Update behaviour.
    #[serde(default)]
    pub engine: EngineSettings,
    /// Snapshot store location.
    #[serde(default)]
    pub snapshot: SnapshotSettings,
}

/// Update behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EngineSettings {
    /// Maximum number of steps in flight (`0` or `1` runs serially).
    #[serde(default)]
    pub parallel: usize,
    /// Emit debug diagnostics.
    #[serde(default)]
    pub debug: bool,
    /// Allow color in diagnostics.
    #[serde(default = "default_color")]
    pub color: bool,
    /// Analyzers to run during planning.
    #[serde(default)]
    pub analyzers: Vec<String>,
    /// Treatment of `unknown` provider results.
    #[serde(default)]
    pub unknown_status_policy: UnknownStatusPolicy,
}

/// Snapshot store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SnapshotSettings {
    /// Checkpoint file path. Defaults to `.halldyll/snapshot.json` under the
    /// project directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

const fn default_color() -> bool {
    true
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            parallel: 0,
            debug: false,
            color: default_color(),
            analyzers: Vec::new(),
            unknown_status_policy: UnknownStatusPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Builds the options an update runs with.
    #[must_use]
    pub fn update_options(&self) -> UpdateOptions {
        UpdateOptions::new()
            .with_parallel(self.engine.parallel)
            .with_debug(self.engine.debug)
            .with_color(self.engine.color)
            .with_analyzers(self.engine.analyzers.clone())
            .with_unknown_status_policy(self.engine.unknown_status_policy)
    }

    /// Resolves the checkpoint file path against a project directory.
    #[must_use]
    pub fn snapshot_path(&self, base_dir: &Path) -> PathBuf {
        match &self.snapshot.path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => base_dir.join(path),
            None => base_dir.join(STATE_DIR).join(SNAPSHOT_FILE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.engine.parallel, 0);
        assert!(config.engine.color);
        assert!(config.snapshot.path.is_none());

        let options = config.update_options();
        assert!(options.is_serial());
        assert!(options.use_color);
        assert_eq!(options.unknown_status_policy, UnknownStatusPolicy::RequireError);
    }

    #[test]
    fn test_update_options_carries_settings() {
        let config = EngineConfig {
            engine: EngineSettings {
                parallel: 8,
                debug: true,
                color: false,
                analyzers: vec![String::from("policy-pack")],
                unknown_status_policy: UnknownStatusPolicy::AlwaysCorrupt,
            },
            snapshot: SnapshotSettings::default(),
        };

        let options = config.update_options();
        assert_eq!(options.parallel, 8);
        assert!(options.debug);
        assert!(!options.use_color);
        assert_eq!(options.analyzers, vec![String::from("policy-pack")]);
        assert_eq!(options.unknown_status_policy, UnknownStatusPolicy::AlwaysCorrupt);
    }

    #[test]
    fn test_snapshot_path_resolution() {
        let base = Path::new("/srv/web");
        let mut config = EngineConfig::default();
        assert_eq!(
            config.snapshot_path(base),
            PathBuf::from("/srv/web/.halldyll/snapshot.json")
        );

        config.snapshot.path = Some(PathBuf::from("state/dev.json"));
        assert_eq!(config.snapshot_path(base), PathBuf::from("/srv/web/state/dev.json"));

        config.snapshot.path = Some(PathBuf::from("/var/lib/halldyll/dev.json"));
        assert_eq!(
            config.snapshot_path(base),
            PathBuf::from("/var/lib/halldyll/dev.json")
        );
    }
}
