//! Plugin metadata and the plugin host contract.
//!
//! Discovering and loading plugins is done by the host; the engine only asks
//! which plugins a program needs and makes sure the ones it cares about are
//! loaded before the first step is produced.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::Result;

/// Kinds of plugins a program may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    /// Policy analyzers run during planning.
    Analyzer,
    /// Language hosts that evaluate the program.
    Language,
    /// Resource providers.
    Resource,
}

/// A plugin required by, or loaded for, an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin name (for resource plugins, the package name).
    pub name: String,
    /// Plugin kind.
    pub kind: PluginKind,
    /// Plugin version, if pinned.
    #[serde(default)]
    pub version: Option<String>,
}

/// The program an update evaluates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramInfo {
    /// Project name.
    pub project: String,
    /// Working directory of the program.
    pub pwd: PathBuf,
    /// Entry point, relative to `pwd`.
    pub program: PathBuf,
}

/// Host that resolves and loads plugins.
#[async_trait]
pub trait PluginHost: Send + Sync {
    /// Returns every plugin the program needs.
    async fn required_plugins(&self, program: &ProgramInfo) -> Result<Vec<PluginInfo>>;

    /// Ensures the plugins of the given kinds are loaded, returning the ones
    /// that were.
    async fn ensure_plugins(
        &self,
        plugins: &[PluginInfo],
        kinds: &[PluginKind],
    ) -> Result<Vec<PluginInfo>>;
}

/// Plugin host with a fixed plugin set that treats every plugin as loadable.
#[derive(Debug, Clone, Default)]
pub struct StaticPluginHost {
    plugins: Vec<PluginInfo>,
}

impl StaticPluginHost {
    /// Creates a host that reports the given plugins as required.
    #[must_use]
    pub const fn new(plugins: Vec<PluginInfo>) -> Self {
        Self { plugins }
    }
}

#[async_trait]
impl PluginHost for StaticPluginHost {
    async fn required_plugins(&self, _program: &ProgramInfo) -> Result<Vec<PluginInfo>> {
        Ok(self.plugins.clone())
    }

    async fn ensure_plugins(
        &self,
        plugins: &[PluginInfo],
        kinds: &[PluginKind],
    ) -> Result<Vec<PluginInfo>> {
        Ok(plugins
            .iter()
            .filter(|p| kinds.contains(&p.kind))
            .cloned()
            .collect())
    }
}

impl PluginInfo {
    /// Creates plugin info.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: PluginKind, version: Option<&str>) -> Self {
        Self {
            name: name.into(),
            kind,
            version: version.map(str::to_string),
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Analyzer => "analyzer",
            Self::Language => "language",
            Self::Resource => "resource",
        };
        write!(f, "{kind}")
    }
}

impl fmt::Display for PluginInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{} {}@{version}", self.kind, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}
