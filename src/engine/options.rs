//! Update options.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a provider's `Unknown` status without an error is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownStatusPolicy {
    /// Only an `Unknown` status that comes with an error marks the snapshot
    /// as possibly corrupt.
    #[default]
    RequireError,
    /// Any `Unknown` status marks the snapshot as possibly corrupt.
    AlwaysCorrupt,
}

/// Settings for one update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Analyzers to run during planning. Passed through to the source.
    pub analyzers: Vec<String>,
    /// Maximum number of steps in flight. `0` and `1` mean serial.
    pub parallel: usize,
    /// Whether debug output is enabled.
    pub debug: bool,
    /// Whether diagnostics may carry color.
    pub use_color: bool,
    /// Treatment of `Unknown` provider results.
    pub unknown_status_policy: UnknownStatusPolicy,
    /// Whether steps for engine-bootstrapped providers are reported.
    pub(crate) report_default_provider_steps: bool,
}

impl UpdateOptions {
    /// Creates serial options with everything else off.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the parallelism.
    #[must_use]
    pub const fn with_parallel(mut self, parallel: usize) -> Self {
        self.parallel = parallel;
        self
    }

    /// Enables or disables debug output.
    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Enables or disables color in diagnostics.
    #[must_use]
    pub const fn with_color(mut self, use_color: bool) -> Self {
        self.use_color = use_color;
        self
    }

    /// Sets the analyzers.
    #[must_use]
    pub fn with_analyzers(mut self, analyzers: Vec<String>) -> Self {
        self.analyzers = analyzers;
        self
    }

    /// Sets the `Unknown` status policy.
    #[must_use]
    pub const fn with_unknown_status_policy(mut self, policy: UnknownStatusPolicy) -> Self {
        self.unknown_status_policy = policy;
        self
    }

    /// Returns true if steps run one at a time.
    #[must_use]
    pub const fn is_serial(&self) -> bool {
        self.parallel <= 1
    }
}

impl fmt::Display for UnknownStatusPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RequireError => "require_error",
            Self::AlwaysCorrupt => "always_corrupt",
        };
        write!(f, "{s}")
    }
}
