//! Resource identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Type token prefix shared by every provider resource.
pub const PROVIDER_TYPE_PREFIX: &str = "halldyll:providers:";

/// Name prefix given to providers the engine bootstraps on its own.
pub const DEFAULT_PROVIDER_PREFIX: &str = "default";

/// Scheme prefix of every URN.
const URN_PREFIX: &str = "urn:halldyll:";

/// Separator between URN components.
const URN_SEPARATOR: &str = "::";

/// Globally unique identity of a resource within an update.
///
/// The canonical form is `urn:halldyll:<stack>::<project>::<type>::<name>`.
/// Values that do not follow it are still accepted; the accessors then fall
/// back to treating the whole string as the name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Urn(String);

impl Urn {
    /// Builds a URN from its components.
    #[must_use]
    pub fn new(stack: &str, project: &str, type_token: &str, name: &str) -> Self {
        Self(format!(
            "{URN_PREFIX}{stack}{URN_SEPARATOR}{project}{URN_SEPARATOR}{type_token}{URN_SEPARATOR}{name}"
        ))
    }

    /// Returns the URN as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the components after the scheme prefix, if well-formed.
    fn components(&self) -> Option<Vec<&str>> {
        let rest = self.0.strip_prefix(URN_PREFIX)?;
        let parts: Vec<&str> = rest.splitn(4, URN_SEPARATOR).collect();
        (parts.len() == 4).then_some(parts)
    }

    /// Returns the resource type token (e.g. `aws:s3:Bucket`).
    #[must_use]
    pub fn type_token(&self) -> &str {
        self.components().map_or("", |parts| parts[2])
    }

    /// Returns the resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.components().map_or(self.0.as_str(), |parts| parts[3])
    }

    /// Returns true if this URN names a provider resource.
    #[must_use]
    pub fn is_provider(&self) -> bool {
        self.type_token().starts_with(PROVIDER_TYPE_PREFIX)
    }

    /// Returns true if this URN names a provider the engine created itself
    /// rather than one the program asked for.
    #[must_use]
    pub fn is_default_provider(&self) -> bool {
        self.is_provider() && self.name().starts_with(DEFAULT_PROVIDER_PREFIX)
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Urn {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Urn {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for Urn {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
