//! Recorded resource state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::urn::Urn;

/// Property bag of resource inputs or outputs.
pub type PropertyMap = BTreeMap<String, serde_json::Value>;

/// The state of a single resource as recorded in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Resource identity.
    pub urn: Urn,
    /// Resource type token.
    #[serde(rename = "type")]
    pub type_token: String,
    /// Whether the resource is provider-backed (custom) rather than a component.
    pub custom: bool,
    /// Provider-assigned identifier, once known.
    #[serde(default)]
    pub id: Option<String>,
    /// Input properties.
    #[serde(default)]
    pub inputs: PropertyMap,
    /// Output properties.
    #[serde(default)]
    pub outputs: PropertyMap,
    /// Reference to the provider resource managing this resource.
    #[serde(default)]
    pub provider: Option<String>,
    /// Resources this one depends on.
    #[serde(default)]
    pub dependencies: Vec<Urn>,
    /// Errors recorded when the resource last failed to initialize.
    #[serde(default)]
    pub init_errors: Vec<String>,
    /// Set when the resource has been replaced and awaits deletion.
    #[serde(default)]
    pub delete: bool,
}

/// Outcome classification of a provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// The operation completed.
    #[default]
    Ok,
    /// The operation failed after partially changing the resource.
    PartialFailure,
    /// The provider cannot tell whether the operation took effect.
    Unknown,
}

impl ResourceState {
    /// Creates a new state for a custom resource with no properties.
    #[must_use]
    pub fn new(urn: Urn) -> Self {
        let type_token = urn.type_token().to_string();
        Self {
            urn,
            type_token,
            custom: true,
            id: None,
            inputs: PropertyMap::new(),
            outputs: PropertyMap::new(),
            provider: None,
            dependencies: Vec::new(),
            init_errors: Vec::new(),
            delete: false,
        }
    }

    /// Marks the resource as a component (not provider-backed).
    #[must_use]
    pub const fn component(mut self) -> Self {
        self.custom = false;
        self
    }

    /// Sets the provider-assigned identifier.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Adds an input property.
    #[must_use]
    pub fn with_input(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }

    /// Adds an output property.
    #[must_use]
    pub fn with_output(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.outputs.insert(key.into(), value);
        self
    }

    /// Records initialization errors.
    #[must_use]
    pub fn with_init_errors(mut self, errors: Vec<String>) -> Self {
        self.init_errors = errors;
        self
    }

    /// Returns true if the resource failed to initialize last time it was deployed.
    #[must_use]
    pub fn has_init_errors(&self) -> bool {
        !self.init_errors.is_empty()
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            Self::Ok => "ok",
            Self::PartialFailure => "partial_failure",
            Self::Unknown => "unknown",
        };
        write!(f, "{status}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_takes_type_from_urn() {
        let state = ResourceState::new(Urn::new("dev", "web", "aws:s3:Bucket", "assets"));
        assert_eq!(state.type_token, "aws:s3:Bucket");
        assert!(state.custom);
        assert!(!state.has_init_errors());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let json = r#"{"urn":"urn:halldyll:dev::web::web:Site::site","type":"web:Site","custom":false}"#;
        let state: ResourceState = serde_json::from_str(json).expect("parse");
        assert!(!state.custom);
        assert!(state.outputs.is_empty());
        assert!(state.init_errors.is_empty());
        assert!(!state.delete);
    }
}
