//! Static metadata about properties and actions.
//!
//! Descriptors travel inside `Description` messages so that remote peers can
//! discover what a device exposes.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Metadata of a registered property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether `write_property` is accepted. Forced by the registry from the
    /// mutability of the backing cell.
    pub writable: bool,
    /// Free-form hints (units, ranges, display format).
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

impl PropertyDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            writable: false,
            metadata: Value::Null,
        }
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    #[must_use]
    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Metadata of a registered action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Hint describing the expected argument.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub input: Value,
    /// Hint describing the produced result.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub output: Value,
}

impl ActionDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input: Value::Null,
            output: Value::Null,
        }
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    #[must_use]
    pub fn output(mut self, output: Value) -> Self {
        self.output = output;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_default_to_read_only() {
        let descriptor = PropertyDescriptor::new("position");
        assert!(!descriptor.writable);
        assert!(descriptor.metadata.is_null());
    }

    #[test]
    fn should_chain_builder_setters() {
        let descriptor = PropertyDescriptor::new("target")
            .description("Set point of the regulator")
            .writable(true)
            .metadata(Value::object([("unit", Value::from("mm"))]));
        assert_eq!(descriptor.description.as_deref(), Some("Set point of the regulator"));
        assert!(descriptor.writable);
        assert_eq!(descriptor.metadata.get("unit"), Some(&Value::from("mm")));
    }

    #[test]
    fn should_skip_empty_hints_when_serializing() {
        let json = serde_json::to_value(ActionDescriptor::new("home")).unwrap();
        assert_eq!(json, serde_json::json!({ "name": "home" }));
    }
}
