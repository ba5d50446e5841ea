//! Error taxonomy shared by every layer of the runtime.
//!
//! [`ControlError`] is what synchronous calls (`read_property`,
//! `write_property`, `execute`, registrations) return. [`ErrorKind`] and
//! [`ErrorInfo`] are the transportable mirror used inside device messages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Failure to map between a native type and a [`Value`](crate::value::Value).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("expected {expected}, found {found}")]
pub struct ConversionError {
    /// Human readable description of the expected shape.
    pub expected: &'static str,
    /// Short rendering of what was actually received.
    pub found: String,
}

impl ConversionError {
    #[must_use]
    pub fn new(expected: &'static str, found: impl fmt::Display) -> Self {
        Self {
            expected,
            found: found.to_string(),
        }
    }
}

/// Errors returned by device, hub and registry operations.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// A property or action with this name is already registered.
    #[error("name `{0}` is already registered")]
    DuplicateName(String),

    /// A child device with this name is already installed in the hub.
    #[error("child device `{0}` is already installed")]
    DuplicateChildName(String),

    #[error("property `{0}` not found")]
    PropertyNotFound(String),

    #[error("action `{0}` not found")]
    ActionNotFound(String),

    #[error("device `{0}` not found")]
    DeviceNotFound(String),

    /// The property is backed by a read-only cell.
    #[error("property `{0}` is read-only")]
    ReadOnlyProperty(String),

    /// A device name could not be parsed.
    #[error("invalid device name `{0}`")]
    InvalidName(String),

    #[error("value conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    /// Uncaught failure raised by user logic (action body, hook, reader).
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ControlError {
    /// The taxonomy bucket of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateName(_) | Self::DuplicateChildName(_) => ErrorKind::DuplicateName,
            Self::PropertyNotFound(_) => ErrorKind::PropertyNotFound,
            Self::ActionNotFound(_) => ErrorKind::ActionNotFound,
            Self::DeviceNotFound(_) | Self::InvalidName(_) => ErrorKind::DeviceNotFound,
            Self::ReadOnlyProperty(_) => ErrorKind::ReadOnlyProperty,
            Self::Conversion(_) => ErrorKind::ConversionFailure,
            Self::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// Build the transportable form of this error.
    #[must_use]
    pub fn to_info(&self) -> ErrorInfo {
        let trace = match self {
            Self::Internal(err) => Some(format!("{err:?}")),
            _ => None,
        };
        ErrorInfo {
            kind: self.kind(),
            message: self.to_string(),
            trace,
        }
    }
}

/// Serializable mirror of the error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DuplicateName,
    PropertyNotFound,
    ActionNotFound,
    DeviceNotFound,
    ReadOnlyProperty,
    ConversionFailure,
    InternalError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DuplicateName => "duplicate_name",
            Self::PropertyNotFound => "property_not_found",
            Self::ActionNotFound => "action_not_found",
            Self::DeviceNotFound => "device_not_found",
            Self::ReadOnlyProperty => "read_only_property",
            Self::ConversionFailure => "conversion_failure",
            Self::InternalError => "internal_error",
        };
        f.write_str(s)
    }
}

/// An error as it travels inside a device message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl ErrorInfo {
    /// Describe a failure raised by background user logic.
    #[must_use]
    pub fn internal(err: &anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::InternalError,
            message: err.to_string(),
            trace: Some(format!("{err:?}")),
        }
    }
}

impl From<&ControlError> for ErrorInfo {
    fn from(err: &ControlError) -> Self {
        err.to_info()
    }
}
