//! Device messages — the events a device publishes on its bus.
//!
//! Messages are immutable records. Transports forward them; the runtime never
//! caches them. A `Description` is always built from the live registries at
//! the time it is requested.

use serde::{Deserialize, Serialize};

use crate::descriptor::{ActionDescriptor, PropertyDescriptor};
use crate::error::{ErrorInfo, ErrorKind};
use crate::id::RequestId;
use crate::lifecycle::LifecycleState;
use crate::time::{Timestamp, now};
use crate::value::Value;

/// A message published on a device bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceMessage {
    /// The encoded value of a registered property changed.
    PropertyChanged {
        property: String,
        value: Value,
        time: Timestamp,
    },
    /// The device moved to a new lifecycle state.
    LifecycleChanged {
        state: LifecycleState,
        time: Timestamp,
    },
    /// Outcome of an action invoked with a request id.
    ActionResult {
        action: String,
        request_id: RequestId,
        result: Result<Value, ErrorInfo>,
        time: Timestamp,
    },
    /// A failure contained by the device supervisor.
    Error {
        kind: ErrorKind,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        trace: Option<String>,
        time: Timestamp,
    },
    /// Live snapshot of the device registries.
    Description {
        properties: Vec<PropertyDescriptor>,
        actions: Vec<ActionDescriptor>,
        time: Timestamp,
    },
}

impl DeviceMessage {
    #[must_use]
    pub fn property_changed(property: impl Into<String>, value: Value) -> Self {
        Self::PropertyChanged {
            property: property.into(),
            value,
            time: now(),
        }
    }

    #[must_use]
    pub fn lifecycle_changed(state: LifecycleState) -> Self {
        Self::LifecycleChanged { state, time: now() }
    }

    #[must_use]
    pub fn action_result(
        action: impl Into<String>,
        request_id: RequestId,
        result: Result<Value, ErrorInfo>,
    ) -> Self {
        Self::ActionResult {
            action: action.into(),
            request_id,
            result,
            time: now(),
        }
    }

    #[must_use]
    pub fn error(info: ErrorInfo) -> Self {
        Self::Error {
            kind: info.kind,
            message: info.message,
            trace: info.trace,
            time: now(),
        }
    }

    #[must_use]
    pub fn description(properties: Vec<PropertyDescriptor>, actions: Vec<ActionDescriptor>) -> Self {
        Self::Description {
            properties,
            actions,
            time: now(),
        }
    }

    /// When the message was produced.
    #[must_use]
    pub fn time(&self) -> Timestamp {
        match self {
            Self::PropertyChanged { time, .. }
            | Self::LifecycleChanged { time, .. }
            | Self::ActionResult { time, .. }
            | Self::Error { time, .. }
            | Self::Description { time, .. } => *time,
        }
    }

    /// Name of the property when this is a `PropertyChanged` message.
    #[must_use]
    pub fn property(&self) -> Option<&str> {
        match self {
            Self::PropertyChanged { property, .. } => Some(property),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}
