//! Device lifecycle state machine.
//!
//! ```text
//! STOPPED ──start──► STARTING ──setup ok──► STARTED ──stop──► STOPPING ──► STOPPED
//!                        │
//!                        └──setup failed──► STOPPED
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    #[default]
    Stopped,
    Starting,
    Started,
    Stopping,
}

impl LifecycleState {
    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Stopped, Self::Starting)
                | (Self::Starting, Self::Started | Self::Stopped)
                | (Self::Started, Self::Stopping)
                | (Self::Stopping, Self::Stopped)
        )
    }

    /// `STARTING` or `STARTED`: the device scope is open.
    #[must_use]
    pub fn is_running(self) -> bool {
        matches!(self, Self::Starting | Self::Started)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "STOPPED",
            Self::Starting => "STARTING",
            Self::Started => "STARTED",
            Self::Stopping => "STOPPING",
        };
        f.write_str(s)
    }
}
