//! Limit switch — trips when a watched position crosses a threshold.

use labhub_app::LocalDevice;
use labhub_app::cell::{Cell, map};
use labhub_domain::converter::native;
use labhub_domain::descriptor::PropertyDescriptor;
use labhub_domain::error::ControlError;
use labhub_domain::value::Value;

use super::delegate_device;

/// Which side of the threshold locks the switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// Locked at or above the threshold.
    Upper,
    /// Locked at or below the threshold.
    Lower,
}

impl Boundary {
    #[must_use]
    pub fn reached(self, position: f64, threshold: f64) -> bool {
        match self {
            Self::Upper => position >= threshold,
            Self::Lower => position <= threshold,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Upper => "upper",
            Self::Lower => "lower",
        }
    }
}

pub struct LimitSwitch {
    device: LocalDevice,
    locked: Cell<bool>,
}

impl LimitSwitch {
    /// Watch `position` and lock once it reaches `threshold` on `boundary`.
    ///
    /// # Errors
    ///
    /// Registration errors, which only occur on programming mistakes.
    pub fn new(id: &str, position: Cell<f64>, threshold: f64, boundary: Boundary) -> Result<Self, ControlError> {
        let device = LocalDevice::new(id);
        let locked = map(position, move |position: &f64| boundary.reached(*position, threshold));
        device.register_property(
            PropertyDescriptor::new("locked")
                .description("True while the watched position is past the threshold")
                .metadata(Value::object([
                    ("threshold", Value::from(threshold)),
                    ("boundary", Value::from(boundary.as_str())),
                ])),
            native::<bool>(),
            locked.clone(),
        )?;
        Ok(Self { device, locked })
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.get()
    }
}

delegate_device!(LimitSwitch, device);
