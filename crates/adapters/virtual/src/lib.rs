//! # labhub-adapter-virtual
//!
//! Simulated devices — a small virtual lab built only from the runtime core.
//!
//! ## Responsibilities
//! - Provide ready-made devices that exercise every cell kind:
//!
//! | Device | Cells | Actions |
//! |--------|-------|---------|
//! | [`SimulatedSwitch`] | virtual `state` | `turn_on`, `turn_off`, `toggle` |
//! | [`SimulatedThermometer`] | external `celsius`, derived `fahrenheit`, constant `unit` | `calibrate` |
//! | [`InertialDrive`] | clamped `force`, read-only `position` / `velocity` | — |
//! | [`LimitSwitch`] | derived `locked` | — |
//! | [`PidRegulator`] | `target`, read-only `position`, child `drive` | `reset` |
//!
//! - Assemble them into one hub with [`demo_hub`] / [`install_demo`]
//!
//! ## Dependency rule
//! Depends on `labhub-app` and `labhub-domain`. Never imported by them.

use std::time::Duration;

use labhub_app::{Device, Hub};
use labhub_app::cell::timer;
use labhub_domain::converter::native;
use labhub_domain::descriptor::PropertyDescriptor;
use labhub_domain::error::ControlError;
use labhub_domain::time::Timestamp;

pub mod devices;
pub mod regulator;

pub use devices::{Boundary, InertialDrive, LimitSwitch, SimulatedSwitch, SimulatedThermometer};
pub use regulator::PidRegulator;

/// Proportional, integral and derivative gains.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidParameters {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Default for PidParameters {
    fn default() -> Self {
        Self {
            kp: 4.0,
            ki: 0.1,
            kd: 4.0,
        }
    }
}

/// Knobs of the simulated lab.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationSettings {
    /// How often the thermometer probe is read.
    pub poll_interval: Duration,
    pub physics_step: Duration,
    pub pid_step: Duration,
    pub gains: PidParameters,
    pub mass: f64,
    /// Bound of the drive force, in both directions.
    pub drive_limit: f64,
    /// Position at which the limit switch locks.
    pub travel_limit: f64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            physics_step: Duration::from_millis(10),
            pid_step: Duration::from_millis(10),
            gains: PidParameters::default(),
            mass: 1.0,
            drive_limit: 10.0,
            travel_limit: 10.0,
        }
    }
}

/// Build the demo lab: `switch`, `thermometer`, `motion` (with its nested
/// `drive`) and `limit`, plus a `time` property on the hub itself.
///
/// # Errors
///
/// Registration errors, which only occur on programming mistakes.
pub fn demo_hub(settings: &SimulationSettings) -> Result<Hub, ControlError> {
    let hub = Hub::new("lab");
    install_demo(&hub, settings)?;
    Ok(hub)
}

/// Populate an existing hub with the demo devices.
///
/// # Errors
///
/// [`ControlError::DuplicateName`] or [`ControlError::DuplicateChildName`]
/// when `hub` already holds one of the demo names.
pub fn install_demo(hub: &Hub, settings: &SimulationSettings) -> Result<(), ControlError> {
    hub.core().register_property::<Timestamp>(
        PropertyDescriptor::new("time").description("Wall clock of the lab"),
        native(),
        timer(Duration::from_secs(1)),
    )?;

    hub.install_device("switch", SimulatedSwitch::new("switch")?)?;
    hub.install_device(
        "thermometer",
        SimulatedThermometer::new("thermometer", settings.poll_interval)?,
    )?;

    let drive = InertialDrive::new("drive", settings.mass, settings.drive_limit, settings.physics_step)?;
    let motion = hub.install_device(
        "motion",
        PidRegulator::new("motion", settings.gains, drive, settings.pid_step)?,
    )?;

    let position = motion.drive().position();
    hub.install_device(
        "limit",
        LimitSwitch::new("limit", position, settings.travel_limit, Boundary::Upper)?,
    )?;

    tracing::debug!(hub = hub.core().id(), "demo devices installed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use labhub_app::{DeviceHub, DeviceHubExt};
    use labhub_domain::lifecycle::LifecycleState;
    use labhub_domain::value::Value;

    use super::*;

    #[tokio::test]
    async fn should_refuse_installing_demo_twice() {
        let hub = demo_hub(&SimulationSettings::default()).unwrap();
        let err = install_demo(&hub, &SimulationSettings::default()).unwrap_err();
        assert!(matches!(err, ControlError::DuplicateName(name) if name == "time"));
    }

    #[tokio::test]
    async fn should_list_every_demo_device() {
        let hub = demo_hub(&SimulationSettings::default()).unwrap();

        let names: Vec<String> = hub
            .all_devices()
            .into_iter()
            .map(|(name, _)| name.to_string())
            .collect();

        assert_eq!(names, vec!["switch", "thermometer", "motion", "motion.drive", "limit"]);
    }

    #[tokio::test(start_paused = true)]
    async fn should_start_and_stop_the_whole_tree() {
        let hub = demo_hub(&SimulationSettings::default()).unwrap();
        hub.start().await.unwrap();

        for (name, device) in hub.all_devices() {
            assert_eq!(device.lifecycle_state(), LifecycleState::Started, "{name}");
        }

        hub.stop().await;
        for (name, device) in hub.all_devices() {
            assert_eq!(device.lifecycle_state(), LifecycleState::Stopped, "{name}");
        }
        assert_eq!(hub.children().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn should_lock_limit_when_motion_overshoots_travel() {
        let settings = SimulationSettings {
            travel_limit: 1.0,
            ..SimulationSettings::default()
        };
        let hub = demo_hub(&settings).unwrap();
        hub.start().await.unwrap();
        assert_eq!(
            hub.read_child_property("limit", "locked").await.unwrap(),
            Value::Bool(false)
        );

        hub.write_child_property("motion", "target", Value::Float(2.0))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(
            hub.read_child_property("limit", "locked").await.unwrap(),
            Value::Bool(true)
        );
        hub.stop().await;
    }
}
