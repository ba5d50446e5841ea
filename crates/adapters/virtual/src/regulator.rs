//! PID regulator — a hub steering its own inertial drive to a target.
//!
//! The regulator is a [`Hub`] whose only child is the `drive`. Its core
//! exposes `target` (writable) and `position` (the drive's, read-only) and
//! runs the control loop as a recurring job in its own scope. The derivative
//! term acts on the measured position, so moving the target never kicks the
//! output.

use std::sync::Arc;
use std::time::Duration;

use labhub_app::cell::{MutableCell, mutable};
use labhub_app::{Device, DeviceHub, Hub};
use labhub_domain::converter::native;
use labhub_domain::descriptor::{ActionDescriptor, PropertyDescriptor};
use labhub_domain::error::ControlError;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::PidParameters;
use crate::devices::{InertialDrive, delegate_device};

#[derive(Debug, Default)]
struct PidState {
    integral: f64,
    last_time: Option<Instant>,
    last_position: Option<f64>,
}

pub struct PidRegulator {
    hub: Hub,
    drive: Arc<InertialDrive>,
    target: MutableCell<f64>,
    state: Arc<Mutex<PidState>>,
}

impl PidRegulator {
    /// Build a regulator owning `drive`, installed as its `drive` child.
    ///
    /// # Errors
    ///
    /// Registration errors, which only occur on programming mistakes.
    pub fn new(id: &str, gains: PidParameters, drive: InertialDrive, step: Duration) -> Result<Self, ControlError> {
        let hub = Hub::new(id);
        let drive = hub.install_device("drive", drive)?;
        let target = mutable(0.0);
        let core = hub.core();

        core.register_property(
            PropertyDescriptor::new("target").description("Requested drive position"),
            native::<f64>(),
            target.clone(),
        )?;
        core.register_property(
            PropertyDescriptor::new("position").description("Measured drive position"),
            native::<f64>(),
            drive.position(),
        )?;

        let state = Arc::new(Mutex::new(PidState::default()));
        {
            let state = Arc::clone(&state);
            core.on_start(move |_scope| {
                let state = Arc::clone(&state);
                async move {
                    *state.lock().await = PidState::default();
                    Ok(())
                }
            });
        }
        {
            let force = drive.force();
            core.on_stop(move |_scope| {
                force.set(0.0);
                async { Ok(()) }
            });
        }
        {
            let state = Arc::clone(&state);
            let target = target.clone();
            let position = drive.position();
            let force = drive.force();
            core.every("pid", step, move || {
                let state = Arc::clone(&state);
                let target = target.clone();
                let position = position.clone();
                let force = force.clone();
                async move {
                    let mut state = state.lock().await;
                    let now = Instant::now();
                    let measured = position.get();
                    if let (Some(last_time), Some(last_position)) = (state.last_time, state.last_position) {
                        let dt = (now - last_time).as_secs_f64();
                        if dt > 0.0 {
                            let error = target.get() - measured;
                            state.integral += error * dt;
                            let derivative = (measured - last_position) / dt;
                            let output = gains.kp * error + gains.ki * state.integral - gains.kd * derivative;
                            force.set(output);
                        }
                    }
                    state.last_time = Some(now);
                    state.last_position = Some(measured);
                    Ok(())
                }
            });
        }
        {
            let state = Arc::clone(&state);
            core.register_action(
                ActionDescriptor::new("reset").description("Clear the accumulated integral"),
                native::<()>(),
                native::<()>(),
                move |()| {
                    let state = Arc::clone(&state);
                    async move {
                        state.lock().await.integral = 0.0;
                        tracing::debug!("regulator integral cleared");
                        Ok(())
                    }
                },
            )?;
        }

        Ok(Self {
            hub,
            drive,
            target,
            state,
        })
    }

    #[must_use]
    pub fn drive(&self) -> &Arc<InertialDrive> {
        &self.drive
    }

    #[must_use]
    pub fn target(&self) -> MutableCell<f64> {
        self.target.clone()
    }

    /// Integral accumulated since the last start or reset.
    pub async fn integral(&self) -> f64 {
        self.state.lock().await.integral
    }
}

delegate_device!(PidRegulator, hub);

impl DeviceHub for PidRegulator {
    fn children(&self) -> Vec<(String, Arc<dyn Device>)> {
        self.hub.children()
    }
}

#[cfg(test)]
mod tests {
    use labhub_app::DeviceHubExt;
    use labhub_domain::error::ErrorKind;
    use labhub_domain::value::Value;

    use super::*;

    const STEP: Duration = Duration::from_millis(10);

    fn regulator(gains: PidParameters) -> PidRegulator {
        let drive = InertialDrive::new("drive", 1.0, 10.0, STEP).unwrap();
        PidRegulator::new("motion", gains, drive, STEP).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn should_settle_on_target() {
        let regulator = regulator(PidParameters {
            kp: 4.0,
            ki: 0.0,
            kd: 4.0,
        });
        regulator.start().await.unwrap();

        regulator.write_property("target", Value::Float(1.0)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let position = regulator.read_property("position").await.unwrap().as_f64().unwrap();
        assert!((position - 1.0).abs() < 0.02, "position {position}");
        regulator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn should_release_force_when_stopped() {
        let regulator = regulator(PidParameters::default());
        regulator.start().await.unwrap();
        regulator.target().set(5.0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(regulator.drive().force().get().abs() > 0.0);

        regulator.stop().await;

        assert!(regulator.drive().force().get().abs() < f64::EPSILON);
        assert_eq!(regulator.drive().lifecycle_state(), labhub_domain::lifecycle::LifecycleState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn should_clear_integral_on_reset() {
        let regulator = regulator(PidParameters {
            kp: 0.0,
            ki: 1.0,
            kd: 0.0,
        });
        regulator.start().await.unwrap();
        regulator.target().set(1.0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        regulator.stop().await;
        assert!(regulator.integral().await > 0.0);

        regulator.execute("reset", Value::Null).await.unwrap();

        assert!(regulator.integral().await.abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn should_expose_drive_as_nested_child() {
        let regulator = regulator(PidParameters::default());

        regulator
            .write_child_property("drive", "force", Value::Float(3.0))
            .await
            .unwrap();
        assert!((regulator.drive().force().get() - 3.0).abs() < f64::EPSILON);

        let err = regulator
            .write_property("position", Value::Float(1.0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadOnlyProperty);
    }
}
