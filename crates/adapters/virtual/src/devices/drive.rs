//! Inertial drive — a point mass pushed by a bounded force.
//!
//! The drive integrates `force / mass` every physics step (semi-implicit
//! Euler). `force` is the only writable property; `position` and `velocity`
//! are owned by the physics loop and exposed read-only.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use labhub_app::LocalDevice;
use labhub_app::cell::{Cell, ClampedCell, MutableCell, clamped, mutable};
use labhub_domain::converter::native;
use labhub_domain::descriptor::PropertyDescriptor;
use labhub_domain::error::ControlError;
use labhub_domain::value::Value;
use tokio::time::Instant;

use super::delegate_device;

#[derive(Debug, Default)]
struct Motion {
    last: Option<Instant>,
}

pub struct InertialDrive {
    device: LocalDevice,
    force: Arc<ClampedCell>,
    position: MutableCell<f64>,
    velocity: MutableCell<f64>,
}

impl InertialDrive {
    /// Build a drive of `mass` whose force is clamped to `±force_limit`.
    ///
    /// # Errors
    ///
    /// Registration errors, which only occur on programming mistakes.
    pub fn new(id: &str, mass: f64, force_limit: f64, step: Duration) -> Result<Self, ControlError> {
        let device = LocalDevice::new(id);
        let limit = force_limit.abs();
        let force = clamped(0.0, -limit..=limit);
        let position = mutable(0.0);
        let velocity = mutable(0.0);

        device.register_property(
            PropertyDescriptor::new("force")
                .description("Applied force")
                .metadata(Value::object([("min", Value::from(-limit)), ("max", Value::from(limit))])),
            native::<f64>(),
            force.handle(),
        )?;
        device.register_property(
            PropertyDescriptor::new("position"),
            native::<f64>(),
            Arc::clone(&position) as Cell<f64>,
        )?;
        device.register_property(
            PropertyDescriptor::new("velocity"),
            native::<f64>(),
            Arc::clone(&velocity) as Cell<f64>,
        )?;

        let motion = Arc::new(Mutex::new(Motion::default()));
        {
            // a new run must not integrate the time spent stopped
            let motion = Arc::clone(&motion);
            device.launch_on_start("reset motion", move |_scope| {
                motion.lock().unwrap_or_else(PoisonError::into_inner).last = None;
            });
        }
        {
            let motion = Arc::clone(&motion);
            let force = force.handle();
            let position = Arc::clone(&position);
            let velocity = Arc::clone(&velocity);
            device.every("physics", step, move || {
                let now = Instant::now();
                let dt = {
                    let mut motion = motion.lock().unwrap_or_else(PoisonError::into_inner);
                    let dt = motion.last.map_or(0.0, |last| (now - last).as_secs_f64());
                    motion.last = Some(now);
                    dt
                };
                if dt > 0.0 {
                    let acceleration = force.get() / mass;
                    let v = velocity.get() + acceleration * dt;
                    velocity.set(v);
                    position.set(position.get() + v * dt);
                }
                async { Ok(()) }
            });
        }

        Ok(Self {
            device,
            force,
            position,
            velocity,
        })
    }

    #[must_use]
    pub fn force(&self) -> MutableCell<f64> {
        self.force.handle()
    }

    #[must_use]
    pub fn position(&self) -> Cell<f64> {
        Arc::clone(&self.position) as Cell<f64>
    }

    #[must_use]
    pub fn velocity(&self) -> Cell<f64> {
        Arc::clone(&self.velocity) as Cell<f64>
    }
}

delegate_device!(InertialDrive, device);
