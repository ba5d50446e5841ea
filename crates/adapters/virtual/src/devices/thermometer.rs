//! Simulated thermometer — a probe polled on an interval.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use labhub_app::LocalDevice;
use labhub_app::cell::{Cell, constant, external, map};
use labhub_domain::converter::native;
use labhub_domain::descriptor::{ActionDescriptor, PropertyDescriptor};
use labhub_domain::error::ControlError;
use labhub_domain::value::Value;
use tokio::time::Instant;

use super::delegate_device;

const AMBIENT_CELSIUS: f64 = 21.5;
const SWING_CELSIUS: f64 = 0.5;

/// Probe drifting slowly around room temperature.
#[derive(Debug)]
struct Probe {
    origin: Instant,
    offset: Mutex<f64>,
}

impl Probe {
    fn sample(&self) -> f64 {
        let elapsed = self.origin.elapsed().as_secs_f64();
        let offset = *self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        AMBIENT_CELSIUS + SWING_CELSIUS * (elapsed / 60.0).sin() + offset
    }
}

/// Thermometer exposing `celsius`, `fahrenheit` and `unit`.
pub struct SimulatedThermometer {
    device: LocalDevice,
    celsius: Cell<f64>,
}

impl SimulatedThermometer {
    /// Build a thermometer reading its probe every `poll_interval`.
    ///
    /// # Errors
    ///
    /// Registration errors, which only occur on programming mistakes.
    pub fn new(id: &str, poll_interval: Duration) -> Result<Self, ControlError> {
        let device = LocalDevice::new(id);
        let probe = Arc::new(Probe {
            origin: Instant::now(),
            offset: Mutex::new(0.0),
        });

        let reading = Arc::clone(&probe);
        let celsius = external(poll_interval, probe.sample(), move || {
            let sample = reading.sample();
            async move { Ok(sample) }
        });
        device.register_property(
            PropertyDescriptor::new("celsius")
                .description("Probe temperature")
                .metadata(Value::object([("unit", Value::from("\u{b0}C"))])),
            native::<f64>(),
            Arc::clone(&celsius),
        )?;
        device.register_property(
            PropertyDescriptor::new("fahrenheit").description("Probe temperature in Fahrenheit"),
            native::<f64>(),
            map(Arc::clone(&celsius), |c: &f64| c * 9.0 / 5.0 + 32.0),
        )?;
        device.register_property(
            PropertyDescriptor::new("unit"),
            native::<String>(),
            constant("\u{b0}C".to_string()),
        )?;

        let calibration = Arc::clone(&probe);
        device.register_action(
            ActionDescriptor::new("calibrate").description("Set the probe offset in degrees"),
            native::<f64>(),
            native::<()>(),
            move |offset: f64| {
                let probe = Arc::clone(&calibration);
                async move {
                    anyhow::ensure!(offset.is_finite(), "offset must be finite, got {offset}");
                    *probe.offset.lock().unwrap_or_else(PoisonError::into_inner) = offset;
                    tracing::info!(offset, "thermometer calibrated");
                    Ok(())
                }
            },
        )?;

        Ok(Self { device, celsius })
    }

    #[must_use]
    pub fn celsius(&self) -> Cell<f64> {
        Arc::clone(&self.celsius)
    }
}

delegate_device!(SimulatedThermometer, device);

#[cfg(test)]
mod tests {
    use labhub_app::Device;
    use labhub_domain::error::ErrorKind;

    use super::*;

    #[tokio::test]
    async fn should_report_unit_and_derived_fahrenheit() {
        let thermometer = SimulatedThermometer::new("t", Duration::from_secs(1)).unwrap();

        let unit = thermometer.read_property("unit").await.unwrap();
        assert_eq!(unit, Value::from("\u{b0}C"));

        let celsius = thermometer.read_property("celsius").await.unwrap().as_f64().unwrap();
        let fahrenheit = thermometer.read_property("fahrenheit").await.unwrap().as_f64().unwrap();
        assert!((fahrenheit - (celsius * 9.0 / 5.0 + 32.0)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn should_reject_writes_to_polled_temperature() {
        let thermometer = SimulatedThermometer::new("t", Duration::from_secs(1)).unwrap();
        let err = thermometer
            .write_property("celsius", Value::Float(100.0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadOnlyProperty);
    }

    #[tokio::test(start_paused = true)]
    async fn should_apply_calibration_on_next_poll() {
        let thermometer = SimulatedThermometer::new("t", Duration::from_millis(100)).unwrap();
        thermometer.start().await.unwrap();
        let before = thermometer.celsius().get();

        thermometer.execute("calibrate", Value::Float(10.0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        let after = thermometer.celsius().get();
        assert!(after - before > 9.0, "before {before}, after {after}");
        thermometer.stop().await;
    }

    #[tokio::test]
    async fn should_refuse_non_finite_calibration() {
        let thermometer = SimulatedThermometer::new("t", Duration::from_secs(1)).unwrap();
        let err = thermometer
            .execute("calibrate", Value::Float(f64::NAN))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InternalError);
    }
}
