//! Configuration loading — TOML file with environment variable overrides.
//!
//! Looks for `labhub.toml` in the working directory. Every field has a
//! sensible default so the file is optional. Environment variables take
//! precedence over file values.

use std::time::Duration;

use labhub_adapter_virtual::{PidParameters, SimulationSettings};
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Device runtime settings.
    pub runtime: RuntimeConfig,
    /// Simulated lab settings.
    pub simulation: SimulationConfig,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// Device runtime configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Ring size of the root hub message bus.
    pub bus_capacity: usize,
}

/// Simulated lab configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Install the simulated devices.
    pub enabled: bool,
    pub poll_interval_ms: u64,
    pub physics_step_ms: u64,
    pub pid_step_ms: u64,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub mass: f64,
    pub drive_limit: f64,
    pub travel_limit: f64,
}

impl Config {
    /// Load configuration from `labhub.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// resulting configuration is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("labhub.toml")?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("LABHUB_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("RUST_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("LABHUB_BUS_CAPACITY")
            && let Ok(capacity) = val.parse()
        {
            self.runtime.bus_capacity = capacity;
        }
        if let Some(val) = var("LABHUB_POLL_INTERVAL_MS")
            && let Ok(interval) = val.parse()
        {
            self.simulation.poll_interval_ms = interval;
        }
        if let Some(val) = var("LABHUB_SIMULATION")
            && let Ok(enabled) = val.parse()
        {
            self.simulation.enabled = enabled;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.runtime.bus_capacity == 0 {
            return Err(ConfigError::Validation("bus_capacity must be non-zero".to_string()));
        }
        let simulation = &self.simulation;
        for (name, value) in [
            ("poll_interval_ms", simulation.poll_interval_ms),
            ("physics_step_ms", simulation.physics_step_ms),
            ("pid_step_ms", simulation.pid_step_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Validation(format!("{name} must be non-zero")));
            }
        }
        for (name, value) in [
            ("kp", simulation.kp),
            ("ki", simulation.ki),
            ("kd", simulation.kd),
            ("travel_limit", simulation.travel_limit),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::Validation(format!("{name} must be finite")));
            }
        }
        if !(simulation.mass.is_finite() && simulation.mass > 0.0) {
            return Err(ConfigError::Validation("mass must be positive".to_string()));
        }
        if !(simulation.drive_limit.is_finite() && simulation.drive_limit > 0.0) {
            return Err(ConfigError::Validation("drive_limit must be positive".to_string()));
        }
        Ok(())
    }

    /// Settings handed to the simulated lab.
    #[must_use]
    pub fn simulation_settings(&self) -> SimulationSettings {
        let simulation = &self.simulation;
        SimulationSettings {
            poll_interval: Duration::from_millis(simulation.poll_interval_ms),
            physics_step: Duration::from_millis(simulation.physics_step_ms),
            pid_step: Duration::from_millis(simulation.pid_step_ms),
            gains: PidParameters {
                kp: simulation.kp,
                ki: simulation.ki,
                kd: simulation.kd,
            },
            mass: simulation.mass,
            drive_limit: simulation.drive_limit,
            travel_limit: simulation.travel_limit,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "labhubd=info,labhub=info".to_string(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { bus_capacity: 256 }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let settings = SimulationSettings::default();
        Self {
            enabled: true,
            poll_interval_ms: 500,
            physics_step_ms: 10,
            pid_step_ms: 10,
            kp: settings.gains.kp,
            ki: settings.gains.ki,
            kd: settings.gains.kd,
            mass: settings.mass,
            drive_limit: settings.drive_limit,
            travel_limit: settings.travel_limit,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn should_produce_sensible_defaults() {
        let config = Config::default();
        assert_eq!(config.runtime.bus_capacity, 256);
        assert!(config.simulation.enabled);
        assert_eq!(config.simulation.poll_interval_ms, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn should_match_library_defaults() {
        let config = Config::default();
        assert_eq!(config.simulation_settings(), SimulationSettings::default());
    }

    #[test]
    fn should_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.runtime.bus_capacity, 256);
    }

    #[test]
    fn should_parse_full_toml() {
        let toml = "
            [logging]
            filter = 'debug'

            [runtime]
            bus_capacity = 32

            [simulation]
            enabled = false
            poll_interval_ms = 250
            physics_step_ms = 5
            pid_step_ms = 20
            kp = 2.0
            ki = 0.0
            kd = 1.5
            mass = 3.0
            drive_limit = 4.0
            travel_limit = 8.0
        ";
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.logging.filter, "debug");
        assert_eq!(config.runtime.bus_capacity, 32);
        assert!(!config.simulation.enabled);

        let settings = config.simulation_settings();
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.physics_step, Duration::from_millis(5));
        assert_eq!(settings.pid_step, Duration::from_millis(20));
        assert_eq!(
            settings.gains,
            PidParameters {
                kp: 2.0,
                ki: 0.0,
                kd: 1.5
            }
        );
    }

    #[test]
    fn should_parse_partial_toml_with_defaults() {
        let toml = "
            [simulation]
            kp = 8.0
        ";
        let config: Config = toml::from_str(toml).unwrap();
        assert!((config.simulation.kp - 8.0).abs() < f64::EPSILON);
        assert_eq!(config.simulation.pid_step_ms, 10);
        assert!(config.simulation.enabled);
    }

    #[test]
    fn should_return_default_when_file_not_found() {
        let config = Config::from_file("nonexistent.toml").unwrap();
        assert_eq!(config.runtime.bus_capacity, 256);
    }

    #[test]
    fn should_report_parse_error_for_invalid_toml() {
        let result: Result<Config, _> = toml::from_str("invalid {{{");
        assert!(result.is_err());
    }

    #[test]
    fn should_prefer_rust_log_over_labhub_log() {
        let mut config = Config::default();
        config.apply_env_overrides(env(&[("LABHUB_LOG", "warn"), ("RUST_LOG", "trace")]));
        assert_eq!(config.logging.filter, "trace");
    }

    #[test]
    fn should_apply_runtime_and_simulation_overrides() {
        let mut config = Config::default();
        config.apply_env_overrides(env(&[
            ("LABHUB_BUS_CAPACITY", "64"),
            ("LABHUB_POLL_INTERVAL_MS", "100"),
            ("LABHUB_SIMULATION", "false"),
        ]));
        assert_eq!(config.runtime.bus_capacity, 64);
        assert_eq!(config.simulation.poll_interval_ms, 100);
        assert!(!config.simulation.enabled);
    }

    #[test]
    fn should_ignore_unparsable_overrides() {
        let mut config = Config::default();
        config.apply_env_overrides(env(&[("LABHUB_BUS_CAPACITY", "lots")]));
        assert_eq!(config.runtime.bus_capacity, 256);
    }

    #[test]
    fn should_reject_zero_bus_capacity() {
        let mut config = Config::default();
        config.runtime.bus_capacity = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn should_reject_zero_intervals() {
        let mut config = Config::default();
        config.simulation.physics_step_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("physics_step_ms"));
    }

    #[test]
    fn should_reject_non_finite_gain() {
        let mut config = Config::default();
        config.simulation.kd = f64::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_reject_non_positive_mass() {
        let mut config = Config::default();
        config.simulation.mass = 0.0;
        assert!(config.validate().is_err());
    }
}
