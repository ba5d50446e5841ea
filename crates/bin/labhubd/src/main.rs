//! # labhubd — labhub daemon
//!
//! Composition root that assembles the device tree and runs it.
//!
//! ## Responsibilities
//! - Parse configuration (config file, env vars)
//! - Install the tracing subscriber
//! - Build the root hub and install the simulated lab into it
//! - Start the tree, log every bus message, stop it on Ctrl-C
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer — no device logic belongs here.

mod config;

use labhub_adapter_virtual::install_demo;
use labhub_app::{Device, DeviceHubExt, Hub, LocalDevice};
use labhub_domain::message::DeviceMessage;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.logging.filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let hub = Hub::from_core(LocalDevice::with_bus_capacity("lab", config.runtime.bus_capacity));
    if config.simulation.enabled {
        install_demo(&hub, &config.simulation_settings())?;
    }

    watch("lab".to_string(), hub.subscribe());
    for (name, device) in hub.all_devices() {
        watch(name.to_string(), device.subscribe());
    }

    hub.start().await?;
    tracing::info!(devices = hub.all_devices().len(), "labhubd running");
    hub.core().announce();
    for (name, device) in hub.all_devices() {
        let description = device.describe();
        match serde_json::to_string(&description) {
            Ok(json) => tracing::info!(device = %name, %json, "device ready"),
            Err(err) => tracing::warn!(device = %name, error = %err, "unserializable description"),
        }
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    hub.stop().await;
    tracing::info!("labhubd stopped");

    Ok(())
}

/// Log every message published on one device bus.
fn watch(device: String, mut messages: tokio::sync::broadcast::Receiver<DeviceMessage>) {
    tokio::spawn(async move {
        loop {
            match messages.recv().await {
                Ok(message) => log_message(&device, &message),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(%device, skipped, "bus watcher lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn log_message(device: &str, message: &DeviceMessage) {
    if let DeviceMessage::Error { kind, message: reason, .. } = message {
        tracing::error!(device, %kind, %reason, "device reported an error");
        return;
    }
    match serde_json::to_string(message) {
        Ok(json) => tracing::debug!(device, %json, "bus message"),
        Err(err) => tracing::warn!(device, error = %err, "unserializable bus message"),
    }
}
