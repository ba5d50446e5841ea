//! End-to-end tests for the full labhubd device tree.
//!
//! Each test builds the complete simulated lab (root hub, every simulated
//! device, the nested regulator) the same way the daemon does and drives it
//! through the hub's dotted-path API only.

use std::sync::Arc;
use std::time::Duration;

use labhub_adapter_virtual::{SimulationSettings, install_demo};
use labhub_app::{Device, DeviceHubExt, Hub, LocalDevice};
use labhub_domain::error::ErrorKind;
use labhub_domain::lifecycle::LifecycleState;
use labhub_domain::message::DeviceMessage;
use labhub_domain::name::DeviceName;
use labhub_domain::value::Value;
use tokio::sync::broadcast;

fn lab(settings: &SimulationSettings) -> Hub {
    let hub = Hub::from_core(LocalDevice::with_bus_capacity("lab", 64));
    install_demo(&hub, settings).expect("demo devices should install");
    hub
}

fn device(hub: &Hub, path: &str) -> Arc<dyn Device> {
    hub.find(&DeviceName::parse(path).unwrap()).unwrap()
}

async fn next_change(rx: &mut broadcast::Receiver<DeviceMessage>, property: &str) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(DeviceMessage::PropertyChanged { property: name, value, .. }) = rx.recv().await
                && name == property
            {
                return value;
            }
        }
    })
    .await
    .expect("property change should be published")
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn should_run_every_device_between_start_and_stop() {
    let hub = lab(&SimulationSettings::default());
    let mut rx = hub.subscribe();

    hub.start().await.unwrap();
    assert!(
        hub.all_devices()
            .iter()
            .all(|(_, device)| device.lifecycle_state() == LifecycleState::Started)
    );

    hub.stop().await;
    assert!(
        hub.all_devices()
            .iter()
            .all(|(_, device)| device.lifecycle_state() == LifecycleState::Stopped)
    );

    let mut states = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let DeviceMessage::LifecycleChanged { state, .. } = message {
            states.push(state);
        }
    }
    assert_eq!(
        states,
        vec![
            LifecycleState::Starting,
            LifecycleState::Started,
            LifecycleState::Stopping,
            LifecycleState::Stopped,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn should_survive_restart() {
    let hub = lab(&SimulationSettings::default());
    hub.start().await.unwrap();
    hub.stop().await;

    hub.start().await.unwrap();

    assert_eq!(device(&hub, "motion.drive").lifecycle_state(), LifecycleState::Started);
    hub.stop().await;
}

// ---------------------------------------------------------------------------
// Properties and actions through the hub
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn should_publish_switch_changes_on_its_bus() {
    let hub = lab(&SimulationSettings::default());
    hub.start().await.unwrap();
    let mut rx = device(&hub, "switch").subscribe();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let result = hub.execute_on_child("switch", "toggle", Value::Null).await.unwrap();

    assert_eq!(result, Value::Bool(true));
    assert_eq!(next_change(&mut rx, "state").await, Value::Bool(true));
    assert_eq!(
        hub.read_child_property("switch", "state").await.unwrap(),
        Value::Bool(true)
    );
    hub.stop().await;
}

#[tokio::test(start_paused = true)]
async fn should_poll_thermometer_while_running() {
    let settings = SimulationSettings {
        poll_interval: Duration::from_millis(100),
        ..SimulationSettings::default()
    };
    let hub = lab(&settings);
    hub.start().await.unwrap();
    let mut rx = device(&hub, "thermometer").subscribe();

    hub.execute_on_child("thermometer", "calibrate", Value::Float(5.0))
        .await
        .unwrap();
    let celsius = next_change(&mut rx, "celsius").await.as_f64().unwrap();

    assert!(celsius > 25.0, "celsius {celsius}");
    hub.stop().await;
}

#[tokio::test(start_paused = true)]
async fn should_steer_nested_drive_to_target() {
    let hub = lab(&SimulationSettings::default());
    hub.start().await.unwrap();

    hub.write_child_property("motion", "target", Value::Float(3.0))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(20)).await;

    let position = hub
        .read_child_property("motion.drive", "position")
        .await
        .unwrap()
        .as_f64()
        .unwrap();
    assert!((position - 3.0).abs() < 0.1, "position {position}");
    assert_eq!(
        hub.read_child_property("limit", "locked").await.unwrap(),
        Value::Bool(false)
    );
    hub.stop().await;
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_report_unknown_paths_and_names() {
    let hub = lab(&SimulationSettings::default());

    let err = hub.read_child_property("motion.wheel", "position").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceNotFound);

    let err = hub.read_child_property("switch", "voltage").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PropertyNotFound);

    let err = hub.execute_on_child("switch", "explode", Value::Null).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ActionNotFound);
}

#[tokio::test]
async fn should_refuse_writes_to_derived_properties() {
    let hub = lab(&SimulationSettings::default());

    let err = hub
        .write_child_property("limit", "locked", Value::Bool(true))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReadOnlyProperty);

    let err = hub
        .write_child_property("thermometer", "fahrenheit", Value::Float(0.0))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReadOnlyProperty);
}

#[tokio::test]
async fn should_reject_badly_typed_arguments() {
    let hub = lab(&SimulationSettings::default());

    let err = hub
        .write_child_property("switch", "state", Value::from("on"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConversionFailure);

    let err = hub
        .execute_on_child("thermometer", "calibrate", Value::from("warm"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConversionFailure);
}

#[tokio::test]
async fn should_describe_lab_tree() {
    let hub = lab(&SimulationSettings::default());

    let DeviceMessage::Description { properties, .. } = device(&hub, "motion").describe() else {
        panic!("describe should build a description");
    };
    let names: Vec<&str> = properties.iter().map(|property| property.name.as_str()).collect();
    assert_eq!(names, vec!["position", "target"]);

    let DeviceMessage::Description { properties, .. } = hub.describe() else {
        panic!("describe should build a description");
    };
    assert_eq!(properties.len(), 1);
    assert_eq!(properties[0].name, "time");
}
