//! Simulated relay with `turn_on`, `turn_off` and `toggle` commands.

use labhub_app::LocalDevice;
use labhub_app::binding::Binding;
use labhub_app::cell::{MutableCell, virtual_cell};
use labhub_domain::converter::native;
use labhub_domain::descriptor::{ActionDescriptor, PropertyDescriptor};
use labhub_domain::error::ControlError;

use super::delegate_device;

/// A relay whose position is owned by the process.
pub struct SimulatedSwitch {
    device: LocalDevice,
    state: MutableCell<bool>,
}

impl SimulatedSwitch {
    /// Build the switch, initially off.
    ///
    /// # Errors
    ///
    /// Registration errors, which only occur on programming mistakes.
    pub fn new(id: &str) -> Result<Self, ControlError> {
        let device = LocalDevice::new(id);
        let relay = id.to_string();
        let state = virtual_cell(false, move |on: &bool| {
            tracing::debug!(switch = %relay, on, "relay moved");
        });
        device.register_property(
            PropertyDescriptor::new("state").description("Relay position, true when closed"),
            native::<bool>(),
            state.clone(),
        )?;

        let commands: [(&str, &str, fn(bool) -> bool); 3] = [
            ("turn_on", "Close the relay", |_| true),
            ("turn_off", "Open the relay", |_| false),
            ("toggle", "Flip the relay", |on| !on),
        ];
        for (action, description, next) in commands {
            let cell = state.clone();
            device.register_action(
                ActionDescriptor::new(action).description(description),
                native::<()>(),
                native::<bool>(),
                move |()| {
                    let on = next(cell.get());
                    cell.set(on);
                    async move { Ok(on) }
                },
            )?;
            device.register_binding(Binding::Action {
                action: action.to_string(),
                reads: vec![state.id()],
                writes: vec![state.id()],
            });
        }

        Ok(Self { device, state })
    }

    #[must_use]
    pub fn is_on(&self) -> bool {
        self.state.get()
    }
}

delegate_device!(SimulatedSwitch, device);

#[cfg(test)]
mod tests {
    use labhub_app::Device;
    use labhub_domain::value::Value;

    use super::*;

    #[tokio::test]
    async fn should_start_turned_off() {
        let switch = SimulatedSwitch::new("switch").unwrap();
        assert!(!switch.is_on());
        assert_eq!(switch.read_property("state").await.unwrap(), Value::Bool(false));
    }

    #[tokio::test]
    async fn should_handle_turn_on_and_turn_off() {
        let switch = SimulatedSwitch::new("switch").unwrap();

        let result = switch.execute("turn_on", Value::Null).await.unwrap();
        assert_eq!(result, Value::Bool(true));
        assert!(switch.is_on());

        switch.execute("turn_off", Value::Null).await.unwrap();
        assert!(!switch.is_on());
    }

    #[tokio::test]
    async fn should_toggle_state() {
        let switch = SimulatedSwitch::new("switch").unwrap();
        switch.execute("toggle", Value::Null).await.unwrap();
        assert!(switch.is_on());
        switch.execute("toggle", Value::Null).await.unwrap();
        assert!(!switch.is_on());
    }

    #[tokio::test]
    async fn should_accept_direct_state_write() {
        let switch = SimulatedSwitch::new("switch").unwrap();
        switch.write_property("state", Value::Bool(true)).await.unwrap();
        assert!(switch.is_on());
    }

    #[tokio::test]
    async fn should_describe_commands() {
        let switch = SimulatedSwitch::new("switch").unwrap();
        let names: Vec<String> = switch
            .action_descriptors()
            .into_iter()
            .map(|descriptor| descriptor.name)
            .collect();
        assert_eq!(names, vec!["toggle", "turn_off", "turn_on"]);
    }
}
