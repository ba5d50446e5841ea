//! Simulated device implementations.
//!
//! Every simulated device wraps a [`LocalDevice`](labhub_app::LocalDevice) (or
//! a [`Hub`](labhub_app::Hub)) built at construction time and forwards the
//! [`Device`](labhub_app::Device) port to it.

/// Implement [`Device`](labhub_app::Device) for a wrapper by forwarding every
/// call to one of its fields.
macro_rules! delegate_device {
    ($ty:ty, $field:ident) => {
        #[async_trait::async_trait]
        impl labhub_app::Device for $ty {
            fn id(&self) -> &str {
                labhub_app::Device::id(&self.$field)
            }

            fn lifecycle_state(&self) -> labhub_domain::lifecycle::LifecycleState {
                labhub_app::Device::lifecycle_state(&self.$field)
            }

            fn property_descriptors(&self) -> Vec<labhub_domain::descriptor::PropertyDescriptor> {
                labhub_app::Device::property_descriptors(&self.$field)
            }

            fn action_descriptors(&self) -> Vec<labhub_domain::descriptor::ActionDescriptor> {
                labhub_app::Device::action_descriptors(&self.$field)
            }

            fn subscribe(
                &self,
            ) -> tokio::sync::broadcast::Receiver<labhub_domain::message::DeviceMessage> {
                labhub_app::Device::subscribe(&self.$field)
            }

            async fn read_property(
                &self,
                name: &str,
            ) -> Result<labhub_domain::value::Value, labhub_domain::error::ControlError> {
                labhub_app::Device::read_property(&self.$field, name).await
            }

            async fn write_property(
                &self,
                name: &str,
                value: labhub_domain::value::Value,
            ) -> Result<(), labhub_domain::error::ControlError> {
                labhub_app::Device::write_property(&self.$field, name, value).await
            }

            async fn execute(
                &self,
                action: &str,
                argument: labhub_domain::value::Value,
            ) -> Result<labhub_domain::value::Value, labhub_domain::error::ControlError> {
                labhub_app::Device::execute(&self.$field, action, argument).await
            }

            async fn start(&self) -> Result<(), labhub_domain::error::ControlError> {
                labhub_app::Device::start(&self.$field).await
            }

            async fn stop(&self) {
                labhub_app::Device::stop(&self.$field).await;
            }

            fn as_hub(&self) -> Option<&dyn labhub_app::DeviceHub> {
                labhub_app::Device::as_hub(&self.$field)
            }
        }
    };
}

pub(crate) use delegate_device;

mod drive;
mod limit_switch;
mod switch;
mod thermometer;

pub use drive::InertialDrive;
pub use limit_switch::{Boundary, LimitSwitch};
pub use switch::SimulatedSwitch;
pub use thermometer::SimulatedThermometer;
