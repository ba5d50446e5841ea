//! Device port — properties, actions, lifecycle and the message bus.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use labhub_domain::descriptor::{ActionDescriptor, PropertyDescriptor};
use labhub_domain::error::ControlError;
use labhub_domain::lifecycle::LifecycleState;
use labhub_domain::message::DeviceMessage;
use labhub_domain::name::DeviceName;
use labhub_domain::value::Value;
use tokio::sync::broadcast;

/// A controllable unit.
///
/// Implementations must be safe to share between tasks; every method can be
/// called concurrently from any number of callers.
#[async_trait]
pub trait Device: Send + Sync {
    /// Local name of the device.
    fn id(&self) -> &str;

    fn lifecycle_state(&self) -> LifecycleState;

    fn property_descriptors(&self) -> Vec<PropertyDescriptor>;

    fn action_descriptors(&self) -> Vec<ActionDescriptor>;

    /// Messages published after this call. The bus never replays.
    fn subscribe(&self) -> broadcast::Receiver<DeviceMessage>;

    /// Live snapshot of the registries.
    fn describe(&self) -> DeviceMessage {
        DeviceMessage::description(self.property_descriptors(), self.action_descriptors())
    }

    /// Encoded current value of a property.
    ///
    /// # Errors
    ///
    /// [`ControlError::PropertyNotFound`] for an unknown name,
    /// [`ControlError::Internal`] when computing the value panics.
    async fn read_property(&self, name: &str) -> Result<Value, ControlError>;

    /// Decode `value` and set it on the property cell.
    ///
    /// # Errors
    ///
    /// [`ControlError::PropertyNotFound`], [`ControlError::ReadOnlyProperty`]
    /// or [`ControlError::Conversion`]; [`ControlError::Internal`] when the
    /// cell panics while accepting the value.
    async fn write_property(&self, name: &str, value: Value) -> Result<(), ControlError>;

    /// Invoke a registered action.
    ///
    /// # Errors
    ///
    /// [`ControlError::ActionNotFound`], [`ControlError::Conversion`] for a
    /// malformed argument, [`ControlError::Internal`] when the action body
    /// fails or panics.
    async fn execute(&self, action: &str, argument: Value) -> Result<Value, ControlError>;

    /// Move `STOPPED → STARTING → STARTED`. No-op when already running.
    ///
    /// # Errors
    ///
    /// Returns the failure (or panic) of the start hook, in which case the
    /// device is back to `STOPPED`.
    async fn start(&self) -> Result<(), ControlError>;

    /// Move `STARTED → STOPPING → STOPPED`, cancelling every background task.
    /// No-op when not started.
    async fn stop(&self);

    /// Downcast to a hub when the device owns children.
    fn as_hub(&self) -> Option<&dyn DeviceHub> {
        None
    }
}

/// A device owning named children.
pub trait DeviceHub: Send + Sync {
    /// Direct children in installation order.
    fn children(&self) -> Vec<(String, Arc<dyn Device>)>;

    fn child(&self, name: &str) -> Option<Arc<dyn Device>> {
        self.children()
            .into_iter()
            .find_map(|(child, device)| (child == name).then_some(device))
    }
}

/// Hierarchical addressing on top of [`DeviceHub`].
pub trait DeviceHubExt: DeviceHub {
    /// Resolve a (possibly nested) child.
    ///
    /// # Errors
    ///
    /// [`ControlError::DeviceNotFound`] when any segment is missing.
    fn find(&self, name: &DeviceName) -> Result<Arc<dyn Device>, ControlError> {
        let not_found = || ControlError::DeviceNotFound(name.to_string());
        let child = self.child(name.first()).ok_or_else(not_found)?;
        match name.rest() {
            None => Ok(child),
            Some(rest) => child
                .as_hub()
                .ok_or_else(not_found)?
                .find(&rest)
                .map_err(|_| not_found()),
        }
    }

    /// Every descendant keyed by its full dotted path, computed on demand.
    fn all_devices(&self) -> Vec<(DeviceName, Arc<dyn Device>)> {
        let mut devices = Vec::new();
        for (name, child) in self.children() {
            let Ok(prefix) = DeviceName::single(&name) else {
                continue;
            };
            devices.push((prefix.clone(), Arc::clone(&child)));
            if let Some(hub) = child.as_hub() {
                devices.extend(
                    hub.all_devices()
                        .into_iter()
                        .map(|(nested, device)| (prefix.join(&nested), device)),
                );
            }
        }
        devices
    }

    /// Read a property of the child at the dotted `path`.
    fn read_child_property(
        &self,
        path: &str,
        property: &str,
    ) -> impl Future<Output = Result<Value, ControlError>> + Send {
        let device = DeviceName::parse(path).and_then(|name| self.find(&name));
        let property = property.to_string();
        async move { device?.read_property(&property).await }
    }

    /// Write a property of the child at the dotted `path`.
    fn write_child_property(
        &self,
        path: &str,
        property: &str,
        value: Value,
    ) -> impl Future<Output = Result<(), ControlError>> + Send {
        let device = DeviceName::parse(path).and_then(|name| self.find(&name));
        let property = property.to_string();
        async move { device?.write_property(&property, value).await }
    }

    /// Execute an action of the child at the dotted `path`.
    fn execute_on_child(
        &self,
        path: &str,
        action: &str,
        argument: Value,
    ) -> impl Future<Output = Result<Value, ControlError>> + Send {
        let device = DeviceName::parse(path).and_then(|name| self.find(&name));
        let action = action.to_string();
        async move { device?.execute(&action, argument).await }
    }
}

impl<H: DeviceHub + ?Sized> DeviceHubExt for H {}
