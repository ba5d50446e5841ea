//! `Hub` — a device owning named child devices.
//!
//! A hub is a [`LocalDevice`] (it can expose its own properties and actions)
//! plus an append-only list of children. Starting the hub starts every child;
//! stopping it stops every child first, in installation order, before the
//! hub's own scope is torn down.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use labhub_domain::descriptor::{ActionDescriptor, PropertyDescriptor};
use labhub_domain::error::{ControlError, ErrorInfo};
use labhub_domain::lifecycle::LifecycleState;
use labhub_domain::message::DeviceMessage;
use labhub_domain::name::DeviceName;
use labhub_domain::value::Value;
use tokio::sync::broadcast;

use crate::device::LocalDevice;
use crate::ports::{Device, DeviceHub};
use crate::supervisor::join_failure;

pub struct Hub {
    core: LocalDevice,
    children: RwLock<Vec<(String, Arc<dyn Device>)>>,
}

impl Hub {
    #[must_use]
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self::from_core(LocalDevice::new(id))
    }

    /// Wrap an existing local device, keeping its registrations.
    #[must_use]
    pub fn from_core(core: LocalDevice) -> Self {
        Self {
            core,
            children: RwLock::new(Vec::new()),
        }
    }

    /// The hub's own property/action registry.
    #[must_use]
    pub fn core(&self) -> &LocalDevice {
        &self.core
    }

    /// Install a child under `name`.
    ///
    /// When the hub is running the child is started in the background, so it
    /// may briefly be observed as `STOPPED` after this returns.
    ///
    /// # Errors
    ///
    /// [`ControlError::InvalidName`] for an empty or dotted name,
    /// [`ControlError::DuplicateChildName`] when the name is taken.
    pub fn install(&self, name: &str, device: Arc<dyn Device>) -> Result<(), ControlError> {
        DeviceName::single(name)?;
        {
            let mut children = self.children.write().unwrap_or_else(PoisonError::into_inner);
            if children.iter().any(|(existing, _)| existing == name) {
                return Err(ControlError::DuplicateChildName(name.to_string()));
            }
            children.push((name.to_string(), Arc::clone(&device)));
        }
        tracing::debug!(hub = self.core.id(), child = name, "child installed");

        if self.core.lifecycle_state().is_running()
            && let Some(scope) = self.core.scope()
        {
            scope.spawn(&format!("start {name}"), async move {
                device.start().await?;
                Ok(())
            });
        }
        Ok(())
    }

    /// Install a concrete device and get its typed handle back.
    ///
    /// # Errors
    ///
    /// Same as [`install`](Self::install).
    pub fn install_device<D: Device + 'static>(&self, name: &str, device: D) -> Result<Arc<D>, ControlError> {
        let device = Arc::new(device);
        self.install(name, Arc::clone(&device) as Arc<dyn Device>)?;
        Ok(device)
    }

    async fn start_children(&self) {
        for (name, child) in self.children() {
            // isolate each child so a panicking start cannot skip its siblings
            let starting = tokio::spawn(async move { child.start().await });
            let err = match starting.await {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(join) => ControlError::Internal(anyhow::anyhow!(
                    "child {name} panicked while starting: {}",
                    join_failure(join)
                )),
            };
            tracing::error!(hub = self.core.id(), child = %name, error = %err, "child failed to start");
            self.core.publish(DeviceMessage::error(ErrorInfo::from(&err)));
        }
    }

    async fn stop_children(&self) {
        for (name, child) in self.children() {
            let stopping = tokio::spawn(async move { child.stop().await });
            if let Err(join) = stopping.await {
                let reason = join_failure(join);
                tracing::error!(hub = self.core.id(), child = %name, %reason, "child failed to stop");
            }
        }
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let children: Vec<String> = self.children().into_iter().map(|(name, _)| name).collect();
        f.debug_struct("Hub")
            .field("core", &self.core)
            .field("children", &children)
            .finish()
    }
}

impl DeviceHub for Hub {
    fn children(&self) -> Vec<(String, Arc<dyn Device>)> {
        self.children
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Device for Hub {
    fn id(&self) -> &str {
        self.core.id()
    }

    fn lifecycle_state(&self) -> LifecycleState {
        self.core.lifecycle_state()
    }

    fn property_descriptors(&self) -> Vec<PropertyDescriptor> {
        self.core.property_descriptors()
    }

    fn action_descriptors(&self) -> Vec<ActionDescriptor> {
        self.core.action_descriptors()
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceMessage> {
        self.core.subscribe()
    }

    async fn read_property(&self, name: &str) -> Result<Value, ControlError> {
        self.core.read_property(name).await
    }

    async fn write_property(&self, name: &str, value: Value) -> Result<(), ControlError> {
        self.core.write_property(name, value).await
    }

    async fn execute(&self, action: &str, argument: Value) -> Result<Value, ControlError> {
        self.core.execute(action, argument).await
    }

    async fn start(&self) -> Result<(), ControlError> {
        self.core.start_with(self.start_children()).await
    }

    async fn stop(&self) {
        self.core.stop_with(self.stop_children()).await;
    }

    fn as_hub(&self) -> Option<&dyn DeviceHub> {
        Some(self)
    }
}
