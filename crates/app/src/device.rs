//! `LocalDevice` — the in-process implementation of the [`Device`] port.
//!
//! A local device owns:
//! - a **property registry** mapping names to cells plus their converters
//! - an **action registry** mapping names to async bodies
//! - a **message bus** carrying property changes, lifecycle transitions,
//!   action results and contained failures
//! - a **supervisor** whose scope lives exactly as long as the device is
//!   started
//!
//! Cells are registered at construction time, before the device starts.
//! Background work they need (polling, mirroring, forwarding changes to the
//! bus) is declared up front and launched into every new scope.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use labhub_domain::converter::Converter;
use labhub_domain::descriptor::{ActionDescriptor, PropertyDescriptor};
use labhub_domain::error::{ControlError, ErrorInfo};
use labhub_domain::id::{BindingId, RequestId};
use labhub_domain::lifecycle::LifecycleState;
use labhub_domain::message::DeviceMessage;
use labhub_domain::value::Value;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_stream::StreamExt;

use crate::BoxFuture;
use crate::binding::{Binding, BindingRegistry};
use crate::bus::{DEFAULT_BUS_CAPACITY, MessageBus};
use crate::cell::{CellId, CellJob, CellRef, CellStream};
use crate::ports::Device;
use crate::supervisor::{Scope, Supervisor, join_failure};

mod registry;

use registry::{ActionEntry, PropertyEntry, TypedAction, TypedProperty};

type Hook = Arc<dyn Fn(Scope) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Leaf device built from registered cells and actions.
pub struct LocalDevice {
    id: Arc<str>,
    bus: MessageBus,
    supervisor: Supervisor,
    properties: RwLock<BTreeMap<String, Arc<dyn PropertyEntry>>>,
    actions: RwLock<BTreeMap<String, Arc<dyn ActionEntry>>>,
    attached: Mutex<HashSet<CellId>>,
    bindings: BindingRegistry,
    state: Mutex<LifecycleState>,
    transition: tokio::sync::Mutex<()>,
    on_start: Mutex<Option<Hook>>,
    on_stop: Mutex<Option<Hook>>,
}

impl LocalDevice {
    #[must_use]
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self::with_bus_capacity(id, DEFAULT_BUS_CAPACITY)
    }

    #[must_use]
    pub fn with_bus_capacity(id: impl Into<Arc<str>>, capacity: usize) -> Self {
        let id = id.into();
        let bus = MessageBus::new(capacity);
        Self {
            supervisor: Supervisor::new(Arc::clone(&id), bus.clone()),
            id,
            bus,
            properties: RwLock::new(BTreeMap::new()),
            actions: RwLock::new(BTreeMap::new()),
            attached: Mutex::new(HashSet::new()),
            bindings: BindingRegistry::new(),
            state: Mutex::new(LifecycleState::Stopped),
            transition: tokio::sync::Mutex::new(()),
            on_start: Mutex::new(None),
            on_stop: Mutex::new(None),
        }
    }

    // -- registration --------------------------------------------------------

    /// Expose `cell` as a property.
    ///
    /// The descriptor's `writable` flag is overridden by the mutability of
    /// the cell. Every change of the cell is published as `PropertyChanged`
    /// while the device runs.
    ///
    /// # Errors
    ///
    /// [`ControlError::DuplicateName`] when the name is taken; the existing
    /// registration is left untouched.
    pub fn register_property<T>(
        &self,
        descriptor: PropertyDescriptor,
        converter: Converter<T>,
        cell: impl Into<CellRef<T>>,
    ) -> Result<PropertyHandle<T>, ControlError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let cell = cell.into();
        let name = descriptor.name.clone();
        let descriptor = descriptor.writable(cell.is_mutable());
        {
            let mut properties = self.properties.write().unwrap_or_else(PoisonError::into_inner);
            if properties.contains_key(&name) {
                return Err(ControlError::DuplicateName(name));
            }
            properties.insert(
                name.clone(),
                Arc::new(TypedProperty::new(descriptor, Arc::clone(&converter), cell.clone())),
            );
        }

        self.bindings.register(Binding::Property {
            property: name.clone(),
            cell: cell.id(),
        });
        self.attach_jobs(cell.background());
        self.launch_forwarding(&name, converter, cell.clone());
        tracing::debug!(device = %self.id, property = %name, writable = cell.is_mutable(), "property registered");

        Ok(PropertyHandle { name, cell })
    }

    fn launch_forwarding<T>(&self, name: &str, converter: Converter<T>, cell: CellRef<T>)
    where
        T: Clone + Send + Sync + 'static,
    {
        let property = name.to_string();
        self.supervisor.register(
            format!("forward {name}"),
            Arc::new(move |scope: &Scope| {
                // the first item replays the current value
                let mut changes = cell.subscribe().skip(1);
                let bus = scope.bus().clone();
                let converter = Arc::clone(&converter);
                let property = property.clone();
                scope.spawn(&format!("forward {property}"), async move {
                    while let Some(value) = changes.next().await {
                        bus.publish(DeviceMessage::property_changed(
                            property.clone(),
                            converter.encode(&value),
                        ));
                    }
                    Ok(())
                });
            }),
        );
    }

    /// Register an action.
    ///
    /// # Errors
    ///
    /// [`ControlError::DuplicateName`] when the name is taken.
    pub fn register_action<T, R, F, Fut>(
        &self,
        descriptor: ActionDescriptor,
        input: Converter<T>,
        output: Converter<R>,
        body: F,
    ) -> Result<(), ControlError>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let name = descriptor.name.clone();
        let mut actions = self.actions.write().unwrap_or_else(PoisonError::into_inner);
        if actions.contains_key(&name) {
            return Err(ControlError::DuplicateName(name));
        }
        actions.insert(
            name.clone(),
            Arc::new(TypedAction::new(descriptor, input, output, body)),
        );
        tracing::debug!(device = %self.id, action = %name, "action registered");
        Ok(())
    }

    /// Run the background jobs of `cell` while the device runs, without
    /// exposing it as a property.
    pub fn attach<T: 'static>(&self, cell: impl Into<CellRef<T>>) -> BindingId {
        let cell = cell.into();
        self.attach_jobs(cell.background());
        self.bindings.register(Binding::State { cell: cell.id() })
    }

    fn attach_jobs(&self, jobs: Vec<CellJob>) {
        for job in jobs {
            let fresh = self
                .attached
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(job.cell);
            if fresh {
                self.supervisor.register(format!("cell {}", job.cell), job.launcher);
            }
        }
    }

    // -- scope work ----------------------------------------------------------

    /// Hook run between `STARTING` and `STARTED`. A failure aborts the start.
    pub fn on_start<F, Fut>(&self, hook: F)
    where
        F: Fn(Scope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let hook: Hook = Arc::new(move |scope: Scope| -> BoxFuture<'static, anyhow::Result<()>> {
            Box::pin(hook(scope))
        });
        *self.on_start.lock().unwrap_or_else(PoisonError::into_inner) = Some(hook);
    }

    /// Hook run while `STOPPING`, before the scope is cancelled. A failure is
    /// reported on the bus and does not prevent the stop.
    pub fn on_stop<F, Fut>(&self, hook: F)
    where
        F: Fn(Scope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let hook: Hook = Arc::new(move |scope: Scope| -> BoxFuture<'static, anyhow::Result<()>> {
            Box::pin(hook(scope))
        });
        *self.on_stop.lock().unwrap_or_else(PoisonError::into_inner) = Some(hook);
    }

    /// Run `launcher` in every new scope (and right away if running).
    pub fn launch_on_start<F>(&self, name: impl Into<String>, launcher: F)
    where
        F: Fn(&Scope) + Send + Sync + 'static,
    {
        self.supervisor.register(name, Arc::new(launcher));
    }

    /// Run `job` every `period` while the device runs, starting right away.
    /// The first failure stops the loop and is reported on the bus.
    pub fn every<F, Fut>(&self, name: impl Into<String>, period: Duration, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        let task = name.clone();
        let job = Arc::new(job);
        let period = period.max(MIN_PERIOD);
        self.supervisor.register(
            name,
            Arc::new(move |scope: &Scope| {
                let job = Arc::clone(&job);
                scope.spawn(&task, async move {
                    let mut ticker = tokio::time::interval(period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        ticker.tick().await;
                        job().await?;
                    }
                });
            }),
        );
    }

    /// React to every value of `cell` (the current one included) inside the
    /// device scope. A failing reaction ends the subscription and is reported
    /// on the bus.
    pub fn bind<T, F, Fut>(&self, name: impl Into<String>, cell: impl Into<CellRef<T>>, reaction: F) -> BindingId
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let cell = cell.into();
        self.attach_jobs(cell.background());
        let binding = self.bindings.register(Binding::State { cell: cell.id() });
        let name = name.into();
        let task = name.clone();
        let reaction = Arc::new(reaction);
        self.supervisor.register(
            name,
            Arc::new(move |scope: &Scope| {
                let mut values: CellStream<T> = cell.subscribe();
                let reaction = Arc::clone(&reaction);
                scope.spawn(&task, async move {
                    while let Some(value) = values.next().await {
                        reaction(value).await?;
                    }
                    Ok(())
                });
            }),
        );
        binding
    }

    pub fn register_binding(&self, binding: Binding) -> BindingId {
        self.bindings.register(binding)
    }

    pub fn unregister_binding(&self, id: BindingId) -> bool {
        self.bindings.unregister(id)
    }

    #[must_use]
    pub fn bindings(&self) -> Vec<(BindingId, Binding)> {
        self.bindings.snapshot()
    }

    /// Scope of the current run, `None` while stopped.
    #[must_use]
    pub fn scope(&self) -> Option<Scope> {
        self.supervisor.scope()
    }

    #[must_use]
    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn publish(&self, message: DeviceMessage) {
        self.bus.publish(message);
    }

    /// Publish a `Description` of the live registries.
    pub fn announce(&self) {
        self.bus.publish(self.describe());
    }

    /// Execute an action and publish its outcome as `ActionResult`.
    ///
    /// # Errors
    ///
    /// Same as [`Device::execute`]; the error is published before it is
    /// returned.
    pub async fn execute_request(
        &self,
        action: &str,
        argument: Value,
        request_id: RequestId,
    ) -> Result<Value, ControlError> {
        let result = self.execute(action, argument).await;
        self.bus.publish(DeviceMessage::action_result(
            action,
            request_id,
            result.as_ref().cloned().map_err(ErrorInfo::from),
        ));
        result
    }

    // -- lifecycle -----------------------------------------------------------

    /// Start the device, running `after_setup` once the start hook succeeded
    /// and before the device reports `STARTED`.
    ///
    /// # Errors
    ///
    /// The start hook failure, wrapped as [`ControlError::Internal`].
    pub async fn start_with<F>(&self, after_setup: F) -> Result<(), ControlError>
    where
        F: Future<Output = ()> + Send,
    {
        let _transition = self.transition.lock().await;
        if self.lifecycle_state() != LifecycleState::Stopped {
            tracing::debug!(device = %self.id, "already running, start ignored");
            return Ok(());
        }

        self.set_state(LifecycleState::Starting);
        let scope = self.supervisor.open();
        let hook = self
            .on_start
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(hook) = hook
            && let Err(err) = run_hook("start", hook, scope).await
        {
            tracing::error!(device = %self.id, error = ?err, "start hook failed");
            self.supervisor.close().await;
            self.set_state(LifecycleState::Stopped);
            return Err(ControlError::Internal(err));
        }

        after_setup.await;
        self.set_state(LifecycleState::Started);
        Ok(())
    }

    /// Stop the device, running `before_teardown` while `STOPPING` and before
    /// the stop hook and the scope cancellation.
    ///
    /// Must not be awaited from a task running in the device's own scope.
    pub async fn stop_with<F>(&self, before_teardown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let _transition = self.transition.lock().await;
        if self.lifecycle_state() != LifecycleState::Started {
            tracing::debug!(device = %self.id, "not started, stop ignored");
            return;
        }

        self.set_state(LifecycleState::Stopping);
        before_teardown.await;

        let hook = self
            .on_stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let (Some(hook), Some(scope)) = (hook, self.supervisor.scope())
            && let Err(err) = run_hook("stop", hook, scope).await
        {
            tracing::error!(device = %self.id, error = ?err, "stop hook failed");
            self.bus.publish(DeviceMessage::error(ErrorInfo::internal(&err)));
        }

        self.supervisor.close().await;
        self.set_state(LifecycleState::Stopped);
    }

    fn set_state(&self, next: LifecycleState) {
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, next)
        };
        debug_assert!(previous.can_transition_to(next), "{previous} -> {next}");
        tracing::info!(device = %self.id, from = %previous, to = %next, "lifecycle transition");
        self.bus.publish(DeviceMessage::lifecycle_changed(next));
    }

    fn property_entry(&self, name: &str) -> Result<Arc<dyn PropertyEntry>, ControlError> {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| ControlError::PropertyNotFound(name.to_string()))
    }

    fn action_entry(&self, name: &str) -> Result<Arc<dyn ActionEntry>, ControlError> {
        self.actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| ControlError::ActionNotFound(name.to_string()))
    }
}

/// Run a lifecycle hook on its own task so a panic surfaces as an error.
async fn run_hook(phase: &str, hook: Hook, scope: Scope) -> anyhow::Result<()> {
    match tokio::spawn(async move { hook(scope).await }).await {
        Ok(result) => result,
        Err(join) => Err(anyhow::anyhow!("{phase} hook panicked: {}", join_failure(join))),
    }
}

impl std::fmt::Debug for LocalDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDevice")
            .field("id", &self.id)
            .field("state", &self.lifecycle_state())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Device for LocalDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn lifecycle_state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn property_descriptors(&self) -> Vec<PropertyDescriptor> {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|entry| entry.descriptor().clone())
            .collect()
    }

    fn action_descriptors(&self) -> Vec<ActionDescriptor> {
        self.actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|entry| entry.descriptor().clone())
            .collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceMessage> {
        self.bus.subscribe()
    }

    async fn read_property(&self, name: &str) -> Result<Value, ControlError> {
        self.property_entry(name)?.read()
    }

    async fn write_property(&self, name: &str, value: Value) -> Result<(), ControlError> {
        let entry = self.property_entry(name)?;
        entry.write(&value)?;
        tracing::debug!(device = %self.id, property = name, %value, "property written");
        Ok(())
    }

    async fn execute(&self, action: &str, argument: Value) -> Result<Value, ControlError> {
        let entry = self.action_entry(action)?;
        let running = entry.invoke(&argument)?;
        match tokio::spawn(running).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => {
                tracing::warn!(device = %self.id, action, error = %err, "action failed");
                Err(ControlError::Internal(err))
            }
            Err(join) => {
                let reason = join_failure(join);
                tracing::error!(device = %self.id, action, %reason, "action panicked");
                Err(ControlError::Internal(anyhow::anyhow!("action {action} panicked: {reason}")))
            }
        }
    }

    async fn start(&self) -> Result<(), ControlError> {
        self.start_with(async {}).await
    }

    async fn stop(&self) {
        self.stop_with(async {}).await;
    }
}

/// Typed handle on a registered property.
pub struct PropertyHandle<T> {
    name: String,
    cell: CellRef<T>,
}

impl<T> Clone for PropertyHandle<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            cell: self.cell.clone(),
        }
    }
}

impl<T: 'static> PropertyHandle<T> {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn get(&self) -> T {
        self.cell.get()
    }

    #[must_use]
    pub fn subscribe(&self) -> CellStream<T> {
        self.cell.subscribe()
    }

    #[must_use]
    pub fn cell(&self) -> &CellRef<T> {
        &self.cell
    }

    /// Set the value natively, bypassing the converter.
    ///
    /// # Errors
    ///
    /// [`ControlError::ReadOnlyProperty`] when the cell is read-only.
    pub fn set(&self, value: T) -> Result<(), ControlError> {
        let cell = self
            .cell
            .as_mutable()
            .ok_or_else(|| ControlError::ReadOnlyProperty(self.name.clone()))?;
        cell.set(value);
        Ok(())
    }
}
