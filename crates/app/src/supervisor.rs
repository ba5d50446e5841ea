//! Supervised device scopes.
//!
//! Every running device owns exactly one [`Scope`]: a cancellation token plus a
//! task tracker. Background work (cell polling, property forwarding, user
//! loops) is spawned into the scope. A task that returns an error or panics is
//! logged and reported once on the device bus as a `DeviceMessage::Error`;
//! sibling tasks keep running. A panicking launcher is reported the same way
//! and does not prevent the other launchers from running.
//!
//! ```text
//!   Supervisor ──open()──► Scope ──spawn()──► task ─┬─ Ok      → nothing
//!        │                   │                      ├─ Err     → Error message
//!   launchers (replayed      └──close()─► cancel    └─ panic   → Error message
//!   on every open)                       + wait
//! ```

use std::any::Any;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};

use labhub_domain::error::{ErrorInfo, ErrorKind};
use labhub_domain::message::DeviceMessage;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::bus::MessageBus;

/// Callback that spawns work into a freshly opened scope.
///
/// Launchers are registered once and run on every start of the device, so a
/// restarted device gets its background work back.
pub type Launcher = Arc<dyn Fn(&Scope) + Send + Sync>;

/// One lifetime of a running device.
#[derive(Debug, Clone)]
pub struct Scope {
    device: Arc<str>,
    token: CancellationToken,
    tracker: TaskTracker,
    bus: MessageBus,
}

impl Scope {
    fn new(device: Arc<str>, bus: MessageBus) -> Self {
        Self {
            device,
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            bus,
        }
    }

    /// Spawn a supervised task.
    ///
    /// The task is dropped at its next await point once the scope closes.
    /// Spawning into a closed scope does nothing.
    pub fn spawn<F>(&self, task: &str, fut: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if self.token.is_cancelled() {
            tracing::debug!(device = %self.device, task, "scope closed, task not spawned");
            return;
        }

        let token = self.token.clone();
        let inner = tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => Ok(()),
                result = fut => result,
            }
        });

        let device = Arc::clone(&self.device);
        let bus = self.bus.clone();
        let task = task.to_string();
        self.tracker.spawn(async move {
            let info = match inner.await {
                Ok(Ok(())) => return,
                Ok(Err(err)) => {
                    tracing::error!(device = %device, task = %task, error = ?err, "device task failed");
                    ErrorInfo::internal(&err)
                }
                Err(join) if join.is_panic() => {
                    let reason = panic_message(join.into_panic());
                    tracing::error!(device = %device, task = %task, reason = %reason, "device task panicked");
                    ErrorInfo {
                        kind: ErrorKind::InternalError,
                        message: format!("task {task} panicked: {reason}"),
                        trace: None,
                    }
                }
                Err(_) => return,
            };
            bus.publish(DeviceMessage::error(info));
        });
    }

    /// Cancel every task of the scope and wait for all of them to finish.
    ///
    /// Must not be awaited from a task running inside this same scope.
    pub async fn close(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token cancelled when the scope closes.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    #[must_use]
    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Reason a joined task did not complete.
pub(crate) fn join_failure(join: JoinError) -> String {
    if join.is_panic() {
        panic_message(join.into_panic())
    } else {
        "cancelled".to_string()
    }
}

/// Owns the launchers of a device and the scope of its current run.
pub struct Supervisor {
    device: Arc<str>,
    bus: MessageBus,
    current: Mutex<Option<Scope>>,
    launchers: Mutex<Vec<(String, Launcher)>>,
}

impl Supervisor {
    #[must_use]
    pub fn new(device: impl Into<Arc<str>>, bus: MessageBus) -> Self {
        Self {
            device: device.into(),
            bus,
            current: Mutex::new(None),
            launchers: Mutex::new(Vec::new()),
        }
    }

    /// Register a launcher. It runs immediately when a scope is open and on
    /// every subsequent [`open`](Self::open).
    pub fn register(&self, name: impl Into<String>, launcher: Launcher) {
        let scope = {
            let mut launchers = self.launchers.lock().unwrap_or_else(PoisonError::into_inner);
            launchers.push((name.into(), Arc::clone(&launcher)));
            self.scope()
        };
        if let Some(scope) = scope {
            self.launch("late launcher", &launcher, &scope);
        }
    }

    /// Open a new scope and run every registered launcher in it.
    pub fn open(&self) -> Scope {
        let scope = Scope::new(Arc::clone(&self.device), self.bus.clone());
        let snapshot: Vec<(String, Launcher)> = {
            let launchers = self.launchers.lock().unwrap_or_else(PoisonError::into_inner);
            *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(scope.clone());
            launchers.clone()
        };
        for (name, launcher) in snapshot {
            tracing::trace!(device = %self.device, launcher = %name, "running launcher");
            self.launch(&name, &launcher, &scope);
        }
        scope
    }

    fn launch(&self, name: &str, launcher: &Launcher, scope: &Scope) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| launcher(scope))) {
            let reason = panic_message(payload);
            tracing::error!(device = %self.device, launcher = name, %reason, "launcher panicked");
            self.bus.publish(DeviceMessage::error(ErrorInfo {
                kind: ErrorKind::InternalError,
                message: format!("launcher {name} panicked: {reason}"),
                trace: None,
            }));
        }
    }

    /// Close the current scope, if any, waiting for its tasks to finish.
    pub async fn close(&self) {
        let scope = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(scope) = scope {
            scope.close().await;
        }
    }

    /// The scope of the current run, `None` while stopped.
    #[must_use]
    pub fn scope(&self) -> Option<Scope> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("device", &self.device)
            .field("running", &self.scope().is_some())
            .finish_non_exhaustive()
    }
}
