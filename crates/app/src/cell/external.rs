//! Cells backed by an external source of truth.
//!
//! An external cell polls an async reader on a fixed interval and publishes
//! what it reads. Writes are forwarded to an async writer and are **not**
//! applied locally: the next poll reconciles the cell with the device, which
//! models the round-trip latency of real hardware.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use labhub_domain::time::{Timestamp, now};
use tokio::time::MissedTickBehavior;

use super::slot::Slot;
use super::{Cell, CellId, CellJob, CellStream, MutableCell, MutableStateCell, StateCell};
use crate::BoxFuture;
use crate::supervisor::{Launcher, Scope};

type Reader<T> = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;
type Writer<T> = Arc<dyn Fn(T) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

struct Inner<T> {
    slot: Slot<T>,
    interval: Duration,
    reader: Reader<T>,
    writer: Option<Writer<T>>,
    scope: Mutex<Option<Scope>>,
}

/// Polled cell. See the module documentation.
pub struct ExternalCell<T> {
    id: CellId,
    inner: Arc<Inner<T>>,
}

impl<T: Clone + Send + Sync + 'static> ExternalCell<T> {
    fn new(interval: Duration, initial: T, reader: Reader<T>, writer: Option<Writer<T>>) -> Self {
        Self {
            id: CellId::next(),
            inner: Arc::new(Inner {
                slot: Slot::new(initial),
                interval: interval.max(MIN_INTERVAL),
                reader,
                writer,
                scope: Mutex::new(None),
            }),
        }
    }

    fn poll_launcher(&self) -> Launcher {
        let id = self.id;
        let inner = Arc::clone(&self.inner);
        Arc::new(move |scope: &Scope| {
            *inner.scope.lock().unwrap_or_else(PoisonError::into_inner) = Some(scope.clone());
            let inner = Arc::clone(&inner);
            tracing::debug!(device = scope.device(), cell = %id, interval = ?inner.interval, "polling external cell");
            scope.spawn(&format!("poll {id}"), async move {
                let mut ticker = tokio::time::interval(inner.interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // the first tick completes immediately
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let value = (inner.reader)().await?;
                    inner.slot.set(value);
                }
            });
        })
    }
}

impl<T: Clone + Send + Sync + 'static> StateCell<T> for ExternalCell<T> {
    fn id(&self) -> CellId {
        self.id
    }

    fn get(&self) -> T {
        self.inner.slot.get()
    }

    fn subscribe(&self) -> CellStream<T> {
        self.inner.slot.subscribe()
    }

    fn background(&self) -> Vec<CellJob> {
        vec![CellJob {
            cell: self.id,
            launcher: self.poll_launcher(),
        }]
    }
}

impl<T: Clone + Send + Sync + 'static> MutableStateCell<T> for ExternalCell<T> {
    fn set(&self, value: T) {
        let Some(writer) = &self.inner.writer else {
            tracing::warn!(cell = %self.id, "external cell has no writer, write dropped");
            return;
        };
        let scope = self
            .inner
            .scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match scope {
            Some(scope) if !scope.is_cancelled() => {
                let writer = Arc::clone(writer);
                scope.spawn(&format!("write {}", self.id), async move { writer(value).await });
            }
            _ => {
                tracing::warn!(cell = %self.id, "external cell is not attached to a running device, write dropped");
            }
        }
    }
}

fn boxed_reader<T, R, Fut>(reader: R) -> Reader<T>
where
    R: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Arc::new(move || -> BoxFuture<'static, anyhow::Result<T>> { Box::pin(reader()) })
}

/// Read-only cell refreshed from `reader` every `interval`.
///
/// The first read happens one interval after the owning device starts. A
/// failing read stops the polling task; the failure is reported on the bus.
pub fn external<T, R, Fut>(interval: Duration, initial: T, reader: R) -> Cell<T>
where
    T: Clone + Send + Sync + 'static,
    R: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Arc::new(ExternalCell::new(interval, initial, boxed_reader(reader), None))
}

/// Polled cell whose writes are handed to `writer` inside the device scope.
pub fn external_mutable<T, R, RFut, W, WFut>(
    interval: Duration,
    initial: T,
    reader: R,
    writer: W,
) -> MutableCell<T>
where
    T: Clone + Send + Sync + 'static,
    R: Fn() -> RFut + Send + Sync + 'static,
    RFut: Future<Output = anyhow::Result<T>> + Send + 'static,
    W: Fn(T) -> WFut + Send + Sync + 'static,
    WFut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let writer: Writer<T> =
        Arc::new(move |value: T| -> BoxFuture<'static, anyhow::Result<()>> { Box::pin(writer(value)) });
    Arc::new(ExternalCell::new(
        interval,
        initial,
        boxed_reader(reader),
        Some(writer),
    ))
}

/// Cell holding the current UTC time, refreshed every `tick`.
#[must_use]
pub fn timer(tick: Duration) -> Cell<Timestamp> {
    external(tick, now(), || async { Ok(now()) })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};

    use labhub_domain::message::DeviceMessage;

    use super::*;
    use crate::bus::MessageBus;
    use crate::supervisor::Supervisor;

    fn run_jobs(supervisor: &Supervisor, jobs: Vec<CellJob>) {
        for job in jobs {
            supervisor.register(job.cell.to_string(), job.launcher);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn should_refresh_value_from_reader() {
        let counter = Arc::new(AtomicI64::new(0));
        let source = Arc::clone(&counter);
        let cell = external(Duration::from_millis(100), 0_i64, move || {
            let source = Arc::clone(&source);
            async move { Ok(source.fetch_add(1, Ordering::SeqCst) + 1) }
        });
        let supervisor = Supervisor::new("probe", MessageBus::default());
        run_jobs(&supervisor, cell.background());
        supervisor.open();

        assert_eq!(cell.get(), 0);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(cell.get(), 2);

        supervisor.close().await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(cell.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn should_not_update_value_optimistically_on_write() {
        let hardware = Arc::new(AtomicI64::new(1));
        let read_side = Arc::clone(&hardware);
        let write_side = Arc::clone(&hardware);
        let cell = external_mutable(
            Duration::from_millis(100),
            1_i64,
            move || {
                let hardware = Arc::clone(&read_side);
                async move { Ok(hardware.load(Ordering::SeqCst)) }
            },
            move |value: i64| {
                let hardware = Arc::clone(&write_side);
                async move {
                    hardware.store(value, Ordering::SeqCst);
                    Ok(())
                }
            },
        );
        let supervisor = Supervisor::new("motor", MessageBus::default());
        run_jobs(&supervisor, cell.background());
        supervisor.open();

        cell.set(7);
        assert_eq!(cell.get(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(hardware.load(Ordering::SeqCst), 7);
        assert_eq!(cell.get(), 7);
        supervisor.close().await;
    }

    #[tokio::test]
    async fn should_drop_write_when_not_attached() {
        let written = Arc::new(AtomicI64::new(0));
        let sink = Arc::clone(&written);
        let cell = external_mutable(
            Duration::from_millis(10),
            0_i64,
            || async { Ok(0) },
            move |value: i64| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.store(value, Ordering::SeqCst);
                    Ok(())
                }
            },
        );

        cell.set(3);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(written.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn should_report_reader_failure_on_bus() {
        let bus = MessageBus::default();
        let mut rx = bus.subscribe();
        let cell = external(Duration::from_millis(50), 0.0_f64, || async {
            Err::<f64, _>(anyhow::anyhow!("probe disconnected"))
        });
        let supervisor = Supervisor::new("probe", bus);
        run_jobs(&supervisor, cell.background());
        supervisor.open();

        let message = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match message {
            DeviceMessage::Error { message, .. } => assert!(message.contains("probe disconnected")),
            other => panic!("unexpected message {other:?}"),
        }
        supervisor.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn should_tick_timer() {
        let clock = timer(Duration::from_secs(1));
        let before = clock.get();
        let supervisor = Supervisor::new("clock", MessageBus::default());
        run_jobs(&supervisor, clock.background());
        supervisor.open();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(clock.get() >= before);
        supervisor.close().await;
    }
}
