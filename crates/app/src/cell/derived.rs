//! Read-only cells computed from other cells.
//!
//! A derived cell is a node of the graph: it owns a slot holding its latest
//! value and a single recompute job that subscribes to the upstream cells
//! once, applies `f` once per upstream emission and publishes the result.
//! Subscribers of the cell, downstream derived cells included, read from that
//! slot and never run `f` themselves.
//!
//! `get` always recomputes from the upstream values, so a read is never
//! stale even while the owning device is stopped. Emissions only flow while
//! the cell is attached to a running device.

use std::sync::Arc;

use tokio_stream::{StreamExt, StreamMap};

use super::slot::Slot;
use super::{Cell, CellId, CellJob, CellRef, CellStream, StateCell};
use crate::supervisor::{Launcher, Scope};

type Compute<R> = Box<dyn Fn() -> R + Send + Sync>;
type Source<R> = Box<dyn Fn() -> CellStream<R> + Send + Sync>;

struct Node<R> {
    slot: Slot<R>,
    /// Held by the task currently feeding the slot.
    feeding: tokio::sync::Mutex<()>,
    /// Fresh value from the current upstream values.
    compute: Compute<R>,
    /// One recomputed value per upstream emission, starting with a replay.
    source: Source<R>,
}

struct DerivedCell<R> {
    id: CellId,
    node: Arc<Node<R>>,
    dependencies: Vec<CellId>,
    upstream_jobs: Vec<CellJob>,
}

impl<R: Clone + Send + Sync + 'static> DerivedCell<R> {
    fn new(dependencies: Vec<CellId>, upstream_jobs: Vec<CellJob>, compute: Compute<R>, source: Source<R>) -> Self {
        Self {
            id: CellId::next(),
            node: Arc::new(Node {
                slot: Slot::new(compute()),
                feeding: tokio::sync::Mutex::new(()),
                compute,
                source,
            }),
            dependencies,
            upstream_jobs,
        }
    }

    fn recompute_launcher(&self) -> Launcher {
        let id = self.id;
        let node = Arc::clone(&self.node);
        Arc::new(move |scope: &Scope| {
            // subscribe before the refresh so no change slips in between
            let mut values = (node.source)();
            node.slot.replace((node.compute)());
            let node = Arc::clone(&node);
            scope.spawn(&format!("recompute {id}"), async move {
                let _feeding = match node.feeding.try_lock() {
                    Ok(guard) => guard,
                    Err(_) => {
                        tracing::debug!(cell = %id, "derived cell fed by another device, waiting");
                        let guard = node.feeding.lock().await;
                        values = (node.source)();
                        node.slot.replace((node.compute)());
                        guard
                    }
                };
                // the replayed value is already in the slot
                values.next().await;
                while let Some(value) = values.next().await {
                    node.slot.set(value);
                }
                Ok(())
            });
        })
    }
}

impl<R: Clone + Send + Sync + 'static> StateCell<R> for DerivedCell<R> {
    fn id(&self) -> CellId {
        self.id
    }

    fn get(&self) -> R {
        (self.node.compute)()
    }

    fn subscribe(&self) -> CellStream<R> {
        self.node.slot.subscribe()
    }

    fn dependencies(&self) -> Vec<CellId> {
        self.dependencies.clone()
    }

    fn background(&self) -> Vec<CellJob> {
        let mut jobs = self.upstream_jobs.clone();
        jobs.push(CellJob {
            cell: self.id,
            launcher: self.recompute_launcher(),
        });
        jobs
    }
}

/// Derive a read-only cell by applying `f` to every upstream value.
///
/// `f` runs at construction and when the cell is attached to a starting
/// device, then once per upstream emission while that device runs, plus on
/// every `get`.
#[must_use]
pub fn map<A, B, F>(upstream: impl Into<CellRef<A>>, f: F) -> Cell<B>
where
    A: 'static,
    B: Clone + Send + Sync + 'static,
    F: Fn(&A) -> B + Send + Sync + 'static,
{
    let upstream = upstream.into().to_cell();
    let f = Arc::new(f);

    let compute = {
        let upstream = Arc::clone(&upstream);
        let f = Arc::clone(&f);
        Box::new(move || f(&upstream.get())) as Compute<B>
    };
    let source = {
        let upstream = Arc::clone(&upstream);
        Box::new(move || -> CellStream<B> {
            let f = Arc::clone(&f);
            Box::pin(upstream.subscribe().map(move |value| f(&value)))
        }) as Source<B>
    };

    Arc::new(DerivedCell::new(
        vec![upstream.id()],
        upstream.background(),
        compute,
        source,
    ))
}

enum Side<A, B> {
    Left(A),
    Right(B),
}

/// Derive a read-only cell from two upstream cells.
///
/// Every emission of either side recomputes once, paired with the latest
/// value of the other side. Simultaneous changes on both sides are seen one
/// after the other, never atomically.
#[must_use]
pub fn combine<A, B, R, F>(left: impl Into<CellRef<A>>, right: impl Into<CellRef<B>>, f: F) -> Cell<R>
where
    A: Send + 'static,
    B: Send + 'static,
    R: Clone + Send + Sync + 'static,
    F: Fn(&A, &B) -> R + Send + Sync + 'static,
{
    let left = left.into().to_cell();
    let right = right.into().to_cell();
    let f = Arc::new(f);

    let compute = {
        let (left, right) = (Arc::clone(&left), Arc::clone(&right));
        let f = Arc::clone(&f);
        Box::new(move || f(&left.get(), &right.get())) as Compute<R>
    };
    let source = {
        let (left, right) = (Arc::clone(&left), Arc::clone(&right));
        Box::new(move || -> CellStream<R> {
            let changes = left.subscribe().map(Side::Left).merge(right.subscribe().map(Side::Right));
            let f = Arc::clone(&f);
            let mut latest: (Option<A>, Option<B>) = (None, None);
            Box::pin(changes.filter_map(move |side| {
                match side {
                    Side::Left(value) => latest.0 = Some(value),
                    Side::Right(value) => latest.1 = Some(value),
                }
                match &latest {
                    (Some(a), Some(b)) => Some(f(a, b)),
                    _ => None,
                }
            }))
        }) as Source<R>
    };

    let mut jobs = left.background();
    jobs.extend(right.background());
    Arc::new(DerivedCell::new(vec![left.id(), right.id()], jobs, compute, source))
}

/// Derive a read-only cell from any number of cells of the same type.
///
/// With no upstream cell, `f` is applied to an empty slice.
#[must_use]
pub fn combine_all<T, R, F>(cells: impl IntoIterator<Item = Cell<T>>, f: F) -> Cell<R>
where
    T: Clone + Send + 'static,
    R: Clone + Send + Sync + 'static,
    F: Fn(&[T]) -> R + Send + Sync + 'static,
{
    let upstream: Arc<[Cell<T>]> = cells.into_iter().collect();
    let f = Arc::new(f);

    let compute = {
        let upstream = Arc::clone(&upstream);
        let f = Arc::clone(&f);
        Box::new(move || {
            let values: Vec<T> = upstream.iter().map(|cell| cell.get()).collect();
            f(&values)
        }) as Compute<R>
    };
    let source = {
        let upstream = Arc::clone(&upstream);
        Box::new(move || -> CellStream<R> {
            let f = Arc::clone(&f);
            if upstream.is_empty() {
                return Box::pin(tokio_stream::once(f(&[])));
            }
            let mut streams = StreamMap::new();
            for (index, cell) in upstream.iter().enumerate() {
                streams.insert(index, cell.subscribe());
            }
            let mut latest: Vec<Option<T>> = vec![None; upstream.len()];
            Box::pin(streams.filter_map(move |(index, value)| {
                latest[index] = Some(value);
                let values: Option<Vec<T>> = latest.iter().cloned().collect();
                values.map(|values| f(&values))
            }))
        }) as Source<R>
    };

    let dependencies = upstream.iter().map(|cell| cell.id()).collect();
    let jobs = upstream.iter().flat_map(|cell| cell.background()).collect();
    Arc::new(DerivedCell::new(dependencies, jobs, compute, source))
}

struct ConstantCell<T> {
    id: CellId,
    value: T,
}

impl<T: Clone + Send + Sync + 'static> StateCell<T> for ConstantCell<T> {
    fn id(&self) -> CellId {
        self.id
    }

    fn get(&self) -> T {
        self.value.clone()
    }

    fn subscribe(&self) -> CellStream<T> {
        Box::pin(tokio_stream::once(self.value.clone()))
    }
}

/// Read-only cell that never changes.
#[must_use]
pub fn constant<T: Clone + Send + Sync + 'static>(value: T) -> Cell<T> {
    Arc::new(ConstantCell {
        id: CellId::next(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::bus::MessageBus;
    use crate::cell::{MutableCell, mutable};
    use crate::supervisor::Supervisor;

    async fn next<T>(stream: &mut CellStream<T>) -> T {
        tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("stream stalled")
            .expect("stream ended")
    }

    fn attach<T>(cells: &[&Cell<T>]) -> Supervisor {
        let supervisor = Supervisor::new("graph", MessageBus::default());
        let mut seen = HashSet::new();
        for cell in cells {
            for job in cell.background() {
                if seen.insert(job.cell) {
                    supervisor.register(job.cell.to_string(), job.launcher);
                }
            }
        }
        supervisor.open();
        supervisor
    }

    #[tokio::test]
    async fn should_compute_mapped_value_on_read() {
        let source = mutable(2_i64);
        let doubled = map(source.clone(), |value: &i64| value * 2);
        assert_eq!(doubled.get(), 4);

        source.set(21);
        assert_eq!(doubled.get(), 42);
    }

    #[tokio::test]
    async fn should_emit_once_per_upstream_change() {
        let source = mutable(1_i64);
        let doubled = map(source.clone(), |value: &i64| value * 2);
        let supervisor = attach(&[&doubled]);
        let mut stream = doubled.subscribe();

        assert_eq!(next(&mut stream).await, 2);
        source.set(3);
        source.set(4);
        assert_eq!(next(&mut stream).await, 6);
        assert_eq!(next(&mut stream).await, 8);
        supervisor.close().await;
    }

    #[tokio::test]
    async fn should_run_function_once_per_emission_for_every_subscriber() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let source = mutable(1_i64);
        let inverse = map(source.clone(), move |value: &i64| {
            counter.fetch_add(1, Ordering::SeqCst);
            100 / *value
        });
        let negated = map(Arc::clone(&inverse), |value: &i64| -value);
        let supervisor = attach(&[&inverse, &negated]);
        let mut first = inverse.subscribe();
        let mut second = inverse.subscribe();
        let mut chained = negated.subscribe();
        assert_eq!(next(&mut chained).await, -100);
        tokio::time::sleep(Duration::from_millis(10)).await;
        calls.store(0, Ordering::SeqCst);

        source.set(4);

        assert_eq!(next(&mut first).await, 100);
        assert_eq!(next(&mut first).await, 25);
        assert_eq!(next(&mut second).await, 100);
        assert_eq!(next(&mut second).await, 25);
        assert_eq!(next(&mut chained).await, -25);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        supervisor.close().await;
    }

    #[tokio::test]
    async fn should_only_replay_while_detached() {
        let source = mutable(1_i64);
        let doubled = map(source.clone(), |value: &i64| value * 2);
        let mut stream = doubled.subscribe();
        assert_eq!(next(&mut stream).await, 2);

        source.set(5);

        let pending = tokio::time::timeout(Duration::from_millis(20), stream.next()).await;
        assert!(pending.is_err());
        assert_eq!(doubled.get(), 10);
    }

    #[tokio::test]
    async fn should_refresh_slot_when_attached() {
        let source = mutable(1_i64);
        let doubled = map(source.clone(), |value: &i64| value * 2);
        source.set(7);

        let supervisor = attach(&[&doubled]);

        let mut stream = doubled.subscribe();
        assert_eq!(next(&mut stream).await, 14);
        supervisor.close().await;
    }

    #[tokio::test]
    async fn should_report_upstream_as_dependency() {
        let source = mutable(1_i64);
        let derived = map(source.clone(), |value: &i64| *value);
        assert_eq!(derived.dependencies(), vec![source.id()]);
    }

    #[tokio::test]
    async fn should_recompute_combination_on_either_side() {
        let a: MutableCell<i64> = mutable(1);
        let b: MutableCell<i64> = mutable(10);
        let sum = combine(a.clone(), b.clone(), |a: &i64, b: &i64| a + b);
        assert_eq!(sum.get(), 11);
        let supervisor = attach(&[&sum]);

        let mut stream = sum.subscribe();
        assert_eq!(next(&mut stream).await, 11);
        tokio::time::sleep(Duration::from_millis(10)).await;

        a.set(2);
        assert_eq!(next(&mut stream).await, 12);
        b.set(20);
        assert_eq!(next(&mut stream).await, 22);
        assert_eq!(sum.dependencies(), vec![a.id(), b.id()]);
        supervisor.close().await;
    }

    #[tokio::test]
    async fn should_combine_many_cells() {
        let cells: Vec<MutableCell<i64>> = (1..=3).map(mutable).collect();
        let total = combine_all(
            cells.iter().map(|cell| Arc::clone(cell) as Cell<i64>),
            |values: &[i64]| values.iter().sum::<i64>(),
        );
        assert_eq!(total.get(), 6);
        let supervisor = attach(&[&total]);

        let mut stream = total.subscribe();
        assert_eq!(next(&mut stream).await, 6);
        tokio::time::sleep(Duration::from_millis(10)).await;
        cells[1].set(20);
        assert_eq!(next(&mut stream).await, 24);
        supervisor.close().await;
    }

    #[tokio::test]
    async fn should_apply_function_to_empty_slice_when_no_cells() {
        let count = combine_all(Vec::<Cell<i64>>::new(), <[i64]>::len);
        assert_eq!(count.get(), 0);
        let mut stream = count.subscribe();
        assert_eq!(next(&mut stream).await, 0);
    }

    #[tokio::test]
    async fn should_never_change_constant() {
        let unit = constant("celsius".to_string());
        let mut stream = unit.subscribe();
        assert_eq!(next(&mut stream).await, "celsius");
        assert!(stream.next().await.is_none());
    }
}
