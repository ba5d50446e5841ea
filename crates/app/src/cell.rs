//! Reactive state cells.
//!
//! A cell holds a current value of type `T` and exposes a replaying stream of
//! changes: a new subscriber first receives the current value, then every
//! later change. Derived cells (`map`, `combine`, `combine_all`) recompute
//! from their upstream cells on read, and once per upstream emission into
//! their own slot.
//!
//! Cells that need background work (polling an external source, mirroring a
//! remote property, feeding a derived cell) declare it as [`CellJob`]s. The job runs inside the scope
//! of the device the cell is attached to; a detached cell does no background
//! work.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_stream::Stream;

use crate::supervisor::Launcher;

mod derived;
mod external;
mod mirror;
mod mutable;
mod slot;

pub use derived::{combine, combine_all, constant, map};
pub use external::{ExternalCell, external, external_mutable, timer};
pub use mirror::mirror;
pub use mutable::{ClampedCell, VirtualCell, clamped, mutable, virtual_cell};

/// Boxed stream of cell values.
pub type CellStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// Process-unique identity of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(u64);

impl CellId {
    /// Allocate the next identity.
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell#{}", self.0)
    }
}

/// Background work a cell needs while its device runs.
#[derive(Clone)]
pub struct CellJob {
    /// Cell owning the job. A device runs each cell's jobs at most once.
    pub cell: CellId,
    pub launcher: Launcher,
}

impl fmt::Debug for CellJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellJob").field("cell", &self.cell).finish_non_exhaustive()
    }
}

/// Read side of a cell.
pub trait StateCell<T>: Send + Sync {
    fn id(&self) -> CellId;

    /// Current value.
    fn get(&self) -> T;

    /// Stream yielding the current value, then every later change.
    fn subscribe(&self) -> CellStream<T>;

    /// Identities of the cells this one is derived from.
    fn dependencies(&self) -> Vec<CellId> {
        Vec::new()
    }

    /// Jobs to run in the scope of the owning device.
    fn background(&self) -> Vec<CellJob> {
        Vec::new()
    }
}

/// Cell accepting external writes.
pub trait MutableStateCell<T>: StateCell<T> {
    fn set(&self, value: T);
}

/// Shared read-only cell handle.
pub type Cell<T> = Arc<dyn StateCell<T>>;

/// Shared mutable cell handle.
pub type MutableCell<T> = Arc<dyn MutableStateCell<T>>;

/// A cell as handed to a device registry, remembering whether it accepts
/// writes.
pub enum CellRef<T> {
    ReadOnly(Cell<T>),
    Mutable(MutableCell<T>),
}

impl<T> Clone for CellRef<T> {
    fn clone(&self) -> Self {
        match self {
            Self::ReadOnly(cell) => Self::ReadOnly(Arc::clone(cell)),
            Self::Mutable(cell) => Self::Mutable(Arc::clone(cell)),
        }
    }
}

impl<T: 'static> CellRef<T> {
    #[must_use]
    pub fn id(&self) -> CellId {
        match self {
            Self::ReadOnly(cell) => cell.id(),
            Self::Mutable(cell) => cell.id(),
        }
    }

    #[must_use]
    pub fn get(&self) -> T {
        match self {
            Self::ReadOnly(cell) => cell.get(),
            Self::Mutable(cell) => cell.get(),
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> CellStream<T> {
        match self {
            Self::ReadOnly(cell) => cell.subscribe(),
            Self::Mutable(cell) => cell.subscribe(),
        }
    }

    #[must_use]
    pub fn background(&self) -> Vec<CellJob> {
        match self {
            Self::ReadOnly(cell) => cell.background(),
            Self::Mutable(cell) => cell.background(),
        }
    }

    #[must_use]
    pub fn is_mutable(&self) -> bool {
        matches!(self, Self::Mutable(_))
    }

    /// The writable handle, if any.
    #[must_use]
    pub fn as_mutable(&self) -> Option<&MutableCell<T>> {
        match self {
            Self::Mutable(cell) => Some(cell),
            Self::ReadOnly(_) => None,
        }
    }

    /// Read-only view of the cell.
    #[must_use]
    pub fn to_cell(&self) -> Cell<T> {
        match self {
            Self::ReadOnly(cell) => Arc::clone(cell),
            Self::Mutable(cell) => Arc::clone(cell) as Cell<T>,
        }
    }
}

impl<T> From<Cell<T>> for CellRef<T> {
    fn from(cell: Cell<T>) -> Self {
        Self::ReadOnly(cell)
    }
}

impl<T> From<MutableCell<T>> for CellRef<T> {
    fn from(cell: MutableCell<T>) -> Self {
        Self::Mutable(cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_allocate_distinct_ids() {
        assert_ne!(CellId::next(), CellId::next());
    }

    #[test]
    fn should_display_id_with_prefix() {
        let id = CellId::next();
        assert!(id.to_string().starts_with("cell#"));
    }

    #[tokio::test]
    async fn should_remember_mutability_of_cell_ref() {
        let writable: CellRef<i64> = mutable(1_i64).into();
        let readonly: CellRef<i64> = constant(1_i64).into();
        assert!(writable.is_mutable());
        assert!(writable.as_mutable().is_some());
        assert!(!readonly.is_mutable());
        assert_eq!(readonly.to_cell().get(), 1);
    }
}
