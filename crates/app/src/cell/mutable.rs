use std::ops::RangeInclusive;
use std::sync::Arc;

use super::derived::map;
use super::slot::Slot;
use super::{Cell, CellId, CellStream, MutableCell, MutableStateCell, StateCell};

type SetCallback<T> = Box<dyn Fn(&T) + Send + Sync>;

/// In-memory authoritative cell.
///
/// Every `set` stores the value, notifies subscribers and then fires the
/// optional callback synchronously. Used to model actuators whose state is
/// owned by the process.
pub struct VirtualCell<T> {
    id: CellId,
    slot: Slot<T>,
    callback: Option<SetCallback<T>>,
}

impl<T: Clone + Send + Sync + 'static> VirtualCell<T> {
    #[must_use]
    pub fn new(initial: T) -> Self {
        Self {
            id: CellId::next(),
            slot: Slot::new(initial),
            callback: None,
        }
    }

    #[must_use]
    pub fn with_callback(initial: T, callback: impl Fn(&T) + Send + Sync + 'static) -> Self {
        Self {
            callback: Some(Box::new(callback)),
            ..Self::new(initial)
        }
    }
}

impl<T: Clone + Send + Sync + 'static> StateCell<T> for VirtualCell<T> {
    fn id(&self) -> CellId {
        self.id
    }

    fn get(&self) -> T {
        self.slot.get()
    }

    fn subscribe(&self) -> CellStream<T> {
        self.slot.subscribe()
    }
}

impl<T: Clone + Send + Sync + 'static> MutableStateCell<T> for VirtualCell<T> {
    fn set(&self, value: T) {
        match &self.callback {
            Some(callback) => {
                self.slot.set(value.clone());
                callback(&value);
            }
            None => self.slot.set(value),
        }
    }
}

/// Plain mutable cell.
#[must_use]
pub fn mutable<T: Clone + Send + Sync + 'static>(initial: T) -> MutableCell<T> {
    Arc::new(VirtualCell::new(initial))
}

/// Mutable cell firing `callback` after every `set`.
#[must_use]
pub fn virtual_cell<T, F>(initial: T, callback: F) -> MutableCell<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(&T) + Send + Sync + 'static,
{
    Arc::new(VirtualCell::with_callback(initial, callback))
}

/// Float cell keeping its value inside a closed range.
///
/// Writes outside the range are clamped, never rejected.
pub struct ClampedCell {
    id: CellId,
    slot: Slot<f64>,
    range: RangeInclusive<f64>,
}

impl ClampedCell {
    #[must_use]
    pub fn range(&self) -> &RangeInclusive<f64> {
        &self.range
    }

    fn clamp(&self, value: f64) -> f64 {
        value.clamp(*self.range.start(), *self.range.end())
    }

    /// Mutable handle on this cell.
    #[must_use]
    pub fn handle(self: &Arc<Self>) -> MutableCell<f64> {
        Arc::clone(self) as MutableCell<f64>
    }

    /// `true` while the value sits on the lower bound.
    #[must_use]
    pub fn at_start(self: &Arc<Self>) -> Cell<bool> {
        let start = *self.range.start();
        map(self.handle(), move |value: &f64| *value <= start)
    }

    /// `true` while the value sits on the upper bound.
    #[must_use]
    pub fn at_end(self: &Arc<Self>) -> Cell<bool> {
        let end = *self.range.end();
        map(self.handle(), move |value: &f64| *value >= end)
    }
}

impl StateCell<f64> for ClampedCell {
    fn id(&self) -> CellId {
        self.id
    }

    fn get(&self) -> f64 {
        self.slot.get()
    }

    fn subscribe(&self) -> CellStream<f64> {
        self.slot.subscribe()
    }
}

impl MutableStateCell<f64> for ClampedCell {
    fn set(&self, value: f64) {
        self.slot.set(self.clamp(value));
    }
}

/// Create a [`ClampedCell`]. The initial value is clamped too.
///
/// A reversed range is normalized.
#[must_use]
pub fn clamped(initial: f64, range: RangeInclusive<f64>) -> Arc<ClampedCell> {
    let (low, high) = (*range.start(), *range.end());
    let (low, high) = if low <= high { (low, high) } else { (high, low) };
    Arc::new(ClampedCell {
        id: CellId::next(),
        slot: Slot::new(initial.clamp(low, high)),
        range: low..=high,
    })
}
