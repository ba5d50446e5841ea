//! Replay-latest storage shared by the concrete cells.

use std::sync::{Mutex, PoisonError};

use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use super::CellStream;

const SLOT_CAPACITY: usize = 256;

/// Current value plus a change channel.
///
/// The value and the channel are updated under one lock so that a subscriber
/// never misses nor duplicates the change racing with its subscription.
pub(crate) struct Slot<T> {
    value: Mutex<T>,
    sender: broadcast::Sender<T>,
}

impl<T: Clone + Send + Sync + 'static> Slot<T> {
    pub(crate) fn new(initial: T) -> Self {
        let (sender, _) = broadcast::channel(SLOT_CAPACITY);
        Self {
            value: Mutex::new(initial),
            sender,
        }
    }

    pub(crate) fn get(&self) -> T {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set(&self, value: T) {
        let mut current = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        *current = value.clone();
        let _ = self.sender.send(value);
    }

    /// Store `value` without notifying subscribers.
    pub(crate) fn replace(&self, value: T) {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = value;
    }

    pub(crate) fn subscribe(&self) -> CellStream<T> {
        let (current, receiver) = {
            let guard = self.value.lock().unwrap_or_else(PoisonError::into_inner);
            (guard.clone(), self.sender.subscribe())
        };
        let changes = BroadcastStream::new(receiver).filter_map(|item| match item {
            Ok(value) => Some(value),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "cell subscriber lagged behind");
                None
            }
        });
        Box::pin(tokio_stream::once(current).chain(changes))
    }
}
