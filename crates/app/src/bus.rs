//! Per-device message bus backed by a tokio broadcast channel.
//!
//! The bus is deliberately **no-replay**: a subscriber only receives messages
//! published after it subscribed. This is the opposite of a cell subscription,
//! which always starts with the current value.

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};

use labhub_domain::message::DeviceMessage;

/// Default ring size of a device bus.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Multicast channel of [`DeviceMessage`]s.
///
/// Publishing succeeds even when there are no active subscribers
/// (the message is simply dropped). Cloning yields another handle to the
/// same channel.
#[derive(Debug, Clone)]
pub struct MessageBus {
    sender: broadcast::Sender<DeviceMessage>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl MessageBus {
    /// Create a new bus with the given channel capacity (at least 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a message to all current subscribers.
    pub fn publish(&self, message: DeviceMessage) {
        // Fails only when there are zero receivers.
        let _ = self.sender.send(message);
    }

    /// Subscribe to messages published *after* this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceMessage> {
        self.sender.subscribe()
    }

    /// Subscribe as a stream. Lagged receivers skip the overwritten messages.
    pub fn stream(&self) -> impl Stream<Item = DeviceMessage> + Send + 'static {
        BroadcastStream::new(self.sender.subscribe()).filter_map(|item| match item {
            Ok(message) => Some(message),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "bus subscriber lagged behind");
                None
            }
        })
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
