//! Cells mirroring a property of another device.

use std::sync::{Arc, Mutex, PoisonError};

use labhub_domain::converter::Converter;
use labhub_domain::message::DeviceMessage;
use tokio::sync::broadcast::error::RecvError;

use super::slot::Slot;
use super::{CellId, CellJob, CellStream, MutableCell, MutableStateCell, StateCell};
use crate::ports::Device;
use crate::supervisor::{Launcher, Scope};

struct Inner<T> {
    slot: Slot<T>,
    source: Arc<dyn Device>,
    property: String,
    converter: Converter<T>,
    scope: Mutex<Option<Scope>>,
}

struct MirrorCell<T> {
    id: CellId,
    inner: Arc<Inner<T>>,
}

impl<T: Clone + Send + Sync + 'static> MirrorCell<T> {
    fn launcher(&self) -> Launcher {
        let inner = Arc::clone(&self.inner);
        Arc::new(move |scope: &Scope| {
            *inner.scope.lock().unwrap_or_else(PoisonError::into_inner) = Some(scope.clone());
            // subscribe before the refresh so no change slips in between
            let mut messages = inner.source.subscribe();
            let inner = Arc::clone(&inner);
            scope.spawn(&format!("mirror {}", inner.property), async move {
                let current = inner.source.read_property(&inner.property).await?;
                inner.slot.set(inner.converter.decode(&current)?);
                loop {
                    match messages.recv().await {
                        Ok(DeviceMessage::PropertyChanged { property, value, .. })
                            if property == inner.property =>
                        {
                            match inner.converter.decode(&value) {
                                Ok(decoded) => inner.slot.set(decoded),
                                Err(err) => {
                                    tracing::warn!(property = %inner.property, %err, "mirrored value rejected");
                                }
                            }
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(property = %inner.property, skipped, "mirror lagged behind source");
                        }
                        Err(RecvError::Closed) => return Ok(()),
                    }
                }
            });
        })
    }
}

impl<T: Clone + Send + Sync + 'static> StateCell<T> for MirrorCell<T> {
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
            launcher: self.launcher(),
        }]
    }
}

impl<T: Clone + Send + Sync + 'static> MutableStateCell<T> for MirrorCell<T> {
    fn set(&self, value: T) {
        let scope = self
            .inner
            .scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(scope) = scope.filter(|scope| !scope.is_cancelled()) else {
            tracing::warn!(property = %self.inner.property, "mirror is not attached to a running device, write dropped");
            return;
        };
        let inner = Arc::clone(&self.inner);
        let encoded = inner.converter.encode(&value);
        scope.spawn(&format!("write {}", inner.property), async move {
            inner.source.write_property(&inner.property, encoded).await?;
            Ok(())
        });
    }
}

/// Cell bound to `property` of `source`.
///
/// While the owning device runs, the cell follows every `PropertyChanged`
/// message of the source. `set` issues `write_property` on the source
/// asynchronously; the local value only changes once the source reports it.
pub fn mirror<T>(
    source: Arc<dyn Device>,
    property: impl Into<String>,
    converter: Converter<T>,
    initial: T,
) -> MutableCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    Arc::new(MirrorCell {
        id: CellId::next(),
        inner: Arc::new(Inner {
            slot: Slot::new(initial),
            source,
            property: property.into(),
            converter,
            scope: Mutex::new(None),
        }),
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use labhub_domain::converter::native;
    use labhub_domain::descriptor::PropertyDescriptor;
    use tokio_stream::StreamExt;

    use super::*;
    use crate::cell::mutable;
    use crate::device::LocalDevice;

    #[tokio::test]
    async fn should_follow_source_property() {
        let source = Arc::new(LocalDevice::new("source"));
        let level = source
            .register_property(PropertyDescriptor::new("level"), native::<i64>(), mutable(3_i64))
            .unwrap();
        source.start().await.unwrap();

        let follower = LocalDevice::new("follower");
        let mirrored = mirror(source.clone() as Arc<dyn Device>, "level", native::<i64>(), 0);
        follower.attach(mirrored.clone());
        follower.start().await.unwrap();

        let mut values = mirrored.subscribe();
        let first = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if values.next().await == Some(3) {
                    break;
                }
            }
        })
        .await;
        assert!(first.is_ok());

        level.set(9).unwrap();
        let next = tokio::time::timeout(Duration::from_secs(1), values.next())
            .await
            .unwrap();
        assert_eq!(next, Some(9));

        follower.stop().await;
        source.stop().await;
    }

    #[tokio::test]
    async fn should_write_through_to_source() {
        let source = Arc::new(LocalDevice::new("source"));
        let level = source
            .register_property(PropertyDescriptor::new("level"), native::<i64>(), mutable(0_i64))
            .unwrap();
        source.start().await.unwrap();

        let follower = LocalDevice::new("follower");
        let mirrored = mirror(source.clone() as Arc<dyn Device>, "level", native::<i64>(), 0);
        follower.attach(mirrored.clone());
        follower.start().await.unwrap();

        mirrored.set(42);
        let written = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if level.get() == 42 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(written.is_ok());

        follower.stop().await;
        source.stop().await;
    }
}
