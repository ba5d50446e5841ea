//! Type-erased registry entries.
//!
//! The registries store properties and actions of any native type behind
//! these traits; the converter kept in each entry is the only place where a
//! native value becomes a wire [`Value`] and back.

use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use labhub_domain::converter::Converter;
use labhub_domain::descriptor::{ActionDescriptor, PropertyDescriptor};
use labhub_domain::error::ControlError;
use labhub_domain::value::Value;

use crate::BoxFuture;
use crate::cell::CellRef;
use crate::supervisor::panic_message;

pub(super) trait PropertyEntry: Send + Sync {
    fn descriptor(&self) -> &PropertyDescriptor;

    /// Encoded current value. A panicking cell becomes an internal error.
    fn read(&self) -> Result<Value, ControlError>;

    fn write(&self, value: &Value) -> Result<(), ControlError>;
}

pub(super) struct TypedProperty<T> {
    descriptor: PropertyDescriptor,
    converter: Converter<T>,
    cell: CellRef<T>,
}

impl<T> TypedProperty<T> {
    pub(super) fn new(descriptor: PropertyDescriptor, converter: Converter<T>, cell: CellRef<T>) -> Self {
        Self {
            descriptor,
            converter,
            cell,
        }
    }
}

impl<T: Clone + Send + Sync + 'static> PropertyEntry for TypedProperty<T> {
    fn descriptor(&self) -> &PropertyDescriptor {
        &self.descriptor
    }

    fn read(&self) -> Result<Value, ControlError> {
        let value = self.contain("reading", || self.cell.get())?;
        Ok(self.converter.encode(&value))
    }

    fn write(&self, value: &Value) -> Result<(), ControlError> {
        let cell = self
            .cell
            .as_mutable()
            .ok_or_else(|| ControlError::ReadOnlyProperty(self.descriptor.name.clone()))?;
        let decoded = self.converter.decode(value)?;
        self.contain("writing", || cell.set(decoded))
    }
}

impl<T> TypedProperty<T> {
    /// Run user code of the cell (derived functions, set callbacks) without
    /// letting a panic reach the caller.
    fn contain<R>(&self, operation: &str, f: impl FnOnce() -> R) -> Result<R, ControlError> {
        catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
            let reason = panic_message(payload);
            tracing::error!(property = %self.descriptor.name, operation, %reason, "property cell panicked");
            ControlError::Internal(anyhow::anyhow!(
                "{operation} property {} panicked: {reason}",
                self.descriptor.name
            ))
        })
    }
}

pub(super) trait ActionEntry: Send + Sync {
    fn descriptor(&self) -> &ActionDescriptor;

    /// Decode the argument and build the action future. Decoding fails
    /// before anything runs.
    fn invoke(&self, argument: &Value) -> Result<BoxFuture<'static, anyhow::Result<Value>>, ControlError>;
}

type Body<T, R> = Arc<dyn Fn(T) -> BoxFuture<'static, anyhow::Result<R>> + Send + Sync>;

pub(super) struct TypedAction<T, R> {
    descriptor: ActionDescriptor,
    input: Converter<T>,
    output: Converter<R>,
    body: Body<T, R>,
}

impl<T: Send + 'static, R: Send + 'static> TypedAction<T, R> {
    pub(super) fn new<F, Fut>(
        descriptor: ActionDescriptor,
        input: Converter<T>,
        output: Converter<R>,
        body: F,
    ) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let body: Body<T, R> = Arc::new(move |argument: T| -> BoxFuture<'static, anyhow::Result<R>> {
            Box::pin(body(argument))
        });
        Self {
            descriptor,
            input,
            output,
            body,
        }
    }
}

impl<T: Send + 'static, R: Send + 'static> ActionEntry for TypedAction<T, R> {
    fn descriptor(&self) -> &ActionDescriptor {
        &self.descriptor
    }

    fn invoke(&self, argument: &Value) -> Result<BoxFuture<'static, anyhow::Result<Value>>, ControlError> {
        let argument = self.input.decode(argument)?;
        let running = (self.body)(argument);
        let output = Arc::clone(&self.output);
        Ok(Box::pin(async move {
            let result = running.await?;
            Ok(output.encode(&result))
        }))
    }
}
