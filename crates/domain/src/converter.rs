//! Value converters — the only seam through which a native `T` crosses the
//! device boundary.
//!
//! A device stores a [`ValueConverter`] next to every registered property and
//! action. Reads encode the native cell value into a [`Value`]; writes and
//! action arguments decode a [`Value`] back into `T`.

use std::marker::PhantomData;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::ConversionError;
use crate::value::Value;

/// Bidirectional mapping between `T` and [`Value`].
pub trait ValueConverter<T>: Send + Sync {
    /// Encode a native value.
    fn encode(&self, obj: &T) -> Value;

    /// Decode a wire value.
    ///
    /// # Errors
    ///
    /// Returns a [`ConversionError`] when `value` has the wrong shape.
    fn decode(&self, value: &Value) -> Result<T, ConversionError>;
}

/// Shared, type-erased converter handle as stored in registries.
pub type Converter<T> = Arc<dyn ValueConverter<T>>;

/// Types with a canonical representation as a [`Value`].
pub trait NativeValue: Sized {
    fn to_value(&self) -> Value;

    /// # Errors
    ///
    /// Returns a [`ConversionError`] when `value` has the wrong shape.
    fn from_value(value: &Value) -> Result<Self, ConversionError>;
}

/// Converter for any [`NativeValue`].
pub struct Native<T>(PhantomData<fn() -> T>);

impl<T> Native<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for Native<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: NativeValue> ValueConverter<T> for Native<T> {
    fn encode(&self, obj: &T) -> Value {
        obj.to_value()
    }

    fn decode(&self, value: &Value) -> Result<T, ConversionError> {
        T::from_value(value)
    }
}

/// Shared converter for a [`NativeValue`] type.
#[must_use]
pub fn native<T: NativeValue + 'static>() -> Converter<T> {
    Arc::new(Native::<T>::new())
}

/// Converter for arbitrary serde types, going through the value tree.
///
/// Types whose serialization fails (a map with non-string keys, say) encode
/// as [`Value::Null`] and the failure is logged.
pub struct Serde<T>(PhantomData<fn() -> T>);

impl<T> Default for Serde<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T: Serialize + DeserializeOwned> ValueConverter<T> for Serde<T> {
    fn encode(&self, obj: &T) -> Value {
        match serde_json::to_value(obj) {
            Ok(value) => Value::from(value),
            Err(err) => {
                tracing::warn!(error = %err, "value not representable, encoded as null");
                Value::Null
            }
        }
    }

    fn decode(&self, value: &Value) -> Result<T, ConversionError> {
        serde_json::from_value(serde_json::Value::from(value.clone()))
            .map_err(|err| ConversionError::new("a serde-compatible structure", err))
    }
}

/// Shared converter for a serde type.
#[must_use]
pub fn structured<T: Serialize + DeserializeOwned + 'static>() -> Converter<T> {
    Arc::new(Serde::<T>::default())
}

/// Float converter that clamps decoded values into a range.
pub struct Clamped {
    range: RangeInclusive<f64>,
}

impl Clamped {
    #[must_use]
    pub fn new(range: RangeInclusive<f64>) -> Self {
        Self { range }
    }
}

impl ValueConverter<f64> for Clamped {
    fn encode(&self, obj: &f64) -> Value {
        Value::Float(*obj)
    }

    fn decode(&self, value: &Value) -> Result<f64, ConversionError> {
        let raw = f64::from_value(value)?;
        Ok(raw.clamp(*self.range.start(), *self.range.end()))
    }
}

impl NativeValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }

    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        Ok(value.clone())
    }
}

impl NativeValue for () {
    fn to_value(&self) -> Value {
        Value::Null
    }

    fn from_value(_value: &Value) -> Result<Self, ConversionError> {
        Ok(())
    }
}

impl NativeValue for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        value
            .as_bool()
            .ok_or_else(|| ConversionError::new("a bool", value.type_name()))
    }
}

impl NativeValue for f64 {
    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        value
            .as_f64()
            .ok_or_else(|| ConversionError::new("a number", value.type_name()))
    }
}

impl NativeValue for i64 {
    fn to_value(&self) -> Value {
        Value::Int(*self)
    }

    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        value
            .as_i64()
            .ok_or_else(|| ConversionError::new("an integer", value.type_name()))
    }
}

impl NativeValue for i32 {
    fn to_value(&self) -> Value {
        Value::Int(i64::from(*self))
    }

    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        let wide = i64::from_value(value)?;
        i32::try_from(wide).map_err(|_| ConversionError::new("a 32-bit integer", wide))
    }
}

impl NativeValue for u32 {
    fn to_value(&self) -> Value {
        Value::Int(i64::from(*self))
    }

    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        let wide = i64::from_value(value)?;
        u32::try_from(wide).map_err(|_| ConversionError::new("an unsigned 32-bit integer", wide))
    }
}

impl NativeValue for String {
    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }

    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ConversionError::new("a string", value.type_name()))
    }
}

impl NativeValue for Duration {
    fn to_value(&self) -> Value {
        Value::Float(self.as_secs_f64())
    }

    /// Accepts plain seconds or `{ "value": n, "unit": "ms" | "s" | "us" | "min" }`.
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        let (amount, unit) = match value {
            Value::Object(_) => {
                let amount = value
                    .get("value")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| ConversionError::new("a duration amount", value))?;
                let unit = value.get("unit").and_then(Value::as_str).unwrap_or("s");
                (amount, unit)
            }
            other => (f64::from_value(other)?, "s"),
        };
        let seconds = match unit {
            "us" => amount / 1_000_000.0,
            "ms" => amount / 1_000.0,
            "s" => amount,
            "min" => amount * 60.0,
            other => return Err(ConversionError::new("a duration unit", other)),
        };
        Duration::try_from_secs_f64(seconds)
            .map_err(|_| ConversionError::new("a non-negative duration", seconds))
    }
}

impl NativeValue for DateTime<Utc> {
    fn to_value(&self) -> Value {
        Value::String(self.to_rfc3339())
    }

    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        let raw = String::from_value(value)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|_| ConversionError::new("an RFC 3339 timestamp", raw))
    }
}

impl<T: NativeValue> NativeValue for Vec<T> {
    fn to_value(&self) -> Value {
        Value::List(self.iter().map(NativeValue::to_value).collect())
    }

    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        value
            .as_list()
            .ok_or_else(|| ConversionError::new("a list", value.type_name()))?
            .iter()
            .map(T::from_value)
            .collect()
    }
}

impl<T: NativeValue> NativeValue for Option<T> {
    fn to_value(&self) -> Value {
        self.as_ref().map_or(Value::Null, NativeValue::to_value)
    }

    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => n.as_f64().map_or(Self::Null, Self::Float),
            },
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            serde_json::Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Int(i) => Self::from(i),
            Value::Float(f) => serde_json::Number::from_f64(f).map_or(Self::Null, Self::Number),
            Value::String(s) => Self::String(s),
            Value::List(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect()),
        }
    }
}
