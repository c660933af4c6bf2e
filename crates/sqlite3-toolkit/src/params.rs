//! Bindable parameter values.

use std::borrow::Cow;
use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use time::OffsetDateTime;

/// 100-nanosecond ticks per millisecond.
pub const TICKS_PER_MILLISECOND: i64 = 10_000;

/// Milliseconds between 1601-01-01T00:00:00Z (the tick epoch) and the Unix epoch.
pub const UNIX_EPOCH_OFFSET_MS: i64 = 11_644_473_600_000;

/// One value that can be bound to a statement parameter.
///
/// `Timestamp` carries 100-nanosecond ticks since 1601-01-01T00:00:00Z and is
/// stored as integer milliseconds since the Unix epoch. The conversion truncates
/// to millisecond precision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum ParameterValue {
   Null,
   Integer(i64),
   Real(f64),
   Text(String),
   Boolean(bool),
   Timestamp(i64),
   Blob(Vec<u8>),
}

impl ParameterValue {
   /// Builds a `Timestamp` from milliseconds since the Unix epoch.
   ///
   /// Values beyond the tick range clamp to `i64::MIN` / `i64::MAX` ticks.
   pub fn from_unix_millis(millis: i64) -> Self {
      let ticks = millis
         .saturating_add(UNIX_EPOCH_OFFSET_MS)
         .saturating_mul(TICKS_PER_MILLISECOND);
      ParameterValue::Timestamp(ticks)
   }

   /// Converts timestamp ticks to the stored form: milliseconds since the Unix epoch.
   pub fn ticks_to_unix_millis(ticks: i64) -> i64 {
      ticks / TICKS_PER_MILLISECOND - UNIX_EPOCH_OFFSET_MS
   }

   pub fn type_name(&self) -> &'static str {
      match self {
         ParameterValue::Null => "null",
         ParameterValue::Integer(_) => "integer",
         ParameterValue::Real(_) => "real",
         ParameterValue::Text(_) => "text",
         ParameterValue::Boolean(_) => "boolean",
         ParameterValue::Timestamp(_) => "timestamp",
         ParameterValue::Blob(_) => "blob",
      }
   }
}

impl From<OffsetDateTime> for ParameterValue {
   fn from(value: OffsetDateTime) -> Self {
      let ticks_since_unix = value.unix_timestamp_nanos() / 100;
      let ticks = ticks_since_unix + (UNIX_EPOCH_OFFSET_MS as i128) * (TICKS_PER_MILLISECOND as i128);
      ParameterValue::Timestamp(ticks as i64)
   }
}

impl From<i64> for ParameterValue {
   fn from(value: i64) -> Self {
      ParameterValue::Integer(value)
   }
}

impl From<i32> for ParameterValue {
   fn from(value: i32) -> Self {
      ParameterValue::Integer(value.into())
   }
}

impl From<f64> for ParameterValue {
   fn from(value: f64) -> Self {
      ParameterValue::Real(value)
   }
}

impl From<bool> for ParameterValue {
   fn from(value: bool) -> Self {
      ParameterValue::Boolean(value)
   }
}

impl From<String> for ParameterValue {
   fn from(value: String) -> Self {
      ParameterValue::Text(value)
   }
}

impl From<&str> for ParameterValue {
   fn from(value: &str) -> Self {
      ParameterValue::Text(value.to_string())
   }
}

impl From<Vec<u8>> for ParameterValue {
   fn from(value: Vec<u8>) -> Self {
      ParameterValue::Blob(value)
   }
}

impl<T: Into<ParameterValue>> From<Option<T>> for ParameterValue {
   fn from(value: Option<T>) -> Self {
      value.map_or(ParameterValue::Null, Into::into)
   }
}

/// Conversion of a caller-supplied value into a [`ParameterValue`].
///
/// Returns the value's type name when it has no SQLite representation; binding
/// then fails with [`Error::InvalidParameterType`](crate::Error::InvalidParameterType).
pub trait ToParameter {
   fn to_parameter(&self) -> Result<Cow<'_, ParameterValue>, &'static str>;
}

impl ToParameter for ParameterValue {
   fn to_parameter(&self) -> Result<Cow<'_, ParameterValue>, &'static str> {
      Ok(Cow::Borrowed(self))
   }
}

impl ToParameter for JsonValue {
   fn to_parameter(&self) -> Result<Cow<'_, ParameterValue>, &'static str> {
      let value = match self {
         JsonValue::Null => ParameterValue::Null,
         JsonValue::Bool(b) => ParameterValue::Boolean(*b),
         JsonValue::String(s) => ParameterValue::Text(s.clone()),
         JsonValue::Number(number) => {
            // Preserve integer precision by binding as i64 when possible
            if let Some(int_val) = number.as_i64() {
               ParameterValue::Integer(int_val)
            } else if let Some(uint_val) = number.as_u64() {
               // Too large for i64 (as_i64 failed), use f64 (will lose precision)
               ParameterValue::Real(uint_val as f64)
            } else {
               ParameterValue::Real(number.as_f64().unwrap_or_default())
            }
         }
         JsonValue::Array(_) => return Err("array"),
         JsonValue::Object(_) => return Err("object"),
      };
      Ok(Cow::Owned(value))
   }
}

/// Parameters for one statement: none, by position, or by name.
///
/// Positional values bind to indexes 1, 2, ... in order. Named values are matched
/// against the statement's parameter names with the prefix character (`:`, `@`,
/// `$` or `?`) stripped. A statement parameter with no matching entry is left
/// unbound and reads as NULL; names in the map that the statement does not use
/// are ignored.
#[derive(Debug, Clone, PartialEq)]
pub enum Parameters<P = ParameterValue> {
   None,
   Positional(Vec<P>),
   Named(IndexMap<String, P>),
}

impl<P> Default for Parameters<P> {
   fn default() -> Self {
      Parameters::None
   }
}

impl Parameters {
   pub fn positional<I, V>(values: I) -> Self
   where
      I: IntoIterator<Item = V>,
      V: Into<ParameterValue>,
   {
      Parameters::Positional(values.into_iter().map(Into::into).collect())
   }

   pub fn named<I, K, V>(values: I) -> Self
   where
      I: IntoIterator<Item = (K, V)>,
      K: Into<String>,
      V: Into<ParameterValue>,
   {
      Parameters::Named(
         values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect(),
      )
   }
}

impl<P> Parameters<P> {
   pub fn len(&self) -> usize {
      match self {
         Parameters::None => 0,
         Parameters::Positional(values) => values.len(),
         Parameters::Named(values) => values.len(),
      }
   }

   pub fn is_empty(&self) -> bool {
      self.len() == 0
   }
}

impl<P> From<Vec<P>> for Parameters<P> {
   fn from(values: Vec<P>) -> Self {
      Parameters::Positional(values)
   }
}

impl<P> From<IndexMap<String, P>> for Parameters<P> {
   fn from(values: IndexMap<String, P>) -> Self {
      Parameters::Named(values)
   }
}

impl<P> From<HashMap<String, P>> for Parameters<P> {
   fn from(values: HashMap<String, P>) -> Self {
      Parameters::Named(values.into_iter().collect())
   }
}

/// Strips the one-character prefix from an engine parameter name.
pub(crate) fn strip_prefix(name: &str) -> &str {
   let mut chars = name.chars();
   chars.next();
   chars.as_str()
}
