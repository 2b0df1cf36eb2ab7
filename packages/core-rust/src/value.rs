use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Generic runtime value carried in exchange properties and produced by
/// expression evaluation.
///
/// Supports all JSON-compatible types plus binary data. Conversions exist for
/// `serde_json::Value` (JSON-path results, configuration) and Rhai `Dynamic`
/// (script results), so a value bound by one language can be read by another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent value. Conditions treat it as `false`.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit IEEE 754 floating point.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Ordered sequence of values.
    Array(Vec<Value>),
    /// String-keyed map. Uses `BTreeMap` for deterministic iteration order.
    Map(BTreeMap<String, Value>),
    /// Binary data (not directly representable in JSON).
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the boolean if this is a [`Value::Bool`].
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the string slice if this is a [`Value::String`].
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the elements if this is a [`Value::Array`].
    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Numeric view used by comparisons. Integers widen to `f64`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Short type label for error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
            Self::Bytes(_) => "bytes",
        }
    }

    /// Converts into a `serde_json::Value`. Bytes become an array of numbers.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Array(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Self::Bytes(bytes) => {
                serde_json::Value::Array(bytes.iter().map(|b| serde_json::Value::from(*b)).collect())
            }
        }
    }

    /// Converts into a Rhai `Dynamic` for script scopes.
    #[must_use]
    pub fn to_dynamic(&self) -> rhai::Dynamic {
        match self {
            Self::Null => rhai::Dynamic::UNIT,
            Self::Bool(b) => rhai::Dynamic::from_bool(*b),
            Self::Int(i) => rhai::Dynamic::from_int(*i),
            Self::Float(f) => rhai::Dynamic::from_float(*f),
            Self::String(s) => rhai::Dynamic::from(s.clone()),
            Self::Array(items) => {
                rhai::Dynamic::from_array(items.iter().map(Self::to_dynamic).collect())
            }
            Self::Map(map) => {
                let mut out = rhai::Map::new();
                for (k, v) in map {
                    out.insert(k.as_str().into(), v.to_dynamic());
                }
                rhai::Dynamic::from_map(out)
            }
            Self::Bytes(bytes) => rhai::Dynamic::from_blob(bytes.clone()),
        }
    }

    /// Converts a Rhai `Dynamic` back into a `Value`.
    ///
    /// Types without a natural counterpart (custom types, function pointers)
    /// are rendered through their `Display` implementation.
    #[must_use]
    pub fn from_dynamic(value: rhai::Dynamic) -> Self {
        if value.is_unit() {
            return Self::Null;
        }
        if let Ok(b) = value.as_bool() {
            return Self::Bool(b);
        }
        if let Ok(i) = value.as_int() {
            return Self::Int(i);
        }
        if let Ok(f) = value.as_float() {
            return Self::Float(f);
        }
        if value.is_string() {
            return value
                .into_string()
                .map_or(Self::Null, Self::String);
        }
        if value.is_blob() {
            return value.into_blob().map_or(Self::Null, Self::Bytes);
        }
        if value.is_array() {
            return value.into_array().map_or(Self::Null, |items| {
                Self::Array(items.into_iter().map(Self::from_dynamic).collect())
            });
        }
        if value.is_map() {
            return value.try_cast::<rhai::Map>().map_or(Self::Null, |map| {
                Self::Map(
                    map.into_iter()
                        .map(|(k, v)| (k.to_string(), Self::from_dynamic(v)))
                        .collect(),
                )
            });
        }
        Self::String(value.to_string())
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(map) => {
                Self::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Self::Array(value)
    }
}

/// Renders scalars the way templates and header values expect them:
/// strings without quotes, `null` as the empty string, containers as JSON.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => f.write_str(s),
            Self::Bytes(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
            Self::Array(_) | Self::Map(_) => write!(f, "{}", self.to_json()),
        }
    }
}
