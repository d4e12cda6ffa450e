//! Values exchanged with the host: JSON data plus host-held methods.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::MiniResult;

/// Input props / query parameters handed to a component.
pub type Props = Map<String, Value>;

/// A callable stored in host state.
pub type DataMethod = Arc<dyn Fn(&[Value]) -> MiniResult<Value> + Send + Sync>;

/// One entry of host state.
#[derive(Clone)]
pub enum HostValue {
    Data(Value),
    Method(DataMethod),
}

/// Host state, or a patch of it. Key order is preserved.
pub type DataMap = IndexMap<String, HostValue>;

/// Classification applied before acting on a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ValueKind {
    Null,
    Boolean,
    Number,
    String,
    Array,
    Mapping,
    Function,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Boolean,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Mapping,
        }
    }

    pub fn is_primitive(self) -> bool {
        matches!(
            self,
            ValueKind::Boolean | ValueKind::Number | ValueKind::String
        )
    }
}

impl HostValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            HostValue::Data(value) => ValueKind::of(value),
            HostValue::Method(_) => ValueKind::Function,
        }
    }

    pub fn as_data(&self) -> Option<&Value> {
        match self {
            HostValue::Data(value) => Some(value),
            HostValue::Method(_) => None,
        }
    }

    pub fn as_method(&self) -> Option<&DataMethod> {
        match self {
            HostValue::Method(method) => Some(method),
            HostValue::Data(_) => None,
        }
    }

    pub fn method<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> MiniResult<Value> + Send + Sync + 'static,
    {
        HostValue::Method(Arc::new(f))
    }
}

impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HostValue::Data(a), HostValue::Data(b)) => a == b,
            (HostValue::Method(a), HostValue::Method(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Data(value) => write!(f, "{}", value),
            HostValue::Method(_) => write!(f, "<method>"),
        }
    }
}

impl From<Value> for HostValue {
    fn from(value: Value) -> Self {
        HostValue::Data(value)
    }
}

/// Converts a JSON object into a data map. Non-object values yield an empty map.
pub fn data_map_from_json(value: &Value) -> DataMap {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| (k.clone(), HostValue::Data(v.clone())))
            .collect(),
        _ => DataMap::new(),
    }
}

/// Projects the data entries of a map back to JSON, dropping methods.
pub fn data_map_to_json(map: &DataMap) -> Value {
    let object: Map<String, Value> = map
        .iter()
        .filter_map(|(k, v)| v.as_data().map(|d| (k.clone(), d.clone())))
        .collect();
    Value::Object(object)
}

/// Compares two prop objects one level deep, ignoring the given keys.
pub fn shallow_equal(a: &Props, b: &Props, ignored: &[String]) -> bool {
    let relevant = |m: &Props| {
        m.iter()
            .filter(|(k, _)| !ignored.iter().any(|i| i == *k))
            .count()
    };
    if relevant(a) != relevant(b) {
        return false;
    }
    a.iter()
        .filter(|(k, _)| !ignored.iter().any(|i| i == *k))
        .all(|(k, v)| b.get(k) == Some(v))
}

/// Decodes `%XX` escapes. Returns `None` on malformed escapes or invalid UTF-8.
pub fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = input.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
