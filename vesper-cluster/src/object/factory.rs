//! Value factories.
//!
//! A factory turns the wire representation of a part value back into `T`.
//! It is also asked for the default value of a freshly started object, in
//! which case it receives `None`.

use crate::Result;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::marker::PhantomData;

/// Builds part values from their serialized representation.
pub trait ValueFactory<T>: Send + Sync + 'static {
    /// Create a value. `None` asks for the default value.
    fn new_value(&self, representation: Option<&Value>) -> Result<T>;
}

/// Factory for integer counters. Accepts any JSON number.
#[derive(Debug, Clone, Copy, Default)]
pub struct LongFactory;

impl ValueFactory<i64> for LongFactory {
    fn new_value(&self, representation: Option<&Value>) -> Result<i64> {
        match representation {
            None | Some(Value::Null) => Ok(0),
            Some(Value::Number(n)) => {
                Ok(n.as_i64().unwrap_or_else(|| n.as_f64().unwrap_or_default() as i64))
            }
            Some(other) => Ok(serde_json::from_value(other.clone())?),
        }
    }
}

/// Factory for string values
#[derive(Debug, Clone, Copy, Default)]
pub struct StringFactory;

impl ValueFactory<String> for StringFactory {
    fn new_value(&self, representation: Option<&Value>) -> Result<String> {
        match representation {
            None | Some(Value::Null) => Ok(String::new()),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Ok(other.to_string()),
        }
    }
}

/// Factory for lists of arbitrary JSON values
#[derive(Debug, Clone, Copy, Default)]
pub struct ListFactory;

impl ValueFactory<Vec<Value>> for ListFactory {
    fn new_value(&self, representation: Option<&Value>) -> Result<Vec<Value>> {
        match representation {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(other) => Ok(serde_json::from_value(other.clone())?),
        }
    }
}

/// Factory for string-keyed maps
#[derive(Debug, Clone, Copy, Default)]
pub struct MapFactory;

impl ValueFactory<Map<String, Value>> for MapFactory {
    fn new_value(&self, representation: Option<&Value>) -> Result<Map<String, Value>> {
        match representation {
            None | Some(Value::Null) => Ok(Map::new()),
            Some(other) => Ok(serde_json::from_value(other.clone())?),
        }
    }
}

/// Factory for any `Default + DeserializeOwned` type.
pub struct SerdeFactory<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeFactory<T> {
    /// Create a new serde factory
    pub fn new() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<T> Default for SerdeFactory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for SerdeFactory<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SerdeFactory")
    }
}

impl<T> ValueFactory<T> for SerdeFactory<T>
where
    T: Default + DeserializeOwned + 'static,
{
    fn new_value(&self, representation: Option<&Value>) -> Result<T> {
        match representation {
            None => Ok(T::default()),
            Some(value) => Ok(serde_json::from_value(value.clone())?),
        }
    }
}

/// Integer counter factory
pub fn long() -> LongFactory {
    LongFactory
}

/// String factory
pub fn string() -> StringFactory {
    StringFactory
}

/// JSON list factory
pub fn list() -> ListFactory {
    ListFactory
}

/// JSON map factory
pub fn map() -> MapFactory {
    MapFactory
}
