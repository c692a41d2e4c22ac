//! # Shared Params
//!
//! The parameter map threaded through every step of one task. It is the only
//! channel between steps and is persisted after each of them, so everything in
//! it must be plain JSON.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SharedParams(Map<String, Value>);

impl SharedParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object; any other value yields empty params
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        self.set(key, value);
        self
    }

    /// Set a value; values that fail to serialize are stored as null
    pub fn set(&mut self, key: impl Into<String>, value: impl Serialize) {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.0.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.get(key).is_some_and(|v| !v.is_null())
    }

    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    /// Typed read; `None` when absent, null or of the wrong shape
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.raw(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Typed read that fails the calling step when the key is missing
    pub fn require<T: DeserializeOwned>(&self, step_id: &str, key: &str) -> Result<T> {
        let value = self
            .raw(key)
            .ok_or_else(|| OrchestratorError::MissingParameter {
                step_id: step_id.to_string(),
                name: key.to_string(),
            })?;
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.raw(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.raw(key).and_then(Value::as_i64)
    }

    pub fn flag(&self, key: &str) -> bool {
        self.raw(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for SharedParams {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
