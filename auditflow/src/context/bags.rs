//! Write-once results bag.

use crate::errors::ResultConflictError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// An ordered map of per-stage results where each key is written once.
///
/// Writing to an existing key through [`ResultBag::set`] raises a
/// `ResultConflictError`; [`ResultBag::set_force`] overwrites.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultBag {
    data: BTreeMap<String, Value>,
}

impl ResultBag {
    /// Creates a new empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a value from the bag.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Checks if a key exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Sets a value in the bag.
    ///
    /// # Errors
    ///
    /// Returns `ResultConflictError` if the key already exists.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Result<(), ResultConflictError> {
        let key = key.into();
        if self.data.contains_key(&key) {
            return Err(ResultConflictError::new(key));
        }
        self.data.insert(key, value);
        Ok(())
    }

    /// Sets a value, allowing overwrites. Returns the previous value.
    pub fn set_force(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.data.insert(key.into(), value)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the bag is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns all keys in order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.data.iter()
    }

    /// Returns the bag as a JSON object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.data.clone().into_iter().collect())
    }
}

impl FromIterator<(String, Value)> for ResultBag {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            data: iter.into_iter().collect(),
        }
    }
}
