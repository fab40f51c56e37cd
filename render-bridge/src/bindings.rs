// Shared, insertion-ordered name -> value map handed to renders

use indexmap::IndexMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::value::Value;

/// Cloning shares the underlying map; writes through one handle are seen by
/// every clone.
#[derive(Clone, Default)]
pub struct Bindings {
    inner: Arc<RwLock<IndexMap<String, Value>>>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object.
    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        match json {
            serde_json::Value::Object(map) => Ok(map
                .into_iter()
                .map(|(name, value)| (name, Value::from(value)))
                .collect()),
            other => Err(EngineError::Config(format!(
                "bindings must be a JSON object, got {}",
                other
            ))),
        }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.inner.read().get(name).cloned()
    }

    pub fn insert(&self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.inner.write().insert(name.into(), value.into())
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.inner.write().shift_remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Do both handles share one map?
    pub fn same_as(&self, other: &Bindings) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl FromIterator<(String, Value)> for Bindings {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Bindings {
            inner: Arc::new(RwLock::new(iter.into_iter().collect())),
        }
    }
}

impl fmt::Debug for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.inner.read().keys()).finish()
    }
}
