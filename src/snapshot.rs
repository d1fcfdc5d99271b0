use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Snapshot key overwritten with a status string when a cycle stops before
/// reading registers.
pub const INVERTER_MODE_KEY: &str = "InverterMode";
pub const MODE_OFFLINE: &str = "offline";
pub const MODE_RESOLVE_ERROR: &str = "Resolve Error";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Integer(u64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

pub type Snapshot = BTreeMap<String, Value>;

/// Latest decoded values for one hub.
///
/// The coordinator is the only writer. Values are never cleared: a key that
/// a cycle does not report keeps whatever the last cycle that did report it
/// stored.
#[derive(Clone, Default)]
pub struct SnapshotStore {
    data: Arc<RwLock<Snapshot>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Snapshot {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn value(&self, key: &str) -> Option<Value> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn merge(&self, values: Snapshot) {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.extend(values);
    }

    pub fn set(&self, key: &str, value: Value) {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned(), value);
    }

    pub fn set_mode(&self, mode: &str) {
        self.set(INVERTER_MODE_KEY, Value::Text(mode.to_owned()));
    }
}
