//! Persisted breakpoint attributes.
//!
//! Breakpoints are stored as flat attribute maps keyed by a marker id. The
//! store is the only source of truth: in-memory breakpoint state is always
//! re-derived from what the store returns.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::AttributeError;

/// Stable identity of a persisted breakpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MarkerId(pub u64);

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "marker#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        AttributeValue::Int(i64::from(value))
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        AttributeValue::Int(i64::from(value))
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Str(value.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Str(value)
    }
}

pub type AttributeMap = BTreeMap<String, AttributeValue>;

/// Attribute keys written for every breakpoint.
pub mod keys {
    pub const MODEL_IDENTIFIER: &str = "jdsync.modelIdentifier";
    pub const KIND: &str = "jdsync.kind";
    pub const ENABLED: &str = "jdsync.enabled";
    pub const REGISTERED: &str = "jdsync.registered";
    pub const TYPE_NAME: &str = "jdsync.typeName";
    pub const LINE_NUMBER: &str = "jdsync.lineNumber";
    pub const CHAR_START: &str = "jdsync.charStart";
    pub const CHAR_END: &str = "jdsync.charEnd";
    pub const HIT_COUNT: &str = "jdsync.hitCount";
    pub const SUSPEND_POLICY: &str = "jdsync.suspendPolicy";
    pub const METHOD_NAME: &str = "jdsync.methodName";
    pub const METHOD_SIGNATURE: &str = "jdsync.methodSignature";
}

/// Persistence collaborator for breakpoint attributes.
pub trait AttributeStore: Send + Sync {
    fn load(&self, marker: MarkerId) -> Result<Option<AttributeMap>, AttributeError>;

    /// Replaces every attribute of `marker` in one atomic write.
    fn save(&self, marker: MarkerId, attributes: &AttributeMap) -> Result<(), AttributeError>;

    /// Merges `changes` into the stored attributes in one atomic write and
    /// returns the resulting map.
    fn update(
        &self,
        marker: MarkerId,
        changes: &AttributeMap,
        removed: &[&str],
    ) -> Result<AttributeMap, AttributeError>;

    fn remove(&self, marker: MarkerId) -> Result<(), AttributeError>;
}

/// Process-local attribute store.
#[derive(Debug)]
pub struct InMemoryAttributeStore {
    next_marker: AtomicU64,
    markers: RwLock<HashMap<MarkerId, AttributeMap>>,
}

impl Default for InMemoryAttributeStore {
    fn default() -> Self {
        Self {
            next_marker: AtomicU64::new(1),
            markers: RwLock::new(HashMap::new()),
        }
    }
}

impl InMemoryAttributeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh marker id. Nothing is stored until the first save.
    pub fn create_marker(&self) -> MarkerId {
        MarkerId(self.next_marker.fetch_add(1, Ordering::Relaxed))
    }

    pub fn len(&self) -> usize {
        self.markers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.read().is_empty()
    }
}

impl AttributeStore for InMemoryAttributeStore {
    fn load(&self, marker: MarkerId) -> Result<Option<AttributeMap>, AttributeError> {
        Ok(self.markers.read().get(&marker).cloned())
    }

    fn save(&self, marker: MarkerId, attributes: &AttributeMap) -> Result<(), AttributeError> {
        self.markers.write().insert(marker, attributes.clone());
        Ok(())
    }

    fn update(
        &self,
        marker: MarkerId,
        changes: &AttributeMap,
        removed: &[&str],
    ) -> Result<AttributeMap, AttributeError> {
        let mut markers = self.markers.write();
        let attributes = markers
            .get_mut(&marker)
            .ok_or(AttributeError::MissingMarker(marker))?;
        for key in removed {
            attributes.remove(*key);
        }
        attributes.extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(attributes.clone())
    }

    fn remove(&self, marker: MarkerId) -> Result<(), AttributeError> {
        self.markers.write().remove(&marker);
        Ok(())
    }
}
