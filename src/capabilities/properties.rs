//! Properties: observable values that broadcast change notifications.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;
use tokio::sync::broadcast;

use crate::types::CapabilityId;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Emitted whenever a property's value actually changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyChange {
    /// Path of the owning node (empty until the property is registered).
    pub node: String,
    pub property: String,
    pub old: Value,
    pub new: Value,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Property {
    pub id: CapabilityId,
    pub description: String,
    value: RwLock<Value>,
    tx: broadcast::Sender<PropertyChange>,
    owner: OnceLock<String>,
}

impl Property {
    pub fn new(id: impl Into<CapabilityId>, initial: Value) -> Self {
        let (tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            id: id.into(),
            description: String::new(),
            value: RwLock::new(initial),
            tx,
            owner: OnceLock::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// First registration wins; later calls are ignored.
    pub(crate) fn bind_owner(&self, path: &str) {
        let _ = self.owner.set(path.to_string());
    }

    pub fn get(&self) -> Value {
        self.value.read().clone()
    }

    /// Store `value`. Returns whether it differed from the previous one.
    pub fn set(&self, value: Value) -> bool {
        let old = {
            let mut current = self.value.write();
            if *current == value {
                return false;
            }
            std::mem::replace(&mut *current, value.clone())
        };
        let change = PropertyChange {
            node: self.owner.get().cloned().unwrap_or_default(),
            property: self.id.to_string(),
            old,
            new: value,
            changed_at: Utc::now(),
        };
        // No subscribers is fine.
        let _ = self.tx.send(change);
        true
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PropertyChange> {
        self.tx.subscribe()
    }

    pub fn info(&self) -> PropertyInfo {
        PropertyInfo {
            id: self.id.to_string(),
            description: self.description.clone(),
            value: self.get(),
        }
    }
}

/// Exported property metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PropertyInfo {
    pub id: String,
    pub description: String,
    pub value: Value,
}
