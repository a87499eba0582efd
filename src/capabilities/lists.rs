//! Lists: named, lockable item collections exposed for introspection.

use parking_lot::{RwLock, RwLockReadGuard};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::CapabilityId;

#[derive(Debug)]
pub struct CapabilityList {
    pub id: CapabilityId,
    pub description: String,
    pub security: Option<String>,
    items: RwLock<Vec<Value>>,
}

impl CapabilityList {
    pub fn new(id: impl Into<CapabilityId>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            security: None,
            items: RwLock::new(Vec::new()),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_security(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.security = (!token.trim().is_empty()).then_some(token);
        self
    }

    pub fn with_items(self, items: Vec<Value>) -> Self {
        *self.items.write() = items;
        self
    }

    pub fn replace(&self, items: Vec<Value>) {
        *self.items.write() = items;
    }

    pub fn push(&self, item: Value) {
        self.items.write().push(item);
    }

    /// Copy of the current items, taken under the list's own lock.
    pub fn snapshot(&self) -> Vec<Value> {
        self.items.read().clone()
    }

    /// Hold the list for an enumeration that must see a stable view.
    pub fn read(&self) -> RwLockReadGuard<'_, Vec<Value>> {
        self.items.read()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub fn info(&self) -> ListInfo {
        ListInfo {
            id: self.id.to_string(),
            description: self.description.clone(),
            security: self.security.clone(),
            count: self.len(),
        }
    }
}

/// Exported list metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ListInfo {
    pub id: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<String>,
    pub count: usize,
}
