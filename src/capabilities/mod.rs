//! Capabilities: the actions, lists and properties a node publishes.
//!
//! Action lookup is an explicit chain:
//!
//! ```text
//! static (per node type) → instance (registered at runtime)
//!   → dynamic (scripting source, cached per node) → empty action
//! ```
//!
//! A dynamic action is dropped when a static or instance action already
//! uses its id.

mod actions;
mod export;
mod lists;
mod params;
mod properties;
mod security;

pub use actions::{
    action_table_for, ActionDef, ActionHandler, ActionInfo, ActionOrigin, ActionTable,
    ActionTableBuilder,
};
pub use export::CapabilityExport;
pub use lists::{CapabilityList, ListInfo};
pub use params::{ParamDef, ParamType};
pub use properties::{Property, PropertyChange, PropertyInfo};
pub use security::{demand, Credentials, SecurityToken};

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::kernel::Node;
use crate::types::{CapabilityId, Error, Result};
use crate::validation::validate_capability_id;

/// Supplies per-instance actions and properties (the scripting collaborator).
#[cfg_attr(test, mockall::automock)]
pub trait DynamicActionSource: Send + Sync {
    fn actions(&self, node: &Node) -> Vec<ActionDef>;

    fn properties(&self, _node: &Node) -> Vec<Property> {
        Vec::new()
    }
}

type ActionMap = BTreeMap<CapabilityId, Arc<ActionDef>>;

/// Per-node capability registries.
///
/// Mutated only through [`Node`] methods that hold the node's write lock.
pub struct Capabilities {
    static_actions: Arc<ActionTable>,
    instance_actions: RwLock<ActionMap>,
    lists: RwLock<BTreeMap<CapabilityId, Arc<CapabilityList>>>,
    properties: RwLock<BTreeMap<CapabilityId, Arc<Property>>>,
    dynamic_source: RwLock<Option<Arc<dyn DynamicActionSource>>>,
    dynamic_cache: RwLock<Option<Arc<ActionMap>>>,
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("static_actions", &self.static_actions.len())
            .field("instance_actions", &self.instance_actions.read().len())
            .field("lists", &self.lists.read().len())
            .field("properties", &self.properties.read().len())
            .field("dynamic", &self.dynamic_source.read().is_some())
            .finish()
    }
}

impl Capabilities {
    pub fn new(static_actions: Arc<ActionTable>) -> Self {
        Self {
            static_actions,
            instance_actions: RwLock::new(BTreeMap::new()),
            lists: RwLock::new(BTreeMap::new()),
            properties: RwLock::new(BTreeMap::new()),
            dynamic_source: RwLock::new(None),
            dynamic_cache: RwLock::new(None),
        }
    }

    pub fn static_actions(&self) -> &Arc<ActionTable> {
        &self.static_actions
    }

    pub(crate) fn insert_action(&self, action: ActionDef) -> Result<()> {
        validate_capability_id(action.id.as_str())?;
        let mut instance = self.instance_actions.write();
        if self.static_actions.contains(&action.id) || instance.contains_key(&action.id) {
            return Err(Error::invalid_operation(format!(
                "action '{}' is already registered",
                action.id
            )));
        }
        instance.insert(action.id.clone(), Arc::new(action));
        // A new instance action may shadow a cached dynamic one.
        *self.dynamic_cache.write() = None;
        Ok(())
    }

    pub(crate) fn insert_list(&self, list: CapabilityList) -> Result<Arc<CapabilityList>> {
        validate_capability_id(list.id.as_str())?;
        let mut lists = self.lists.write();
        if lists.contains_key(&list.id) {
            return Err(Error::invalid_operation(format!(
                "list '{}' is already registered",
                list.id
            )));
        }
        let list = Arc::new(list);
        lists.insert(list.id.clone(), list.clone());
        Ok(list)
    }

    pub(crate) fn insert_property(&self, property: Property) -> Result<Arc<Property>> {
        validate_capability_id(property.id.as_str())?;
        let mut properties = self.properties.write();
        if properties.contains_key(&property.id) {
            return Err(Error::invalid_operation(format!(
                "property '{}' is already registered",
                property.id
            )));
        }
        let property = Arc::new(property);
        properties.insert(property.id.clone(), property.clone());
        Ok(property)
    }

    pub fn list(&self, id: &str) -> Option<Arc<CapabilityList>> {
        self.lists.read().get(&CapabilityId::new(id)).cloned()
    }

    pub fn lists(&self) -> Vec<Arc<CapabilityList>> {
        self.lists.read().values().cloned().collect()
    }

    pub fn property(&self, id: &str) -> Option<Arc<Property>> {
        self.properties.read().get(&CapabilityId::new(id)).cloned()
    }

    pub fn properties(&self) -> Vec<Arc<Property>> {
        self.properties.read().values().cloned().collect()
    }

    pub(crate) fn set_dynamic_source(&self, source: Option<Arc<dyn DynamicActionSource>>) {
        *self.dynamic_source.write() = source;
        *self.dynamic_cache.write() = None;
    }

    pub(crate) fn invalidate_dynamic(&self) {
        *self.dynamic_cache.write() = None;
    }

    /// Dynamic actions, loading the cache on first use.
    fn dynamic_actions(&self, node: &Node) -> Arc<ActionMap> {
        if let Some(cached) = self.dynamic_cache.read().as_ref() {
            return cached.clone();
        }
        let Some(source) = self.dynamic_source.read().clone() else {
            return Arc::new(BTreeMap::new());
        };

        let offered = source.actions(node);
        let instance = self.instance_actions.read();
        let mut map = ActionMap::new();
        for action in offered {
            if self.static_actions.contains(&action.id) || instance.contains_key(&action.id) {
                tracing::debug!(node = %node.path(), action = %action.id, "dynamic_action_shadowed");
                continue;
            }
            map.entry(action.id.clone()).or_insert_with(|| Arc::new(action));
        }
        drop(instance);

        let map = Arc::new(map);
        *self.dynamic_cache.write() = Some(map.clone());
        map
    }

    /// Resolve `id` through the lookup chain. Never fails: an unknown id
    /// yields an empty action.
    pub(crate) fn resolve_action(&self, node: &Node, id: &str) -> Arc<ActionDef> {
        if let Some(action) = self.static_actions.get(id) {
            return action.clone();
        }
        let key = CapabilityId::new(id);
        if let Some(action) = self.instance_actions.read().get(&key) {
            return action.clone();
        }
        if let Some(action) = self.dynamic_actions(node).get(&key) {
            return action.clone();
        }
        Arc::new(ActionDef::empty(key))
    }

    pub(crate) fn export(&self, node: &Node) -> CapabilityExport {
        let mut actions: Vec<ActionInfo> = self
            .static_actions
            .iter()
            .map(|a| a.info(ActionOrigin::Static))
            .collect();
        actions.extend(
            self.instance_actions
                .read()
                .values()
                .map(|a| a.info(ActionOrigin::Instance)),
        );
        actions.extend(
            self.dynamic_actions(node)
                .values()
                .map(|a| a.info(ActionOrigin::Dynamic)),
        );
        actions.sort_by_key(|a| a.id.to_lowercase());

        CapabilityExport {
            node: node.display_name(),
            path: node.path().to_string(),
            security: node.security(),
            actions,
            lists: self.lists.read().values().map(|l| l.info()).collect(),
            properties: self.properties.read().values().map(|p| p.info()).collect(),
        }
    }

    /// Drop every registry entry (node disposal).
    pub(crate) fn clear(&self) {
        self.instance_actions.write().clear();
        self.lists.write().clear();
        self.properties.write().clear();
        *self.dynamic_source.write() = None;
        *self.dynamic_cache.write() = None;
    }
}
