//! Actions: named, security-scoped operations a node publishes.
//!
//! Each node type registers its static actions once, through
//! [`NodeType::register_actions`]. The resulting table is cached per Rust
//! type in a process-wide map and shared by every instance.

use parking_lot::RwLock;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, OnceLock};

use super::params::{ParamDef, ParamType};
use crate::dispatch::Invocation;
use crate::kernel::NodeType;
use crate::types::{CapabilityId, Error, Result};
use crate::validation::validate_capability_id;

/// Action body. `Ok(None)` normalizes to the default success payload.
pub type ActionHandler = Arc<dyn Fn(&mut Invocation<'_>) -> Result<Option<Value>> + Send + Sync>;

/// Where an action was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActionOrigin {
    Static,
    Instance,
    Dynamic,
}

/// An invocable action.
#[derive(Clone)]
pub struct ActionDef {
    pub id: CapabilityId,
    pub security: Option<String>,
    pub description: String,
    pub parameters: Vec<ParamDef>,
    pub returns: Option<String>,
    /// Contain runtime failures as a failure payload while no output was written.
    pub safe_call: bool,
    handler: Option<ActionHandler>,
}

impl fmt::Debug for ActionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDef")
            .field("id", &self.id)
            .field("security", &self.security)
            .field("parameters", &self.parameters.len())
            .field("safe_call", &self.safe_call)
            .field("empty", &self.is_empty())
            .finish()
    }
}

impl ActionDef {
    pub fn new<F>(id: impl Into<CapabilityId>, handler: F) -> Self
    where
        F: Fn(&mut Invocation<'_>) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            security: None,
            description: String::new(),
            parameters: Vec::new(),
            returns: None,
            safe_call: false,
            handler: Some(Arc::new(handler)),
        }
    }

    /// Action whose bound parameters deserialize into a typed argument struct.
    pub fn typed<A, F>(id: impl Into<CapabilityId>, handler: F) -> Self
    where
        A: DeserializeOwned,
        F: Fn(&mut Invocation<'_>, A) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        Self::new(id, move |inv| {
            let args: A = inv.args_as()?;
            handler(inv, args)
        })
    }

    /// Placeholder for an id that resolved nowhere.
    pub fn empty(id: impl Into<CapabilityId>) -> Self {
        Self {
            id: id.into(),
            security: None,
            description: String::new(),
            parameters: Vec::new(),
            returns: None,
            safe_call: false,
            handler: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.handler.is_none()
    }

    pub fn with_security(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.security = (!token.trim().is_empty()).then_some(token);
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_param(mut self, param: ParamDef) -> Self {
        self.parameters.push(param);
        self
    }

    /// Shorthand for a described parameter.
    pub fn param(self, name: &str, param_type: ParamType, description: &str) -> Self {
        self.with_param(ParamDef::new(name, param_type).describe(description))
    }

    pub fn returns(mut self, returns: impl Into<String>) -> Self {
        self.returns = Some(returns.into());
        self
    }

    pub fn safe_call(mut self) -> Self {
        self.safe_call = true;
        self
    }

    pub fn info(&self, origin: ActionOrigin) -> ActionInfo {
        ActionInfo {
            id: self.id.to_string(),
            security: self.security.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
            returns: self.returns.clone(),
            safe_call: self.safe_call,
            origin,
        }
    }

    pub(crate) fn call(&self, inv: &mut Invocation<'_>) -> Result<Option<Value>> {
        match &self.handler {
            Some(handler) => handler(inv),
            None => Err(Error::not_found(format!("action '{}'", self.id))),
        }
    }
}

/// Exported action metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ActionInfo {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<String>,
    pub description: String,
    pub parameters: Vec<ParamDef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returns: Option<String>,
    pub safe_call: bool,
    pub origin: ActionOrigin,
}

impl ActionInfo {
    /// Format: `- id(param1: type, param2?: type) -> returns: description`
    pub fn to_signature_line(&self) -> String {
        let params: Vec<String> = self.parameters.iter().map(ParamDef::signature).collect();
        let returns = self
            .returns
            .as_deref()
            .map(|r| format!(" -> {}", r))
            .unwrap_or_default();
        format!(
            "- {}({}){}: {}",
            self.id,
            params.join(", "),
            returns,
            self.description
        )
    }
}

// =============================================================================
// Static action tables
// =============================================================================

/// Immutable id → action map for one node type.
#[derive(Debug, Default)]
pub struct ActionTable {
    actions: BTreeMap<CapabilityId, Arc<ActionDef>>,
}

impl ActionTable {
    pub fn get(&self, id: &str) -> Option<&Arc<ActionDef>> {
        self.actions.get(&CapabilityId::new(id))
    }

    pub fn contains(&self, id: &CapabilityId) -> bool {
        self.actions.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ActionDef>> {
        self.actions.values()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Collects one type's static actions, optionally on top of a base type's.
#[derive(Debug, Default)]
pub struct ActionTableBuilder {
    actions: BTreeMap<CapabilityId, Arc<ActionDef>>,
    /// Ids registered by the type itself (not inherited).
    own: Vec<CapabilityId>,
}

impl ActionTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from `Base`'s actions. The type's own registrations override them.
    pub fn inherit<Base: NodeType>(&mut self) -> Result<&mut Self> {
        let base = action_table_for::<Base>()?;
        for action in base.iter() {
            if !self.own.contains(&action.id) {
                self.actions.insert(action.id.clone(), action.clone());
            }
        }
        Ok(self)
    }

    pub fn register(&mut self, action: ActionDef) -> Result<&mut Self> {
        validate_capability_id(action.id.as_str())?;
        if self.own.contains(&action.id) {
            return Err(Error::invalid_operation(format!(
                "action '{}' is registered twice",
                action.id
            )));
        }
        self.own.push(action.id.clone());
        self.actions.insert(action.id.clone(), Arc::new(action));
        Ok(self)
    }

    pub fn build(self) -> ActionTable {
        ActionTable {
            actions: self.actions,
        }
    }
}

type TableCache = RwLock<HashMap<TypeId, Arc<ActionTable>>>;

fn table_cache() -> &'static TableCache {
    static CACHE: OnceLock<TableCache> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// The static action table of `T`, built on first use.
pub fn action_table_for<T: NodeType>() -> Result<Arc<ActionTable>> {
    let key = TypeId::of::<T>();
    if let Some(table) = table_cache().read().get(&key) {
        return Ok(table.clone());
    }

    // Built outside the cache lock: `inherit` recurses into this function.
    let mut builder = ActionTableBuilder::new();
    T::register_actions(&mut builder)?;
    let built = Arc::new(builder.build());

    let mut cache = table_cache().write();
    let table = cache.entry(key).or_insert(built).clone();
    tracing::debug!(
        node_type = std::any::type_name::<T>(),
        actions = table.len(),
        "action_table_built"
    );
    Ok(table)
}
