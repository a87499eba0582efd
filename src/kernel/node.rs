//! Node: one configuration-declared component in the tree.
//!
//! Ownership flows parent → child (`Arc`), the parent link is a `Weak`, so the
//! tree cannot form cycles. Children, the declaration snapshot and the
//! capability registries are only mutated by a thread holding the node's
//! write lock; mutators take the [`WriteGuard`] as proof.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use crate::capabilities::{
    ActionDef, ActionTable, CapabilityExport, CapabilityList, Capabilities, DynamicActionSource,
    Property,
};
use crate::declaration::Element;
use crate::kernel::behavior::NodeBehavior;
use crate::kernel::lock::{HierarchicalLock, WriteGuard};
use crate::kernel::registry::NodeTypeRegistry;
use crate::kernel::reload::{ReloadReport, ReloadTransaction};
use crate::kernel::types::NodeState;
use crate::types::{Error, NodeName, Result};

/// A child that claims a virtual-root prefix for generic request handling.
#[derive(Debug, Clone)]
pub struct AuxHandler {
    /// Normalized prefix without leading/trailing `/`; empty claims everything.
    pub prefix: String,
    pub priority: i32,
    pub node: Arc<Node>,
}

impl AuxHandler {
    /// Bytes of `remaining` consumed if the prefix matches.
    pub fn matches(&self, remaining: &str) -> Option<usize> {
        if self.prefix.is_empty() {
            return Some(0);
        }
        let rest = remaining.strip_prefix(self.prefix.as_str())?;
        if rest.is_empty() {
            Some(self.prefix.len())
        } else if rest.starts_with('/') {
            Some(self.prefix.len() + 1)
        } else {
            None
        }
    }
}

struct NodeInner {
    declaration: Arc<Element>,
    children: BTreeMap<NodeName, Arc<Node>>,
    aux_handlers: Vec<AuxHandler>,
}

pub struct Node {
    name: NodeName,
    tag: String,
    path: String,
    parent: Weak<Node>,
    lock: HierarchicalLock,
    state: AtomicU8,
    inner: RwLock<NodeInner>,
    behavior: Box<dyn NodeBehavior>,
    capabilities: Capabilities,
    registry: Arc<NodeTypeRegistry>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("path", &self.path)
            .field("tag", &self.tag)
            .field("state", &self.state())
            .finish()
    }
}

impl Node {
    pub(crate) fn new(
        name: NodeName,
        tag: String,
        parent: Option<&Arc<Node>>,
        behavior: Box<dyn NodeBehavior>,
        static_actions: Arc<ActionTable>,
        registry: Arc<NodeTypeRegistry>,
    ) -> Arc<Self> {
        let path = match parent {
            Some(p) => format!("{}{}/", p.path, name),
            None => "/".to_string(),
        };
        Arc::new(Self {
            lock: HierarchicalLock::new(path.clone()),
            inner: RwLock::new(NodeInner {
                declaration: Arc::new(Element::new(tag.clone())),
                children: BTreeMap::new(),
                aux_handlers: Vec::new(),
            }),
            name,
            tag,
            path,
            parent: parent.map(Arc::downgrade).unwrap_or_default(),
            state: AtomicU8::new(NodeState::Initializing as u8),
            behavior,
            capabilities: Capabilities::new(static_actions),
            registry,
        })
    }

    // =========================================================================
    // Identity
    // =========================================================================

    pub fn name(&self) -> &NodeName {
        &self.name
    }

    /// Declaration tag this node was built from.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Absolute path, always ending in `/` (the root is `/`).
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn parent(&self) -> Option<Arc<Node>> {
        self.parent.upgrade()
    }

    pub fn lock(&self) -> &HierarchicalLock {
        &self.lock
    }

    pub fn state(&self) -> NodeState {
        NodeState::from(self.state.load(Ordering::Acquire))
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == NodeState::Disposed
    }

    pub(crate) fn registry(&self) -> &Arc<NodeTypeRegistry> {
        &self.registry
    }

    pub(crate) fn behavior_dyn(&self) -> &dyn NodeBehavior {
        &*self.behavior
    }

    /// Typed access to the node's behavior.
    pub fn behavior<T: NodeBehavior + 'static>(&self) -> Option<&T> {
        let behavior: &dyn NodeBehavior = &*self.behavior;
        behavior.as_any().downcast_ref::<T>()
    }

    // =========================================================================
    // Declaration and children (read side)
    // =========================================================================

    /// Current activated declaration snapshot.
    pub fn declaration(&self) -> Arc<Element> {
        let _read = self.lock.read();
        self.inner.read().declaration.clone()
    }

    pub fn security(&self) -> Option<String> {
        self.declaration().security().map(str::to_string)
    }

    pub fn display_name(&self) -> String {
        self.declaration()
            .display_name()
            .map(str::to_string)
            .unwrap_or_else(|| self.name.to_string())
    }

    pub fn child(&self, name: &str) -> Option<Arc<Node>> {
        let _read = self.lock.read();
        self.inner.read().children.get(&NodeName::new(name)).cloned()
    }

    /// Children in name order.
    pub fn children(&self) -> Vec<Arc<Node>> {
        let _read = self.lock.read();
        self.inner.read().children.values().cloned().collect()
    }

    pub fn child_count(&self) -> usize {
        let _read = self.lock.read();
        self.inner.read().children.len()
    }

    /// Auxiliary handlers in descending priority order.
    pub fn aux_handlers(&self) -> Vec<AuxHandler> {
        let _read = self.lock.read();
        self.inner.read().aux_handlers.clone()
    }

    // =========================================================================
    // Mutation (write lock held by caller)
    // =========================================================================

    fn check_guard(&self, guard: &WriteGuard<'_>) -> Result<()> {
        if guard.is_for(&self.lock) {
            Ok(())
        } else {
            Err(Error::internal(format!(
                "write guard does not belong to {}",
                self.path
            )))
        }
    }

    fn check_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::invalid_operation(format!(
                "node {} is disposed",
                self.path
            )));
        }
        Ok(())
    }

    pub(crate) fn insert_child(&self, guard: &WriteGuard<'_>, child: Arc<Node>) -> Result<()> {
        self.check_guard(guard)?;
        self.check_live()?;
        let mut inner = self.inner.write();
        if inner.children.contains_key(child.name()) {
            return Err(Error::invalid_operation(format!(
                "{} already has a child named '{}'",
                self.path,
                child.name()
            )));
        }
        inner.children.insert(child.name().clone(), child);
        Ok(())
    }

    pub(crate) fn remove_child(
        &self,
        guard: &WriteGuard<'_>,
        name: &NodeName,
    ) -> Result<Option<Arc<Node>>> {
        self.check_guard(guard)?;
        Ok(self.inner.write().children.remove(name))
    }

    /// Swap in a new declaration; a deep-equal snapshot keeps the old one.
    pub(crate) fn swap_declaration(
        &self,
        guard: &WriteGuard<'_>,
        declaration: Arc<Element>,
    ) -> Result<bool> {
        self.check_guard(guard)?;
        let mut inner = self.inner.write();
        if Arc::ptr_eq(&inner.declaration, &declaration) || *inner.declaration == *declaration {
            return Ok(false);
        }
        inner.declaration = declaration;
        Ok(true)
    }

    pub(crate) fn set_state(&self, guard: &WriteGuard<'_>, to: NodeState) -> Result<()> {
        self.check_guard(guard)?;
        let from = self.state();
        if from == to {
            return Ok(());
        }
        if !from.can_transition_to(to) {
            return Err(Error::invalid_operation(format!(
                "{}: cannot move from {} to {}",
                self.path,
                from.as_str(),
                to.as_str()
            )));
        }
        self.state.store(to as u8, Ordering::Release);
        Ok(())
    }

    /// Recompute the auxiliary handler list from the children's declarations.
    pub(crate) fn rebuild_aux_handlers(&self, guard: &WriteGuard<'_>) -> Result<()> {
        self.check_guard(guard)?;
        let children: Vec<Arc<Node>> = self.inner.read().children.values().cloned().collect();
        let mut handlers: Vec<AuxHandler> = children
            .into_iter()
            .filter(|c| !c.is_disposed())
            .filter_map(|child| {
                let declaration = child.declaration();
                let prefix = declaration.virtual_root()?.trim_matches('/').to_string();
                let priority = declaration.priority().unwrap_or(0);
                Some(AuxHandler {
                    prefix,
                    priority,
                    node: child,
                })
            })
            .collect();
        // Stable sort keeps name order among equal priorities.
        handlers.sort_by(|a, b| b.priority.cmp(&a.priority));
        self.inner.write().aux_handlers = handlers;
        Ok(())
    }

    // =========================================================================
    // Public tree API (collaborators)
    // =========================================================================

    /// Create, link and activate a child from a declaration fragment.
    ///
    /// The child is not part of this node's declaration, so the next reload
    /// of this node disposes it unless the declaration gains a matching
    /// fragment.
    pub fn register_child(self: &Arc<Self>, fragment: Element) -> Result<(Arc<Node>, ReloadReport)> {
        let _upgradeable = self.lock.upgradeable_read();
        let guard = self.lock.write();
        self.check_live()?;

        let child = self.registry.instantiate(&fragment, Some(self), None)?;
        self.insert_child(&guard, child.clone())?;
        let report = ReloadTransaction::execute(&child, Arc::new(fragment), None);
        self.rebuild_aux_handlers(&guard)?;
        tracing::info!(parent = %self.path, child = %child.path(), "child_registered");
        Ok((child, report))
    }

    /// Unlink and dispose a child.
    pub fn unregister_child(&self, name: &str) -> Result<()> {
        let guard = self.lock.write();
        let child = self
            .remove_child(&guard, &NodeName::new(name))?
            .ok_or_else(|| {
                Error::not_found(format!("{} has no child named '{}'", self.path, name))
            })?;
        child.dispose();
        self.rebuild_aux_handlers(&guard)?;
        tracing::info!(parent = %self.path, child = %child.path(), "child_unregistered");
        Ok(())
    }

    /// Dispose this node and its subtree, children first. Idempotent.
    pub fn dispose(&self) {
        let guard = self.lock.write();
        if self.is_disposed() {
            return;
        }
        let children: Vec<Arc<Node>> = {
            let mut inner = self.inner.write();
            inner.aux_handlers.clear();
            std::mem::take(&mut inner.children).into_values().collect()
        };
        for child in &children {
            child.dispose();
        }
        if let Err(e) = crate::types::contain("dispose hook", || {
            self.behavior.dispose(self);
            Ok(())
        }) {
            tracing::error!(node = %self.path, error = %e, "dispose_hook_failed");
        }
        self.capabilities.clear();
        if let Err(e) = self.set_state(&guard, NodeState::Disposed) {
            tracing::error!(node = %self.path, error = %e, "dispose_state_failed");
        }
        tracing::debug!(node = %self.path, "node_disposed");
    }

    // =========================================================================
    // Capabilities
    // =========================================================================

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Publish an instance action. Fails if the id is already taken.
    pub fn register_action(&self, action: ActionDef) -> Result<()> {
        let _write = self.lock.write();
        self.check_live()?;
        self.capabilities.insert_action(action)
    }

    pub fn register_list(&self, list: CapabilityList) -> Result<Arc<CapabilityList>> {
        let _write = self.lock.write();
        self.check_live()?;
        self.capabilities.insert_list(list)
    }

    pub fn register_property(&self, property: Property) -> Result<Arc<Property>> {
        let _write = self.lock.write();
        self.check_live()?;
        property.bind_owner(&self.path);
        self.capabilities.insert_property(property)
    }

    /// Set a property value, notifying subscribers when it changes.
    pub fn set_property(&self, id: &str, value: Value) -> Result<bool> {
        let property = {
            let _read = self.lock.read();
            self.capabilities.property(id).ok_or_else(|| {
                Error::not_found(format!("property '{}' on {}", id, self.path))
            })?
        };
        Ok(property.set(value))
    }

    /// Attach the scripting collaborator's action/property source.
    pub fn attach_script(&self, source: Arc<dyn DynamicActionSource>) -> Result<()> {
        let _write = self.lock.write();
        self.check_live()?;
        for property in source.properties(self) {
            property.bind_owner(&self.path);
            if let Err(e) = self.capabilities.insert_property(property) {
                tracing::warn!(node = %self.path, error = %e, "dynamic_property_skipped");
            }
        }
        self.capabilities.set_dynamic_source(Some(source));
        Ok(())
    }

    /// Drop cached dynamic actions (the script was recompiled).
    pub fn invalidate_dynamic_actions(&self) {
        let _write = self.lock.write();
        self.capabilities.invalidate_dynamic();
        tracing::debug!(node = %self.path, "dynamic_actions_invalidated");
    }

    /// Chained lookup: static → instance → dynamic → empty action.
    pub fn resolve_action(&self, id: &str) -> Arc<ActionDef> {
        let _read = self.lock.read();
        self.capabilities.resolve_action(self, id)
    }

    /// Metadata export of every action, list and property on this node.
    pub fn describe(&self) -> CapabilityExport {
        let _read = self.lock.read();
        self.capabilities.export(self)
    }
}
