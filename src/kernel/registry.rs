//! Node-type registry: maps declaration tags to node factories.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::capabilities::{action_table_for, ActionTable};
use crate::declaration::Element;
use crate::kernel::behavior::{NodeBehavior, NodeType};
use crate::kernel::builtin::FolderNode;
use crate::kernel::node::Node;
use crate::types::{Error, NodeName, Result, SourcePosition};
use crate::validation::validate_node_name;

type Factory = Box<dyn Fn(&Element) -> Result<Box<dyn NodeBehavior>> + Send + Sync>;

struct NodeTypeEntry {
    type_name: &'static str,
    factory: Factory,
    actions: fn() -> Result<Arc<ActionTable>>,
    derive_name: fn(&Element) -> Option<String>,
}

/// Tag → node type. Tags compare case-insensitively.
#[derive(Default)]
pub struct NodeTypeRegistry {
    entries: HashMap<String, NodeTypeEntry>,
}

impl fmt::Debug for NodeTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<(&String, &'static str)> = self
            .entries
            .iter()
            .map(|(tag, e)| (tag, e.type_name))
            .collect();
        tags.sort();
        f.debug_struct("NodeTypeRegistry").field("types", &tags).finish()
    }
}

impl NodeTypeRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Registry pre-populated with the built-in `node` container type.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        // A fresh registry cannot already hold the tag.
        let _ = registry.register::<FolderNode>(FolderNode::TAG);
        registry
    }

    /// Register a node type under a declaration tag.
    pub fn register<T: NodeType>(&mut self, tag: &str) -> Result<()> {
        let key = tag.to_lowercase();
        if key.trim().is_empty() {
            return Err(Error::validation("node type tag cannot be empty"));
        }
        if self.entries.contains_key(&key) {
            return Err(Error::invalid_operation(format!(
                "node type '{}' is already registered",
                tag
            )));
        }
        self.entries.insert(
            key,
            NodeTypeEntry {
                type_name: std::any::type_name::<T>(),
                factory: Box::new(|element| {
                    T::create(element).map(|b| Box::new(b) as Box<dyn NodeBehavior>)
                }),
                actions: action_table_for::<T>,
                derive_name: T::derive_name,
            },
        );
        Ok(())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.entries.contains_key(&tag.to_lowercase())
    }

    /// All registered tags, sorted.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.entries.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Name a fragment would receive, using its type's naming rule.
    pub fn derive_name(&self, element: &Element) -> Option<String> {
        match self.entries.get(&element.tag.to_lowercase()) {
            Some(entry) => (entry.derive_name)(element),
            None => element.name().map(str::to_string),
        }
    }

    /// Build an unactivated node (state `Initializing`) for a fragment.
    pub(crate) fn instantiate(
        self: &Arc<Self>,
        element: &Element,
        parent: Option<&Arc<Node>>,
        source: Option<&str>,
    ) -> Result<Arc<Node>> {
        let element_path = match parent {
            Some(p) => format!("{}<{}>", p.path(), element.tag),
            None => format!("/<{}>", element.tag),
        };
        let position = || SourcePosition::element(source, element_path.clone());

        let entry = self.entries.get(&element.tag.to_lowercase()).ok_or_else(|| {
            Error::configuration_at(format!("unknown node type '{}'", element.tag), position())
        })?;

        let name = match (entry.derive_name)(element) {
            Some(name) => name,
            None if parent.is_none() => "root".to_string(),
            None => {
                return Err(Error::configuration_at(
                    format!("<{}> has no name", element.tag),
                    position(),
                ))
            }
        };
        validate_node_name(&name)
            .map_err(|e| Error::configuration_at(e.to_string(), position()))?;

        let behavior = (entry.factory)(element).map_err(|e| match e {
            Error::Configuration {
                message,
                position: None,
            } => Error::configuration_at(message, position()),
            other => other,
        })?;
        let actions = (entry.actions)()?;

        Ok(Node::new(
            NodeName::new(name),
            element.tag.clone(),
            parent,
            behavior,
            actions,
            self.clone(),
        ))
    }
}
