//! Declaration documents: the nested element/attribute tree a node hierarchy
//! is built from.
//!
//! A document is immutable once parsed. Nodes hold `Arc<Element>` snapshots of
//! their own fragment, and a reload swaps the whole snapshot at once.
//!
//! JSON wire form (every non-reserved string key is an attribute):
//! ```text
//! { "tag": "node", "name": "root", "children": [
//!     { "tag": "node", "name": "jobs", "children": [
//!         { "tag": "job", "name": "nightly", "security": "ops" } ] } ] }
//! ```

mod loader;

pub use loader::Declaration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Attribute naming a node; unique among siblings.
pub const ATTR_NAME: &str = "name";
/// Security token a caller must satisfy to pass through the node.
pub const ATTR_SECURITY: &str = "security";
/// Cosmetic display name.
pub const ATTR_DISPLAY_NAME: &str = "displayname";
/// Path prefix claimed by an auxiliary handler.
pub const ATTR_VIRTUAL_ROOT: &str = "virtualroot";
/// Ordering among auxiliary handlers (higher first).
pub const ATTR_PRIORITY: &str = "priority";

const RESERVED_KEYS: [&str; 3] = ["tag", "text", "children"];

/// One element of a declaration document.
///
/// Attribute keys are stored lowercased, so lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireElement")]
pub struct Element {
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Element>,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, String>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            text: None,
            children: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// Shorthand for `Element::new(tag).with_attr("name", name)`.
    pub fn named(tag: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(tag).with_attr(ATTR_NAME, name)
    }

    pub fn with_attr(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.attributes
            .insert(key.as_ref().to_lowercase(), value.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(&key.to_lowercase()).map(String::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.attr(ATTR_NAME)
    }

    pub fn security(&self) -> Option<&str> {
        self.attr(ATTR_SECURITY).filter(|s| !s.trim().is_empty())
    }

    pub fn display_name(&self) -> Option<&str> {
        self.attr(ATTR_DISPLAY_NAME)
    }

    pub fn virtual_root(&self) -> Option<&str> {
        self.attr(ATTR_VIRTUAL_ROOT)
    }

    /// Auxiliary-handler priority; absent means 0.
    pub fn priority(&self) -> std::result::Result<i32, String> {
        match self.attr(ATTR_PRIORITY) {
            None => Ok(0),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| format!("priority '{}' is not an integer", raw)),
        }
    }

    /// Compare tag, attributes and text; sub-elements are ignored.
    pub fn own_level_eq(&self, other: &Element) -> bool {
        self.tag.eq_ignore_ascii_case(&other.tag)
            && self.attributes == other.attributes
            && self.text == other.text
    }
}

/// Wire representation; attribute values may be any JSON scalar.
#[derive(Debug, Deserialize, JsonSchema)]
pub(crate) struct WireElement {
    /// Node type tag, resolved against the node-type registry.
    tag: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    children: Vec<WireElement>,
    /// Attributes (`name`, `security`, `displayname`, `virtualroot`, `priority`, ...).
    #[serde(flatten)]
    attributes: BTreeMap<String, Value>,
}

impl TryFrom<WireElement> for Element {
    type Error = String;

    fn try_from(wire: WireElement) -> std::result::Result<Self, Self::Error> {
        if wire.tag.trim().is_empty() {
            return Err("element tag cannot be empty".to_string());
        }
        let mut attributes = BTreeMap::new();
        for (key, value) in wire.attributes {
            let key = key.to_lowercase();
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            let value = match value {
                Value::String(s) => s,
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                Value::Null => continue,
                Value::Array(_) | Value::Object(_) => {
                    return Err(format!(
                        "attribute '{}' of <{}> must be a scalar",
                        key, wire.tag
                    ))
                }
            };
            if attributes.insert(key.clone(), value).is_some() {
                return Err(format!(
                    "attribute '{}' of <{}> is declared twice",
                    key, wire.tag
                ));
            }
        }
        let children = wire
            .children
            .into_iter()
            .map(Element::try_from)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Element {
            tag: wire.tag,
            text: wire.text,
            children,
            attributes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_lookup_is_case_insensitive() {
        let e = Element::named("node", "jobs").with_attr("Security", "ops");
        assert_eq!(e.attr("SECURITY"), Some("ops"));
        assert_eq!(e.security(), Some("ops"));
        assert_eq!(e.name(), Some("jobs"));
    }

    #[test]
    fn test_blank_security_means_none() {
        let e = Element::named("node", "x").with_attr("security", "  ");
        assert_eq!(e.security(), None);
    }

    #[test]
    fn test_own_level_eq_ignores_children() {
        let a = Element::named("node", "jobs").with_child(Element::named("job", "a"));
        let b = Element::named("node", "jobs").with_child(Element::named("job", "b"));
        assert!(a.own_level_eq(&b));
        assert_ne!(a, b);

        let c = Element::named("node", "jobs").with_attr("displayname", "Jobs");
        assert!(!a.own_level_eq(&c));
    }

    #[test]
    fn test_priority_parsing() {
        assert_eq!(Element::new("x").priority(), Ok(0));
        assert_eq!(Element::new("x").with_attr("priority", "7").priority(), Ok(7));
        assert!(Element::new("x").with_attr("priority", "high").priority().is_err());
    }

    #[test]
    fn test_scalar_attributes_become_strings() {
        let e: Element = serde_json::from_value(serde_json::json!({
            "tag": "static",
            "name": "files",
            "priority": 10,
            "enabled": true,
            "children": [{"tag": "node", "name": "inner"}],
        }))
        .unwrap();
        assert_eq!(e.attr("priority"), Some("10"));
        assert_eq!(e.attr("enabled"), Some("true"));
        assert_eq!(e.children.len(), 1);
    }

    #[test]
    fn test_nested_attribute_rejected() {
        let result: std::result::Result<Element, _> = serde_json::from_value(serde_json::json!({
            "tag": "node",
            "name": {"nested": true},
        }));
        assert!(result.is_err());
    }
}
