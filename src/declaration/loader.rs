//! Declaration loading: parse a document into an immutable snapshot.

use std::path::Path;
use std::sync::Arc;

use super::{Element, WireElement};
use crate::types::{Error, Result, SourcePosition};

/// A parsed declaration document plus the id of the source it came from.
#[derive(Debug, Clone)]
pub struct Declaration {
    source: Option<Arc<str>>,
    root: Arc<Element>,
}

impl Declaration {
    /// Wrap an in-memory element tree.
    pub fn from_element(root: Element) -> Self {
        Self {
            source: None,
            root: Arc::new(root),
        }
    }

    /// Parse JSON text. `source` names the document in error positions.
    pub fn parse(source: Option<&str>, text: &str) -> Result<Self> {
        let root: Element = serde_json::from_str(text).map_err(|e| {
            Error::configuration_at(
                format!("invalid declaration: {}", e),
                SourcePosition::at(source, e.line(), e.column()),
            )
        })?;
        Ok(Self {
            source: source.map(Arc::from),
            root: Arc::new(root),
        })
    }

    /// Read and parse a declaration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(Some(&path.display().to_string()), &text)
    }

    pub fn root(&self) -> &Arc<Element> {
        &self.root
    }

    pub fn source(&self) -> Option<&Arc<str>> {
        self.source.as_ref()
    }

    /// JSON schema of the document format.
    pub fn schema() -> serde_json::Value {
        let schema = schemars::schema_for!(WireElement);
        serde_json::to_value(schema).unwrap_or(serde_json::Value::Null)
    }
}
