//! Capability metadata export for introspection.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::actions::ActionInfo;
use super::lists::ListInfo;
use super::properties::PropertyInfo;

/// Everything a node publishes, as plain data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CapabilityExport {
    pub node: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<String>,
    pub actions: Vec<ActionInfo>,
    pub lists: Vec<ListInfo>,
    pub properties: Vec<PropertyInfo>,
}

impl CapabilityExport {
    /// One signature line per action, in id order.
    pub fn signature_lines(&self) -> Vec<String> {
        self.actions
            .iter()
            .map(ActionInfo::to_signature_line)
            .collect()
    }

    /// JSON schema of the export document.
    pub fn schema() -> serde_json::Value {
        let schema = schemars::schema_for!(CapabilityExport);
        serde_json::to_value(schema).unwrap_or_default()
    }
}
