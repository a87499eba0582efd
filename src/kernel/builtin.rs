//! Built-in node types.

use serde_json::json;

use crate::capabilities::{ActionDef, ActionTableBuilder};
use crate::declaration::Element;
use crate::kernel::behavior::{NodeBehavior, NodeType};
use crate::types::Result;

/// Plain container node (`<node>`). Its children come from its declaration;
/// it serves no requests of its own beyond introspection.
#[derive(Debug, Default)]
pub struct FolderNode;

impl FolderNode {
    pub const TAG: &'static str = "node";
}

impl NodeBehavior for FolderNode {}

impl NodeType for FolderNode {
    fn create(_declaration: &Element) -> Result<Self> {
        Ok(Self)
    }

    fn register_actions(actions: &mut ActionTableBuilder) -> Result<()> {
        actions
            .register(
                ActionDef::new("describe", |inv| {
                    let export = inv.node().describe();
                    Ok(Some(serde_json::to_value(export)?))
                })
                .describe("List the actions, lists and properties of this node")
                .returns("capabilities"),
            )?
            .register(
                ActionDef::new("state", |inv| {
                    let node = inv.node();
                    let children: Vec<String> =
                        node.children().iter().map(|c| c.name().to_string()).collect();
                    Ok(Some(json!({
                        "path": node.path(),
                        "state": node.state().as_str(),
                        "children": children,
                    })))
                })
                .describe("Lifecycle state and child names")
                .returns("state"),
            )?;
        Ok(())
    }
}
