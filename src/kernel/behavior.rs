//! Node behavior hooks and node-type registration.
//!
//! Every node owns one `Box<dyn NodeBehavior>`. The kernel calls the hooks from
//! the reload transaction and the dispatcher; a type that needs none of them
//! only implements [`NodeType::create`].

use std::any::Any;
use std::sync::Arc;

use crate::capabilities::ActionTableBuilder;
use crate::declaration::Element;
use crate::dispatch::DispatchContext;
use crate::kernel::node::Node;
use crate::kernel::reload::ReloadScope;
use crate::types::Result;

/// Typed access to a behavior behind `dyn NodeBehavior`.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Per-instance hooks invoked by the kernel.
pub trait NodeBehavior: AsAny + Send + Sync {
    /// Check a declaration before it is activated. Runs under the node's
    /// write lock in the begin phase.
    fn validate(&self, _node: &Node, _declaration: &Element) -> Result<()> {
        Ok(())
    }

    /// Begin reconfiguration. `scope` holds the fragments that matched no
    /// existing child; the default registers each as a new child node.
    fn begin_reload(&self, _node: &Arc<Node>, scope: &mut ReloadScope<'_>) -> Result<()> {
        scope.create_unclaimed()
    }

    /// Called after the new declaration is swapped in.
    fn end_reload(&self, _node: &Node) -> Result<()> {
        Ok(())
    }

    /// Claim a request addressed at or below this node. Runs under the read
    /// locks of the walk; long work belongs in an action.
    fn handle_request(&self, _node: &Arc<Node>, _ctx: &mut DispatchContext<'_>) -> Result<bool> {
        Ok(false)
    }

    /// Release resources. Children are already disposed when this runs.
    fn dispose(&self, _node: &Node) {}
}

/// A node type: how to build it and which actions every instance carries.
pub trait NodeType: NodeBehavior + Sized + 'static {
    fn create(declaration: &Element) -> Result<Self>;

    /// Register the statically declared actions. Runs once per type.
    fn register_actions(_actions: &mut ActionTableBuilder) -> Result<()> {
        Ok(())
    }

    /// Derive the node name from its fragment (default: `name` attribute).
    fn derive_name(declaration: &Element) -> Option<String> {
        declaration.name().map(str::to_string)
    }
}
