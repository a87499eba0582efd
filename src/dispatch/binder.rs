//! Action binder: parameter binding, guarded invocation, result normalization.

use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::context::{DispatchContext, Invocation, Request};
use crate::capabilities::{demand, ActionDef};
use crate::kernel::Node;
use crate::types::{contain, Error, Result};

/// Payload and status produced by one action call.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionResult {
    pub payload: Value,
    pub status: u16,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ActionBinder;

impl ActionBinder {
    pub fn new() -> Self {
        Self
    }

    /// Convert the request's named parameters into arguments for `action`.
    pub fn bind(&self, action: &ActionDef, request: &Request) -> Result<Map<String, Value>> {
        let mut args = Map::new();
        let mut errors = Vec::new();
        for param in &action.parameters {
            match param.bind(request.param(&param.name)) {
                Ok(value) => {
                    args.insert(param.name.clone(), value);
                }
                Err(e) => errors.push(format!("parameter '{}': {}", param.name, e)),
            }
        }
        if !errors.is_empty() {
            return Err(Error::validation(format!(
                "action '{}': {}",
                action.id,
                errors.join("; ")
            )));
        }
        Ok(args)
    }

    /// Demand security, bind, run and normalize.
    ///
    /// Must be called with no walk locks held.
    pub fn invoke(
        &self,
        node: &Arc<Node>,
        action: &ActionDef,
        ctx: &mut DispatchContext<'_>,
    ) -> Result<ActionResult> {
        if action.is_empty() {
            return Err(Error::not_found(format!(
                "action '{}' on {}",
                action.id,
                node.path()
            )));
        }
        demand(
            action.security.as_deref(),
            &ctx.caller().credentials,
            &format!("action '{}' on {}", action.id, node.path()),
        )?;
        if node.is_disposed() {
            return Err(Error::invalid_operation(format!(
                "node {} is disposed",
                node.path()
            )));
        }

        let args = self.bind(action, ctx.request())?;
        let (request, caller) = (ctx.request(), ctx.caller());
        let mut inv = Invocation::new(node, caller, request, args, &mut ctx.output);
        let outcome = contain(&format!("action '{}'", action.id), || action.call(&mut inv));

        match outcome {
            Ok(result) => {
                tracing::debug!(node = %node.path(), action = %action.id, caller = caller.who(), "action_invoked");
                Ok(ActionResult {
                    payload: Self::normalize(result),
                    status: 200,
                })
            }
            Err(e) if action.safe_call && !ctx.output.has_started() => {
                tracing::warn!(
                    node = %node.path(),
                    action = %action.id,
                    error = %e,
                    "safe_call_failed"
                );
                Ok(ActionResult {
                    payload: e.to_payload(),
                    status: e.status(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// `None`/null → `{"status":"ok"}`; an object without `status` gains
    /// `"status":"ok"`; other values are wrapped as `result`.
    pub fn normalize(result: Option<Value>) -> Value {
        match result {
            None | Some(Value::Null) => json!({"status": "ok"}),
            Some(Value::Object(mut map)) => {
                if !map.contains_key("status") {
                    map.insert("status".to_string(), Value::from("ok"));
                }
                Value::Object(map)
            }
            Some(other) => json!({"status": "ok", "result": other}),
        }
    }
}
