//! Dispatcher: walks the tree by path, then hands off to the action binder.
//!
//! The walk read-locks each node it passes through (ancestors stay locked
//! while descendants are entered) and resolves the request to an action, a
//! list snapshot or a claiming hook. Every walk lock is released before an
//! action body runs.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

use super::binder::ActionBinder;
use super::context::{CallerContext, DispatchContext, Request};
use super::response::{Outcome, Response};
use crate::capabilities::{demand, ActionDef};
use crate::kernel::Node;
use crate::types::{contain, DispatchConfig, Error, Result};

/// What the walk settled on.
enum Resolution {
    Action {
        node: Arc<Node>,
        action: Arc<ActionDef>,
    },
    Payload(Value),
    Handled,
    NotHandled,
}

#[derive(Debug)]
pub struct Dispatcher {
    config: DispatchConfig,
    binder: ActionBinder,
    workers: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        let permits = config.max_concurrent_actions.max(1);
        Self {
            config,
            binder: ActionBinder::new(),
            workers: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn binder(&self) -> &ActionBinder {
        &self.binder
    }

    /// Walk from `root`, resolve, then execute. Errors propagate.
    pub fn dispatch(
        &self,
        root: &Arc<Node>,
        request: &Request,
        caller: &CallerContext,
    ) -> Result<Outcome> {
        let started = Instant::now();
        self.validate_path(&request.path)?;
        demand(root.security().as_deref(), &caller.credentials, root.path())?;

        let mut ctx = DispatchContext::new(request, caller);
        let resolution = {
            let mut frame = ctx.enter(root.clone(), 1);
            self.walk(root, &mut frame)?
        };
        debug_assert_eq!(ctx.depth(), 0);

        let outcome = match resolution {
            Resolution::Action { node, action } => {
                let result = self.binder.invoke(&node, &action, &mut ctx)?;
                Outcome::handled(
                    result.status,
                    Some(result.payload),
                    std::mem::take(&mut ctx.output).into_bytes(),
                )
            }
            Resolution::Payload(payload) => Outcome::handled(
                200,
                Some(payload),
                std::mem::take(&mut ctx.output).into_bytes(),
            ),
            Resolution::Handled => Outcome::handled(
                200,
                ctx.payload.take(),
                std::mem::take(&mut ctx.output).into_bytes(),
            ),
            Resolution::NotHandled => Outcome::not_handled(),
        };

        tracing::debug!(
            path = %request.path,
            caller = caller.who(),
            handled = outcome.handled,
            status = outcome.status,
            elapsed_us = started.elapsed().as_micros() as u64,
            "request_dispatched"
        );
        Ok(outcome)
    }

    /// Top-level boundary: every failure becomes a failure response.
    pub fn handle(&self, root: &Arc<Node>, request: &Request, caller: &CallerContext) -> Response {
        match self.dispatch(root, request, caller) {
            Ok(outcome) => outcome.into(),
            Err(e) => {
                Self::log_failure(request, &e);
                Response::from_error(&e)
            }
        }
    }

    /// Run the whole dispatch on the blocking pool, bounded by
    /// `max_concurrent_actions`.
    pub async fn dispatch_async(
        self: &Arc<Self>,
        root: Arc<Node>,
        request: Request,
        caller: CallerContext,
    ) -> Result<Outcome> {
        let permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::internal("dispatch worker pool is closed"))?;
        let dispatcher = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            dispatcher.dispatch(&root, &request, &caller)
        })
        .await
        .map_err(|e| Error::internal(format!("dispatch task failed: {}", e)))?
    }

    /// Async counterpart of [`handle`](Self::handle).
    pub async fn handle_async(
        self: &Arc<Self>,
        root: Arc<Node>,
        request: Request,
        caller: CallerContext,
    ) -> Response {
        let path = request.path.clone();
        match self.dispatch_async(root, request, caller).await {
            Ok(outcome) => outcome.into(),
            Err(e) => {
                Self::log_failure(&Request::new(path), &e);
                Response::from_error(&e)
            }
        }
    }

    fn log_failure(request: &Request, err: &Error) {
        match err {
            Error::Unauthorized(_) | Error::NotFound(_) | Error::Validation(_) => {
                tracing::debug!(path = %request.path, code = err.code(), error = %err, "request_rejected");
            }
            _ => tracing::error!(path = %request.path, code = err.code(), error = %err, "request_failed"),
        }
    }

    fn validate_path(&self, path: &str) -> Result<()> {
        let inner = path
            .strip_prefix('/')
            .ok_or_else(|| Error::validation(format!("path '{}' must start with '/'", path)))?;
        let inner = inner.strip_suffix('/').unwrap_or(inner);
        if inner.is_empty() {
            return Ok(());
        }
        let mut segments = 0;
        for segment in inner.split('/') {
            if segment.is_empty() {
                return Err(Error::validation(format!(
                    "path '{}' has an empty segment",
                    path
                )));
            }
            segments += 1;
        }
        if segments > self.config.max_path_segments {
            return Err(Error::validation(format!(
                "path has {} segments, limit is {}",
                segments, self.config.max_path_segments
            )));
        }
        Ok(())
    }

    fn walk(&self, node: &Arc<Node>, ctx: &mut DispatchContext<'_>) -> Result<Resolution> {
        let _read = node.lock().read();
        if node.is_disposed() {
            return Err(Error::not_found(node.path().to_string()));
        }
        let remaining = ctx.remaining();

        if remaining.is_empty() {
            if let Some(id) = ctx.request().action.as_deref() {
                let action = node.resolve_action(id);
                if action.is_empty() {
                    return Err(Error::not_found(format!(
                        "action '{}' on {}",
                        id,
                        node.path()
                    )));
                }
                return Ok(Resolution::Action {
                    node: node.clone(),
                    action,
                });
            }
            if let Some(id) = ctx.request().list.as_deref() {
                let list = node.capabilities().list(id).ok_or_else(|| {
                    Error::not_found(format!("list '{}' on {}", id, node.path()))
                })?;
                demand(
                    list.security.as_deref(),
                    &ctx.caller().credentials,
                    &format!("list '{}' on {}", list.id, node.path()),
                )?;
                return Ok(Resolution::Payload(json!({
                    "status": "ok",
                    "list": list.id.as_str(),
                    "items": list.snapshot(),
                })));
            }
        }

        if contain("request hook", || node.behavior_dyn().handle_request(node, ctx))? {
            return Ok(Resolution::Handled);
        }

        let segment = remaining.split('/').next().unwrap_or("");
        if !segment.is_empty() {
            if let Some(child) = node.child(segment) {
                demand(child.security().as_deref(), &ctx.caller().credentials, child.path())?;
                let consumed = (segment.len() + 1).min(remaining.len());
                let mut frame = ctx.enter(child.clone(), consumed);
                return self.walk(&child, &mut frame);
            }
        }

        for aux in node.aux_handlers() {
            let Some(consumed) = aux.matches(remaining) else {
                continue;
            };
            demand(
                aux.node.security().as_deref(),
                &ctx.caller().credentials,
                aux.node.path(),
            )?;
            let mut frame = ctx.enter(aux.node.clone(), consumed);
            match self.walk(&aux.node, &mut frame) {
                Ok(Resolution::NotHandled) | Err(Error::NotFound(_)) => continue,
                resolved => return resolved,
            }
        }

        if segment.is_empty() {
            Ok(Resolution::NotHandled)
        } else {
            Err(Error::not_found(format!("{}{}/", node.path(), segment)))
        }
    }
}
