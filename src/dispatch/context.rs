//! Request, caller and per-dispatch context.

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::capabilities::Credentials;
use crate::kernel::Node;
use crate::types::{Error, Result};

// =============================================================================
// Request
// =============================================================================

/// A path-addressed request as fed in by a listener.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
    /// Absolute path, `/seg1/seg2/`.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list: Option<String>,
    /// Query-string pairs, consulted before headers.
    #[serde(default)]
    pub query: Vec<(String, String)>,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(skip)]
    pub body: Bytes,
}

impl Request {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_list(mut self, list: impl Into<String>) -> Self {
        self.list = Some(list.into());
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Named parameter: query first, then headers; first match wins.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .chain(self.headers.iter())
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Who is calling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallerContext {
    pub principal: Option<String>,
    pub credentials: Credentials,
}

impl CallerContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_credential(mut self, credential: &str) -> Self {
        self.credentials.grant(credential);
        self
    }

    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    pub fn who(&self) -> &str {
        self.principal.as_deref().unwrap_or("anonymous")
    }
}

// =============================================================================
// Output
// =============================================================================

/// Raw response output stream.
#[derive(Debug, Default)]
pub struct ResponseWriter {
    buf: BytesMut,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn write_str(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }

    /// Whether any output was produced.
    pub fn has_started(&self) -> bool {
        !self.buf.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

impl std::io::Write for ResponseWriter {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.write_bytes(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

// =============================================================================
// Dispatch context and frames
// =============================================================================

/// One entered node and the absolute path offset consumed up to it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub node: Arc<Node>,
    pub offset: usize,
}

/// State carried through one walk of the tree.
#[derive(Debug)]
pub struct DispatchContext<'r> {
    request: &'r Request,
    caller: &'r CallerContext,
    stack: Vec<Frame>,
    pub output: ResponseWriter,
    /// Payload set by a node's request hook.
    pub payload: Option<Value>,
}

impl<'r> DispatchContext<'r> {
    pub fn new(request: &'r Request, caller: &'r CallerContext) -> Self {
        Self {
            request,
            caller,
            stack: Vec::new(),
            output: ResponseWriter::new(),
            payload: None,
        }
    }

    pub fn request(&self) -> &'r Request {
        self.request
    }

    pub fn caller(&self) -> &'r CallerContext {
        self.caller
    }

    pub fn stack(&self) -> &[Frame] {
        &self.stack
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Offset consumed up to the innermost frame.
    pub fn offset(&self) -> usize {
        self.stack.last().map_or(0, |f| f.offset)
    }

    /// Path below the innermost frame, without a leading `/`.
    pub fn remaining(&self) -> &'r str {
        let path: &'r str = &self.request.path;
        path.get(self.offset()..).unwrap_or("")
    }

    /// Path below `node`'s frame, for nodes that serve sub-trees generically.
    pub fn relative_path(&self, node: &Node) -> Option<&'r str> {
        let path: &'r str = &self.request.path;
        self.stack
            .iter()
            .rev()
            .find(|f| std::ptr::eq(Arc::as_ptr(&f.node), node))
            .and_then(|f| path.get(f.offset..))
    }

    /// Push a frame for `node`, consuming `consumed` more bytes of the path.
    /// The frame is popped when the returned scope drops.
    pub fn enter(&mut self, node: Arc<Node>, consumed: usize) -> FrameScope<'_, 'r> {
        let offset = self.offset() + consumed;
        self.stack.push(Frame { node, offset });
        FrameScope { ctx: self }
    }
}

/// Pops its frame on drop, on success and failure alike.
#[derive(Debug)]
pub struct FrameScope<'c, 'r> {
    ctx: &'c mut DispatchContext<'r>,
}

impl<'r> Deref for FrameScope<'_, 'r> {
    type Target = DispatchContext<'r>;

    fn deref(&self) -> &Self::Target {
        self.ctx
    }
}

impl<'r> DerefMut for FrameScope<'_, 'r> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx
    }
}

impl Drop for FrameScope<'_, '_> {
    fn drop(&mut self) {
        self.ctx.stack.pop();
    }
}

// =============================================================================
// Invocation
// =============================================================================

/// Everything an action body is bound to.
#[derive(Debug)]
pub struct Invocation<'a> {
    node: &'a Arc<Node>,
    caller: &'a CallerContext,
    request: &'a Request,
    args: Map<String, Value>,
    output: &'a mut ResponseWriter,
}

impl<'a> Invocation<'a> {
    pub(crate) fn new(
        node: &'a Arc<Node>,
        caller: &'a CallerContext,
        request: &'a Request,
        args: Map<String, Value>,
        output: &'a mut ResponseWriter,
    ) -> Self {
        Self {
            node,
            caller,
            request,
            args,
            output,
        }
    }

    pub fn node(&self) -> &Arc<Node> {
        self.node
    }

    pub fn caller(&self) -> &CallerContext {
        self.caller
    }

    pub fn request(&self) -> &Request {
        self.request
    }

    /// Raw request body.
    pub fn input(&self) -> &Bytes {
        &self.request.body
    }

    pub fn output(&mut self) -> &mut ResponseWriter {
        self.output
    }

    pub fn args(&self) -> &Map<String, Value> {
        &self.args
    }

    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    /// Typed argument struct built from every bound parameter.
    pub fn args_as<A: DeserializeOwned>(&self) -> Result<A> {
        serde_json::from_value(Value::Object(self.args.clone()))
            .map_err(|e| Error::validation(format!("invalid arguments: {}", e)))
    }

    /// One bound parameter, converted to `T`.
    pub fn param<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let value = self.args.get(name).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value)
            .map_err(|e| Error::validation(format!("parameter '{}': {}", name, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::Element;
    use crate::kernel::NodeTypeRegistry;

    fn node(name: &str) -> Arc<Node> {
        let registry = Arc::new(NodeTypeRegistry::with_builtins());
        registry
            .instantiate(&Element::named("node", name), None, None)
            .unwrap()
    }

    #[test]
    fn test_param_prefers_query_over_headers() {
        let req = Request::new("/")
            .with_header("Mode", "header")
            .with_query("mode", "query");
        assert_eq!(req.param("MODE"), Some("query"));
        assert_eq!(req.param("other"), None);
    }

    #[test]
    fn test_frames_pop_on_drop() {
        let req = Request::new("/jobs/nightly/");
        let caller = CallerContext::anonymous();
        let mut ctx = DispatchContext::new(&req, &caller);
        let root = node("root");
        let jobs = node("jobs");

        let mut root_frame = ctx.enter(root.clone(), 1);
        assert_eq!(root_frame.remaining(), "jobs/nightly/");
        {
            let jobs_frame = root_frame.enter(jobs.clone(), 5);
            assert_eq!(jobs_frame.remaining(), "nightly/");
            assert_eq!(jobs_frame.depth(), 2);
            assert_eq!(jobs_frame.relative_path(&root), Some("jobs/nightly/"));
        }
        assert_eq!(root_frame.depth(), 1);
        drop(root_frame);
        assert_eq!(ctx.depth(), 0);
    }

    #[test]
    fn test_response_writer_started() {
        let mut out = ResponseWriter::new();
        assert!(!out.has_started());
        std::io::Write::write_all(&mut out, b"partial").unwrap();
        assert!(out.has_started());
        assert_eq!(out.into_bytes(), Bytes::from_static(b"partial"));
    }

    #[derive(Debug, Deserialize)]
    struct StartArgs {
        delay: i64,
        mode: Option<String>,
    }

    #[test]
    fn test_invocation_typed_args() {
        let req = Request::new("/");
        let caller = CallerContext::anonymous();
        let target = node("root");
        let mut out = ResponseWriter::new();
        let mut args = Map::new();
        args.insert("delay".to_string(), Value::from(5));
        args.insert("mode".to_string(), Value::Null);
        let inv = Invocation::new(&target, &caller, &req, args, &mut out);

        let parsed: StartArgs = inv.args_as().unwrap();
        assert_eq!(parsed.delay, 5);
        assert!(parsed.mode.is_none());
        assert_eq!(inv.param::<i64>("delay").unwrap(), 5);
        assert!(inv.param::<i64>("mode").is_err());
    }
}
