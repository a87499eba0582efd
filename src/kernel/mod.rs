//! Kernel: owns the node tree, the type registry and the dispatcher.
//!
//! There is no kernel-wide lock around the tree: reloads and requests are
//! serialized per node by each node's [`HierarchicalLock`]. The kernel only
//! serializes whole-tree loads against each other and guards the root slot.

mod behavior;
mod builtin;
mod lock;
mod node;
mod registry;
mod reload;
mod types;
mod watcher;

pub use behavior::{AsAny, NodeBehavior, NodeType};
pub use builtin::FolderNode;
pub use lock::{HierarchicalLock, ReadGuard, UpgradeableGuard, WriteGuard};
pub use node::{AuxHandler, Node};
pub use registry::NodeTypeRegistry;
pub use reload::{ReloadError, ReloadReport, ReloadScope, ReloadTransaction};
pub use types::NodeState;
pub use watcher::DeclarationWatcher;

use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::declaration::{Declaration, Element};
use crate::dispatch::{CallerContext, Dispatcher, Outcome, Request, Response};
use crate::types::{Config, Error, NodeName, Result};

#[derive(Debug)]
pub struct Kernel {
    config: Config,
    registry: Arc<NodeTypeRegistry>,
    root: RwLock<Option<Arc<Node>>>,
    dispatcher: Arc<Dispatcher>,
    /// Serializes whole-tree loads.
    load_gate: Mutex<()>,
}

impl Kernel {
    /// Kernel with only the built-in node types.
    pub fn new(config: Config) -> Self {
        Self::with_registry(config, NodeTypeRegistry::with_builtins())
    }

    pub fn with_registry(config: Config, registry: NodeTypeRegistry) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(config.dispatch.clone()));
        Self {
            config,
            registry: Arc::new(registry),
            root: RwLock::new(None),
            dispatcher,
            load_gate: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<NodeTypeRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn root(&self) -> Option<Arc<Node>> {
        self.root.read().clone()
    }

    fn require_root(&self) -> Result<Arc<Node>> {
        self.root()
            .ok_or_else(|| Error::not_found("no declaration has been loaded"))
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Load or reload the whole tree from a parsed declaration.
    ///
    /// The existing root is reused when the new root element has the same tag
    /// and name. Otherwise a fresh root is built and reloaded off to the side,
    /// published only once its transaction has finished, and the old tree is
    /// disposed.
    pub fn load(&self, declaration: &Declaration) -> Result<ReloadReport> {
        let _gate = self.load_gate.lock();
        let element = declaration.root().clone();
        let source = declaration.source().cloned();

        let wanted = NodeName::new(
            self.registry
                .derive_name(&element)
                .unwrap_or_else(|| "root".to_string()),
        );
        let report = match self.root() {
            Some(root)
                if !root.is_disposed()
                    && root.tag().eq_ignore_ascii_case(&element.tag)
                    && *root.name() == wanted =>
            {
                ReloadTransaction::execute(&root, element, source)
            }
            _ => {
                let fresh = self
                    .registry
                    .instantiate(&element, None, source.as_deref())?;
                let mut report = ReloadTransaction::execute(&fresh, element, source);
                let previous = self.root.write().replace(fresh);
                if let Some(old) = previous {
                    old.dispose();
                    tracing::info!(tag = old.tag(), "root_replaced");
                    report.disposed.push(old.path().to_string());
                }
                report
            }
        };
        self.log_report(&report);
        Ok(report)
    }

    pub fn load_element(&self, element: Element) -> Result<ReloadReport> {
        self.load(&Declaration::from_element(element))
    }

    /// Parse `path` and load it.
    pub fn load_path(&self, path: &Path) -> Result<ReloadReport> {
        let declaration = Declaration::load(path)?;
        self.load(&declaration)
    }

    /// Reload one subtree in place.
    ///
    /// The parent's declaration is untouched, so a later whole-tree load
    /// restores whatever the document declares for this node.
    ///
    /// Serialized against whole-tree loads.
    pub fn reload_at(&self, path: &str, element: Element) -> Result<ReloadReport> {
        let _gate = self.load_gate.lock();
        let node = self.find(path)?;
        let report = ReloadTransaction::execute(&node, Arc::new(element), None);
        self.log_report(&report);
        Ok(report)
    }

    fn log_report(&self, report: &ReloadReport) {
        let elapsed = Duration::from_millis(report.elapsed_ms);
        tracing::info!(
            transaction_id = %report.transaction_id,
            changed = report.changed.len(),
            created = report.created.len(),
            disposed = report.disposed.len(),
            errors = report.errors.len(),
            elapsed_ms = report.elapsed_ms,
            "reload_completed"
        );
        if elapsed > self.config.reload.slow_reload_threshold {
            tracing::warn!(
                transaction_id = %report.transaction_id,
                elapsed_ms = report.elapsed_ms,
                threshold_ms = self.config.reload.slow_reload_threshold.as_millis() as u64,
                "slow_reload"
            );
        }
    }

    // =========================================================================
    // Lookup and dispatch
    // =========================================================================

    /// Administrative lookup by path; no security checks.
    pub fn find(&self, path: &str) -> Result<Arc<Node>> {
        let mut node = self.require_root()?;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let next = node.child(segment).ok_or_else(|| {
                Error::not_found(format!("{}{}/", node.path(), segment))
            })?;
            node = next;
        }
        Ok(node)
    }

    pub fn dispatch(&self, request: &Request, caller: &CallerContext) -> Result<Outcome> {
        let root = self.require_root()?;
        self.dispatcher.dispatch(&root, request, caller)
    }

    /// Top-level boundary: failures become failure responses.
    pub fn handle(&self, request: &Request, caller: &CallerContext) -> Response {
        match self.require_root() {
            Ok(root) => self.dispatcher.handle(&root, request, caller),
            Err(e) => Response::from_error(&e),
        }
    }

    /// Dispatch on the blocking worker pool.
    pub async fn dispatch_async(&self, request: Request, caller: CallerContext) -> Result<Outcome> {
        let root = self.require_root()?;
        self.dispatcher.dispatch_async(root, request, caller).await
    }

    pub async fn handle_async(&self, request: Request, caller: CallerContext) -> Response {
        match self.require_root() {
            Ok(root) => self.dispatcher.handle_async(root, request, caller).await,
            Err(e) => Response::from_error(&e),
        }
    }

    /// Dispose the whole tree.
    pub fn shutdown(&self) {
        let _gate = self.load_gate.lock();
        if let Some(root) = self.root.write().take() {
            root.dispose();
            tracing::info!("kernel_shutdown");
        }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(children: &[&str]) -> Element {
        children
            .iter()
            .fold(Element::named("node", "root"), |root, name| {
                root.with_child(Element::named("node", *name))
            })
    }

    #[test]
    fn test_load_reuses_root() {
        let kernel = Kernel::default();
        kernel.load_element(tree(&["a"])).unwrap();
        let root = kernel.root().unwrap();
        kernel.load_element(tree(&["a", "b"])).unwrap();
        assert!(Arc::ptr_eq(&root, &kernel.root().unwrap()));
        assert_eq!(root.child_count(), 2);
    }

    #[test]
    fn test_renamed_root_replaces_tree() {
        let kernel = Kernel::default();
        kernel.load_element(tree(&["a"])).unwrap();
        let old = kernel.root().unwrap();
        let report = kernel
            .load_element(Element::named("node", "other"))
            .unwrap();
        assert!(old.is_disposed());
        assert!(!Arc::ptr_eq(&old, &kernel.root().unwrap()));
        assert_eq!(report.disposed, vec!["/"]);
        assert_eq!(kernel.root().unwrap().state(), NodeState::Initialized);
    }

    #[test]
    fn test_replacement_root_published_after_activation() {
        let kernel = Arc::new(Kernel::default());
        kernel.load_element(tree(&["a"])).unwrap();

        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let watcher = {
            let kernel = kernel.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                while !stop.load(std::sync::atomic::Ordering::SeqCst) {
                    if let Some(root) = kernel.root() {
                        assert_ne!(root.state(), NodeState::Initializing);
                        assert_ne!(root.state(), NodeState::Loading);
                    }
                }
            })
        };
        for i in 0..50 {
            let name = if i % 2 == 0 { "other" } else { "root" };
            kernel
                .load_element(Element::named("node", name).with_child(Element::named("node", "a")))
                .unwrap();
        }
        stop.store(true, std::sync::atomic::Ordering::SeqCst);
        watcher.join().unwrap();
    }

    #[test]
    fn test_reload_at_serialized_with_whole_tree_load() {
        let kernel = Arc::new(Kernel::default());
        let full = Element::named("node", "root").with_child(
            Element::named("node", "jobs").with_child(Element::named("node", "nightly")),
        );
        kernel.load_element(full.clone()).unwrap();

        let subtree = {
            let kernel = kernel.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    let report = kernel
                        .reload_at("/jobs/", Element::named("node", "jobs"))
                        .unwrap();
                    assert!(report.is_clean(), "{:?}", report.errors);
                }
            })
        };
        for _ in 0..50 {
            let report = kernel.load_element(full.clone()).unwrap();
            assert!(report.is_clean(), "{:?}", report.errors);
        }
        subtree.join().unwrap();

        kernel.load_element(full).unwrap();
        let nightly = kernel.find("/jobs/nightly/").unwrap();
        assert_eq!(nightly.state(), NodeState::Initialized);
    }

    #[test]
    fn test_unknown_root_type_keeps_old_tree() {
        let kernel = Kernel::default();
        kernel.load_element(tree(&["a"])).unwrap();
        let err = kernel
            .load_element(Element::named("mystery", "root"))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(!kernel.root().unwrap().is_disposed());
    }

    #[test]
    fn test_find_and_reload_at() {
        let kernel = Kernel::default();
        kernel
            .load_element(
                Element::named("node", "root")
                    .with_child(Element::named("node", "jobs").with_child(Element::named("node", "n1"))),
            )
            .unwrap();
        let jobs = kernel.find("/Jobs/").unwrap();
        let report = kernel
            .reload_at("/jobs/", Element::named("node", "jobs").with_child(Element::named("node", "n2")))
            .unwrap();
        assert_eq!(report.created, vec!["/jobs/n2/"]);
        assert!(jobs.child("n1").is_none());
        assert!(matches!(kernel.find("/jobs/n1/"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_dispatch_without_tree() {
        let kernel = Kernel::default();
        let response = kernel.handle(&Request::new("/"), &CallerContext::anonymous());
        assert_eq!(response.status, 404);
    }

    #[test]
    fn test_shutdown_disposes_tree() {
        let kernel = Kernel::default();
        kernel.load_element(tree(&["a"])).unwrap();
        let root = kernel.root().unwrap();
        kernel.shutdown();
        assert!(root.is_disposed());
        assert!(kernel.root().is_none());
    }
}
