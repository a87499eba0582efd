//! Reload transaction: replace a node's declaration and reconcile its subtree.
//!
//! Three phases per node:
//!
//! 1. **Prepare** (upgradeable hold): diff the new fragment against the
//!    current snapshot at the node's own level, then match each child
//!    fragment to an existing child by name. A match becomes a nested
//!    transaction; the rest stay unclaimed for the begin hook.
//! 2. **Begin** (write hold): `Loading`, validate, run the begin hook (which
//!    may create children for unclaimed fragments), then dispose every child
//!    that no nested transaction claimed. Nested begins follow.
//! 3. **End** (write hold): swap the declaration snapshot, run the end hook,
//!    run nested ends, settle on `Initialized` or `Invalid`.
//!
//! The write hold taken in begin is kept until the node's end has finished,
//! so no reader walks into a node between its phases. Begin re-checks the
//! prepare-time association under that hold, in case the child set changed
//! in between.
//!
//! Failures are recorded per node. A failing node goes `Invalid`; its
//! siblings and descendants still reload. Disposed children are never
//! restored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use crate::capabilities::SecurityToken;
use crate::declaration::Element;
use crate::kernel::lock::WriteGuard;
use crate::kernel::node::Node;
use crate::kernel::types::NodeState;
use crate::types::{contain, Error, NodeName, SourcePosition, TransactionId};

/// Outcome of one reload over a subtree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadReport {
    pub transaction_id: TransactionId,
    /// Nodes whose own declaration or child set changed.
    pub changed: Vec<String>,
    pub created: Vec<String>,
    pub disposed: Vec<String>,
    /// (node path, message) for every node left `Invalid`.
    pub errors: Vec<ReloadError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_ms: u64,
}

/// One recorded failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadError {
    pub node: String,
    pub code: String,
    pub message: String,
}

impl ReloadReport {
    fn new() -> Self {
        Self {
            transaction_id: TransactionId::new(),
            changed: Vec::new(),
            created: Vec::new(),
            disposed: Vec::new(),
            errors: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            elapsed_ms: 0,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Handed to [`NodeBehavior::begin_reload`](crate::kernel::NodeBehavior::begin_reload).
///
/// Holds the fragments that matched no existing child and collects the
/// children the hook creates, each wrapped in its own nested transaction.
pub struct ReloadScope<'a> {
    node: &'a Arc<Node>,
    guard: &'a WriteGuard<'a>,
    declaration: &'a Arc<Element>,
    unclaimed: Vec<Element>,
    created: Vec<ReloadTransaction>,
    source: Option<Arc<str>>,
}

impl std::fmt::Debug for ReloadScope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadScope")
            .field("node", &self.node.path())
            .field("unclaimed", &self.unclaimed.len())
            .field("created", &self.created.len())
            .finish()
    }
}

impl<'a> ReloadScope<'a> {
    /// The declaration being activated.
    pub fn declaration(&self) -> &Element {
        self.declaration
    }

    /// Fragments that matched no existing child.
    pub fn unclaimed(&self) -> &[Element] {
        &self.unclaimed
    }

    pub fn take_unclaimed(&mut self) -> Vec<Element> {
        std::mem::take(&mut self.unclaimed)
    }

    /// Create a child for `fragment` and associate a nested transaction with it.
    pub fn create_child(&mut self, fragment: Element) -> crate::types::Result<Arc<Node>> {
        let child = self.node.registry().instantiate(
            &fragment,
            Some(self.node),
            self.source.as_deref(),
        )?;
        self.node.insert_child(self.guard, child.clone())?;
        self.created.push(ReloadTransaction::prepare(
            &child,
            Arc::new(fragment),
            self.source.clone(),
        ));
        Ok(child)
    }

    /// Default hook body: a child for every unclaimed fragment.
    ///
    /// Keeps going past a bad fragment; the first error is returned.
    pub fn create_unclaimed(&mut self) -> crate::types::Result<()> {
        let mut first_error = None;
        for fragment in self.take_unclaimed() {
            if let Err(e) = self.create_child(fragment) {
                tracing::error!(node = %self.node.path(), error = %e, "child_create_failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Reload of one node, with nested transactions for its matched children.
#[derive(Debug)]
pub struct ReloadTransaction {
    node: Arc<Node>,
    declaration: Arc<Element>,
    changed: bool,
    created: bool,
    nested: Vec<ReloadTransaction>,
    unclaimed: Vec<Element>,
    /// Existing children whose fragment now names a different node type.
    replaced: Vec<NodeName>,
    error: Option<Error>,
    source: Option<Arc<str>>,
    /// Write hold kept from begin through end.
    held: bool,
}

impl ReloadTransaction {
    /// Run all three phases for `node` and its subtree.
    pub fn execute(
        node: &Arc<Node>,
        declaration: Arc<Element>,
        source: Option<Arc<str>>,
    ) -> ReloadReport {
        let started = Instant::now();
        let mut report = ReloadReport::new();
        {
            let _upgradeable = node.lock().upgradeable_read();
            let mut tx = Self::prepare(node, declaration, source);
            tx.begin(&mut report);
            tx.end(&mut report);
        }
        report.finished_at = Some(Utc::now());
        report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        report
    }

    /// Phase 1: diff and associate.
    fn prepare(node: &Arc<Node>, declaration: Arc<Element>, source: Option<Arc<str>>) -> Self {
        let _upgradeable = node.lock().upgradeable_read();
        let old = node.declaration();
        let created = node.state() == NodeState::Initializing;

        let mut tx = Self {
            node: node.clone(),
            declaration: declaration.clone(),
            changed: false,
            created,
            nested: Vec::new(),
            unclaimed: Vec::new(),
            replaced: Vec::new(),
            error: None,
            source,
            held: false,
        };

        if !old.tag.eq_ignore_ascii_case(&declaration.tag) {
            tx.record(Error::configuration(format!(
                "node type cannot change from <{}> to <{}>",
                old.tag, declaration.tag
            )));
        }

        let mut seen: HashSet<NodeName> = HashSet::new();
        for fragment in &declaration.children {
            let Some(name) = node.registry().derive_name(fragment) else {
                tx.record(Error::configuration(format!(
                    "<{}> child of {} has no name",
                    fragment.tag,
                    node.path()
                )));
                continue;
            };
            let key = NodeName::new(name);
            if !seen.insert(key.clone()) {
                tx.record(Error::configuration(format!(
                    "duplicate child name '{}' under {}",
                    key,
                    node.path()
                )));
                continue;
            }
            match node.child(key.as_str()) {
                Some(child) if child.tag().eq_ignore_ascii_case(&fragment.tag) => {
                    let nested = Self::prepare(&child, Arc::new(fragment.clone()), tx.source.clone());
                    tx.nested.push(nested);
                }
                Some(_) => {
                    tx.replaced.push(key);
                    tx.unclaimed.push(fragment.clone());
                }
                None => tx.unclaimed.push(fragment.clone()),
            }
        }

        let structural = !tx.unclaimed.is_empty() || node.child_count() != tx.nested.len();
        tx.changed = created
            || structural
            || !old.own_level_eq(&declaration)
            || node.state() != NodeState::Initialized
            || tx.error.is_some();
        tx
    }

    /// Phase 2: validate, begin hook, reconcile children.
    fn begin(&mut self, report: &mut ReloadReport) {
        let node = self.node.clone();
        let guard = node.lock().write();
        if node.is_disposed() {
            self.error = Some(Error::invalid_operation(format!(
                "node {} is disposed",
                node.path()
            )));
            return;
        }
        node.lock().hold_write();
        self.held = true;

        if self.refresh_associations(&node) {
            tracing::debug!(node = %node.path(), "reload_association_refreshed");
            self.changed = true;
        }

        if self.changed {
            if let Err(e) = node.set_state(&guard, NodeState::Loading) {
                self.record(e);
            }
            tracing::debug!(node = %node.path(), created = self.created, "reload_begin");

            if self.error.is_none() {
                if let Err(e) = self.run_begin_hooks(&node, &guard, report) {
                    self.record(e);
                }
            }
            self.reconcile(&node, &guard, report);
        }

        for nested in &mut self.nested {
            nested.begin(report);
        }
    }

    /// Re-match children against the prepare-time association. A child that
    /// was removed or replaced since then gives its fragment back as
    /// unclaimed; a child that appeared under an unclaimed name is picked up.
    /// Returns whether anything moved.
    fn refresh_associations(&mut self, node: &Arc<Node>) -> bool {
        let mut moved = false;
        let mut kept = Vec::with_capacity(self.nested.len());
        for nested in std::mem::take(&mut self.nested) {
            match node.child(nested.node.name().as_str()) {
                Some(current) if Arc::ptr_eq(&current, &nested.node) && !current.is_disposed() => {
                    kept.push(nested);
                }
                _ => {
                    moved = true;
                    self.unclaimed.push((*nested.declaration).clone());
                }
            }
        }
        self.nested = kept;

        let mut unclaimed = Vec::with_capacity(self.unclaimed.len());
        for fragment in std::mem::take(&mut self.unclaimed) {
            let existing = node
                .registry()
                .derive_name(&fragment)
                .and_then(|name| node.child(&name));
            match existing {
                Some(child) if self.replaced.contains(child.name()) => unclaimed.push(fragment),
                Some(child) if child.tag().eq_ignore_ascii_case(&fragment.tag) => {
                    moved = true;
                    self.nested
                        .push(Self::prepare(&child, Arc::new(fragment), self.source.clone()));
                }
                Some(child) => {
                    moved = true;
                    self.replaced.push(child.name().clone());
                    unclaimed.push(fragment);
                }
                None => unclaimed.push(fragment),
            }
        }
        self.unclaimed = unclaimed;
        moved
    }

    fn run_begin_hooks(
        &mut self,
        node: &Arc<Node>,
        guard: &WriteGuard<'_>,
        report: &mut ReloadReport,
    ) -> crate::types::Result<()> {
        let declaration = self.declaration.clone();
        contain("validate hook", || {
            node.behavior_dyn().validate(node, &declaration)
        })?;
        declaration
            .priority()
            .map_err(|message| Error::configuration(message))?;
        if let Some(token) = declaration.security() {
            SecurityToken::parse(token)?;
        }

        for name in std::mem::take(&mut self.replaced) {
            if let Some(old) = node.remove_child(guard, &name)? {
                old.dispose();
                report.disposed.push(old.path().to_string());
            }
        }

        let mut scope = ReloadScope {
            node,
            guard,
            declaration: &declaration,
            unclaimed: std::mem::take(&mut self.unclaimed),
            created: Vec::new(),
            source: self.source.clone(),
        };
        let result = contain("begin hook", || {
            node.behavior_dyn().begin_reload(node, &mut scope)
        });
        for created in scope.created {
            report.created.push(created.node.path().to_string());
            self.nested.push(created);
        }
        result
    }

    /// Dispose and unlink every child no nested transaction claimed.
    fn reconcile(&mut self, node: &Arc<Node>, guard: &WriteGuard<'_>, report: &mut ReloadReport) {
        let keep: HashSet<NodeName> = self
            .nested
            .iter()
            .map(|tx| tx.node.name().clone())
            .collect();
        for child in node.children() {
            if keep.contains(child.name()) {
                continue;
            }
            match node.remove_child(guard, child.name()) {
                Ok(_) => {
                    child.dispose();
                    tracing::info!(node = %child.path(), "node_removed");
                    report.disposed.push(child.path().to_string());
                }
                Err(e) => self.record(e),
            }
        }
    }

    /// Phase 3: swap the snapshot, end hook, nested ends, settle state.
    fn end(&mut self, report: &mut ReloadReport) {
        let node = self.node.clone();
        let guard = node.lock().write();
        self.release_hold();
        if node.is_disposed() {
            if let Some(e) = self.error.take() {
                report.errors.push(ReloadError::from_error(node.path(), &e));
            }
            return;
        }

        match node.swap_declaration(&guard, self.declaration.clone()) {
            Ok(true) => tracing::trace!(node = %node.path(), "declaration_swapped"),
            Ok(false) => {}
            Err(e) => self.record(e),
        }

        if self.changed && self.error.is_none() {
            if let Err(e) = contain("end hook", || node.behavior_dyn().end_reload(&node)) {
                self.record(e);
            }
        }

        for nested in &mut self.nested {
            nested.end(report);
        }

        if let Err(e) = node.rebuild_aux_handlers(&guard) {
            self.record(e);
        }

        if self.changed {
            let settled = if self.error.is_none() {
                NodeState::Initialized
            } else {
                NodeState::Invalid
            };
            if let Err(e) = node.set_state(&guard, settled) {
                tracing::error!(node = %node.path(), error = %e, "reload_state_failed");
            }
            report.changed.push(node.path().to_string());
            tracing::debug!(node = %node.path(), state = settled.as_str(), "reload_end");
        }

        if let Some(e) = &self.error {
            report.errors.push(ReloadError::from_error(node.path(), e));
        }
    }

    fn release_hold(&mut self) {
        if std::mem::take(&mut self.held) {
            self.node.lock().release_write();
        }
    }

    /// Keep the first failure for this node; log every one.
    fn record(&mut self, err: Error) {
        let err = match err {
            Error::Configuration {
                message,
                position: None,
            } => Error::configuration_at(
                message,
                SourcePosition::element(self.source.as_deref(), self.node.path()),
            ),
            other => other,
        };
        tracing::error!(node = %self.node.path(), error = %err, "reload_failed");
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}

impl Drop for ReloadTransaction {
    fn drop(&mut self) {
        self.release_hold();
    }
}

impl ReloadError {
    fn from_error(node: &str, err: &Error) -> Self {
        Self {
            node: node.to_string(),
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::behavior::{NodeBehavior, NodeType};
    use crate::kernel::registry::NodeTypeRegistry;
    use crate::types::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    /// Fails validation when its declaration carries `fail="yes"`.
    struct Picky {
        ends: AtomicUsize,
    }

    impl NodeBehavior for Picky {
        fn validate(&self, _node: &Node, declaration: &Element) -> Result<()> {
            if declaration.attr("fail") == Some("yes") {
                return Err(Error::configuration("picky refused"));
            }
            Ok(())
        }

        fn end_reload(&self, _node: &Node) -> Result<()> {
            self.ends.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl NodeType for Picky {
        fn create(_declaration: &Element) -> Result<Self> {
            Ok(Self {
                ends: AtomicUsize::new(0),
            })
        }
    }

    /// Panics in its begin hook.
    struct Exploding;

    impl NodeBehavior for Exploding {
        fn begin_reload(&self, _node: &Arc<Node>, _scope: &mut ReloadScope<'_>) -> Result<()> {
            panic!("begin hook exploded");
        }
    }

    impl NodeType for Exploding {
        fn create(_declaration: &Element) -> Result<Self> {
            Ok(Self)
        }
    }

    fn registry() -> Arc<NodeTypeRegistry> {
        let mut registry = NodeTypeRegistry::with_builtins();
        registry.register::<Picky>("picky").unwrap();
        registry.register::<Exploding>("exploding").unwrap();
        Arc::new(registry)
    }

    fn load(declaration: Element) -> (Arc<Node>, ReloadReport) {
        let root = registry().instantiate(&declaration, None, None).unwrap();
        let report = ReloadTransaction::execute(&root, Arc::new(declaration), None);
        (root, report)
    }

    fn abc(names: &[&str]) -> Element {
        names.iter().fold(Element::named("node", "root"), |root, name| {
            root.with_child(Element::named("node", *name))
        })
    }

    #[test]
    fn test_first_load_creates_tree() {
        let (root, report) = load(abc(&["a", "b"]));
        assert!(report.is_clean());
        assert_eq!(root.state(), NodeState::Initialized);
        assert_eq!(report.created, vec!["/a/", "/b/"]);
        for child in root.children() {
            assert_eq!(child.state(), NodeState::Initialized);
        }
    }

    #[test]
    fn test_reconciliation_reuses_and_disposes() {
        let (root, _) = load(abc(&["A", "B", "C"]));
        let a = root.child("a").unwrap();
        let b = root.child("b").unwrap();
        let c = root.child("c").unwrap();

        let report = ReloadTransaction::execute(&root, Arc::new(abc(&["A", "C", "D"])), None);
        assert!(report.is_clean());

        let names: Vec<String> = root.children().iter().map(|n| n.name().to_string()).collect();
        assert_eq!(names, vec!["A", "C", "D"]);
        assert!(Arc::ptr_eq(&root.child("a").unwrap(), &a));
        assert!(Arc::ptr_eq(&root.child("c").unwrap(), &c));
        assert!(b.is_disposed());
        assert_eq!(report.disposed, vec!["/B/"]);
        assert_eq!(report.created, vec!["/D/"]);
        assert_eq!(root.child("d").unwrap().state(), NodeState::Initialized);
    }

    #[test]
    fn test_identical_reload_is_a_no_op() {
        let declaration = abc(&["a", "b"]).with_attr("displayname", "Root");
        let (root, _) = load(declaration.clone());
        let before = root.declaration();
        let a_before = root.child("a").unwrap().declaration();

        let report = ReloadTransaction::execute(&root, Arc::new(declaration), None);
        assert!(report.changed.is_empty());
        assert!(report.created.is_empty());
        assert!(report.disposed.is_empty());
        assert!(Arc::ptr_eq(&before, &root.declaration()));
        assert!(Arc::ptr_eq(&a_before, &root.child("a").unwrap().declaration()));
        assert_eq!(root.state(), NodeState::Initialized);
    }

    #[test]
    fn test_child_change_does_not_mark_parent_changed() {
        let (root, _) = load(abc(&["a"]));
        let next = Element::named("node", "root")
            .with_child(Element::named("node", "a").with_attr("displayname", "Alpha"));
        let report = ReloadTransaction::execute(&root, Arc::new(next), None);
        assert_eq!(report.changed, vec!["/a/"]);
        assert_eq!(root.child("a").unwrap().display_name(), "Alpha");
    }

    #[test]
    #[traced_test]
    fn test_failure_is_isolated_per_node() {
        let declaration = Element::named("node", "root")
            .with_child(Element::named("picky", "bad").with_attr("fail", "yes"))
            .with_child(Element::named("picky", "good"));
        let (root, report) = load(declaration);

        assert_eq!(root.state(), NodeState::Initialized);
        assert_eq!(root.child("bad").unwrap().state(), NodeState::Invalid);
        assert_eq!(root.child("good").unwrap().state(), NodeState::Initialized);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].node, "/bad/");
        assert_eq!(report.errors[0].code, "CONFIGURATION");
        assert!(logs_contain("reload_failed"));

        let good = root.child("good").unwrap();
        assert_eq!(good.behavior::<Picky>().unwrap().ends.load(Ordering::SeqCst), 1);
        let bad = root.child("bad").unwrap();
        assert_eq!(bad.behavior::<Picky>().unwrap().ends.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_invalid_node_recovers_on_fixed_reload() {
        let broken = Element::named("node", "root")
            .with_child(Element::named("picky", "p").with_attr("fail", "yes"));
        let (root, _) = load(broken);
        let p = root.child("p").unwrap();
        assert_eq!(p.state(), NodeState::Invalid);

        let fixed = Element::named("node", "root").with_child(Element::named("picky", "p"));
        let report = ReloadTransaction::execute(&root, Arc::new(fixed), None);
        assert!(report.is_clean());
        assert!(Arc::ptr_eq(&root.child("p").unwrap(), &p));
        assert_eq!(p.state(), NodeState::Initialized);
    }

    #[test]
    fn test_panicking_hook_is_contained() {
        let declaration = Element::named("node", "root")
            .with_child(Element::named("exploding", "boom").with_child(Element::named("node", "x")))
            .with_child(Element::named("node", "calm"));
        let (root, report) = load(declaration);

        let boom = root.child("boom").unwrap();
        assert_eq!(boom.state(), NodeState::Invalid);
        assert_eq!(boom.child_count(), 0);
        assert_eq!(root.child("calm").unwrap().state(), NodeState::Initialized);
        assert!(report.errors[0].message.contains("exploded"));
    }

    #[test]
    fn test_duplicate_fragment_names_invalidate_parent() {
        let declaration = Element::named("node", "root")
            .with_child(Element::named("node", "twin"))
            .with_child(Element::named("node", "TWIN"));
        let (root, report) = load(declaration);
        assert_eq!(root.state(), NodeState::Invalid);
        assert!(report.errors[0].message.contains("duplicate child name"));
    }

    #[test]
    fn test_type_change_replaces_child() {
        let (root, _) = load(abc(&["a"]));
        let old = root.child("a").unwrap();
        let next = Element::named("node", "root").with_child(Element::named("picky", "a"));
        let report = ReloadTransaction::execute(&root, Arc::new(next), None);
        assert!(report.is_clean());
        let new = root.child("a").unwrap();
        assert!(!Arc::ptr_eq(&old, &new));
        assert!(old.is_disposed());
        assert_eq!(new.tag(), "picky");
    }

    #[test]
    fn test_configuration_errors_carry_element_position() {
        let declaration = Element::named("node", "root")
            .with_child(Element::named("picky", "bad").with_attr("fail", "yes"));
        let root = registry().instantiate(&declaration, None, None).unwrap();
        let report =
            ReloadTransaction::execute(&root, Arc::new(declaration), Some(Arc::from("tree.json")));
        assert!(report.errors[0].message.contains("tree.json"));
        assert!(report.errors[0].message.contains("/bad/"));
    }

    #[test]
    fn test_new_child_unreachable_until_end() {
        use crate::dispatch::{CallerContext, Dispatcher, Request};
        use crate::types::DispatchConfig;
        use std::sync::mpsc;
        use std::time::Duration;

        let (root, _) = load(abc(&["a"]));
        let declaration = abc(&["a"])
            .with_child(Element::named("node", "vault").with_attr("security", "admin"));

        let mut tx = ReloadTransaction::prepare(&root, Arc::new(declaration), None);
        let mut report = ReloadReport::new();
        tx.begin(&mut report);
        assert!(root.child("vault").is_some());

        let (done_tx, done_rx) = mpsc::channel();
        let walker = {
            let root = root.clone();
            std::thread::spawn(move || {
                let dispatcher = Dispatcher::new(DispatchConfig::default());
                let request = Request::new("/vault/").with_action("describe");
                let result = dispatcher.dispatch(&root, &request, &CallerContext::anonymous());
                done_tx.send(result.map(|o| o.is_ok())).unwrap();
            })
        };

        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());
        tx.end(&mut report);
        drop(tx);

        let result = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(result, Err(Error::Unauthorized(_))));
        walker.join().unwrap();
        assert_eq!(root.child("vault").unwrap().security().as_deref(), Some("admin"));
    }

    #[test]
    fn test_begin_refreshes_stale_association() {
        let tree = Element::named("node", "root").with_child(
            Element::named("node", "jobs").with_child(Element::named("node", "nightly")),
        );
        let (root, _) = load(tree.clone());
        let jobs = root.child("jobs").unwrap();
        let old_nightly = jobs.child("nightly").unwrap();

        let mut tx = ReloadTransaction::prepare(&root, Arc::new(tree), None);
        {
            let jobs = jobs.clone();
            std::thread::spawn(move || {
                let report =
                    ReloadTransaction::execute(&jobs, Arc::new(Element::named("node", "jobs")), None);
                assert_eq!(report.disposed, vec!["/jobs/nightly/"]);
            })
            .join()
            .unwrap();
        }

        let mut report = ReloadReport::new();
        tx.begin(&mut report);
        tx.end(&mut report);
        drop(tx);

        assert!(report.is_clean(), "{:?}", report.errors);
        assert!(old_nightly.is_disposed());
        let nightly = jobs.child("nightly").unwrap();
        assert!(!Arc::ptr_eq(&nightly, &old_nightly));
        assert_eq!(nightly.state(), NodeState::Initialized);
        assert_eq!(report.created, vec!["/jobs/nightly/"]);
    }

    #[test]
    fn test_security_token_without_credentials_invalidates_node() {
        let (root, report) = load(
            abc(&["a"]).with_child(Element::named("node", "vault").with_attr("security", " , ")),
        );
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].node, "/vault/");
        assert_eq!(report.errors[0].code, "CONFIGURATION");
        assert_eq!(root.child("vault").unwrap().state(), NodeState::Invalid);
    }
}
