//! Virtual overlay nodes.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::NodeError;
use crate::handler::Handler;
use crate::node::{Node, NodeId, NodeRef};
use crate::path::PathWalker;
use crate::request::Request;

/// Relays traversal of the underlying node into the virtual node's own
/// handler set. Exactly one overlay handler is installed on the underlying
/// node while the virtual node is active and carries handlers.
struct OverlayHandler {
    name: String,
    owner: Weak<VirtualNode>,
}

impl Handler for OverlayHandler {
    fn name(&self) -> &str {
        &self.name
    }

    // Overlay handlers must see traversal through the underlying node as
    // well as requests targeting it, so they are always catch-all.
    fn is_catch_all(&self) -> bool {
        true
    }

    fn handle(&self, request: &mut Request) {
        let Some(owner) = self.owner.upgrade() else {
            return;
        };
        let handlers = owner.state.lock().handlers.clone();
        for handler in handlers {
            handler.handle(request);
        }
    }

    fn handle_catch_all(&self, path_remainder: &str, request: &mut Request) {
        let Some(owner) = self.owner.upgrade() else {
            return;
        };
        let catch_all = owner.state.lock().catch_all.clone();
        for handler in catch_all {
            handler.handle_catch_all(path_remainder, request);
        }
    }
}

struct VirtualState {
    /// False once the overlay has been torn down. Never becomes true again.
    active: bool,
    /// Own handlers in insertion order, unique by name.
    handlers: Vec<Arc<dyn Handler>>,
    /// The catch-all subset of `handlers`.
    catch_all: Vec<Arc<dyn Handler>>,
    /// Lazily created virtual wrappers around the underlying children.
    children: HashMap<String, Arc<VirtualNode>>,
}

/// A transparent overlay over another node.
///
/// A virtual node mirrors the identity and structure of its underlying
/// node but owns a separate handler set. While that set is non-empty (and
/// the node has not been deactivated), a single catch-all overlay handler
/// is installed on the underlying node; traversal of the real subtree is
/// thereby relayed into the virtual handlers without the virtual handlers
/// ever existing on the real node.
///
/// Virtual nodes are the link mechanism of the [`Directory`]: linking
/// mounts a virtual wrapper of the target, so every handler added through
/// the link lives on the overlay and disappears with it.
///
/// Children are virtual too: [`child`](Node::child) lazily wraps the
/// corresponding underlying child in a virtual node of its own, extending
/// the overlay one level down. Virtual children never appear on the
/// underlying node.
///
/// [`Directory`]: crate::Directory
pub struct VirtualNode {
    node: NodeRef,
    overlay: Arc<OverlayHandler>,
    state: Mutex<VirtualState>,
}

impl VirtualNode {
    /// Creates an overlay over `node`. `handler_name` names the overlay
    /// handler that will be installed on `node`; it must be unique among
    /// that node's handlers.
    pub fn new(node: NodeRef, handler_name: impl Into<String>) -> Arc<Self> {
        Self::with_active(node, handler_name, true)
    }

    fn with_active(node: NodeRef, handler_name: impl Into<String>, active: bool) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            node,
            overlay: Arc::new(OverlayHandler {
                name: handler_name.into(),
                owner: weak.clone(),
            }),
            state: Mutex::new(VirtualState {
                active,
                handlers: Vec::new(),
                catch_all: Vec::new(),
                children: HashMap::new(),
            }),
        })
    }

    /// The name of the overlay handler installed on the underlying node.
    pub fn overlay_name(&self) -> &str {
        &self.overlay.name
    }

    /// Tears down the overlay: removes the overlay handler from the
    /// underlying node and recursively deactivates all virtual children.
    ///
    /// Deactivation is irreversible. Afterwards, adding handlers to this
    /// node (or any of its virtual children) never reinstalls the overlay,
    /// so a stale wrapper that outlives its link can no longer re-grant
    /// access to the underlying subtree.
    ///
    /// Returns true if the overlay handler was removed from the underlying
    /// node.
    pub fn deactivate(&self) -> bool {
        let children: Vec<Arc<VirtualNode>> = {
            let mut state = self.state.lock();
            state.active = false;
            state.children.values().cloned().collect()
        };
        for child in children {
            child.deactivate();
        }
        self.node.remove_handler(&self.overlay.name)
    }
}

impl Node for VirtualNode {
    fn id(&self) -> NodeId {
        self.node.id()
    }

    fn name(&self) -> &str {
        self.node.name()
    }

    fn add_handler(&self, handler: Arc<dyn Handler>) -> Result<(), NodeError> {
        let mut state = self.state.lock();
        if state.handlers.iter().any(|h| h.name() == handler.name()) {
            return Err(NodeError::DuplicateName);
        }
        // Install the overlay on the 0 -> 1 transition, atomically with it.
        if state.active && state.handlers.is_empty() {
            self.node.add_handler(self.overlay.clone())?;
        }
        if handler.is_catch_all() {
            state.catch_all.push(handler.clone());
        }
        state.handlers.push(handler);
        Ok(())
    }

    fn remove_handler(&self, name: &str) -> bool {
        let mut state = self.state.lock();
        let Some(index) = state.handlers.iter().position(|h| h.name() == name) else {
            return false;
        };
        state.handlers.remove(index);
        state.catch_all.retain(|h| h.name() != name);
        if state.handlers.is_empty() {
            self.node.remove_handler(&self.overlay.name);
        }
        true
    }

    /// Addresses the virtual node's own handler set, not the underlying
    /// node's.
    fn has_handler(&self, name: &str) -> bool {
        self.state.lock().handlers.iter().any(|h| h.name() == name)
    }

    fn child(&self, name: &str) -> Option<NodeRef> {
        if let Some(child) = self.state.lock().children.get(name) {
            return Some(child.clone());
        }
        let underlying = self.node.child(name)?;
        let mut state = self.state.lock();
        // A racing lookup may have created the wrapper in the meantime.
        if let Some(child) = state.children.get(name) {
            return Some(child.clone());
        }
        let overlay_name = format!("{}:{}", self.overlay.name, underlying.name());
        let child = VirtualNode::with_active(underlying, overlay_name, state.active);
        state.children.insert(name.to_owned(), child.clone());
        Some(child)
    }

    fn children(&self) -> Vec<NodeRef> {
        self.node.children()
    }

    fn has_child(&self, name: &str) -> bool {
        self.node.has_child(name)
    }

    fn num_children(&self) -> usize {
        self.node.num_children()
    }

    /// Mounting through a virtual node mounts onto the underlying node; a
    /// virtual node has no independent children.
    fn mount(&self, child: NodeRef) -> Result<(), NodeError> {
        self.node.mount(child)
    }

    fn unmount(&self, child: &NodeRef) -> bool {
        self.node.unmount(child)
    }

    fn is_reachable(&self, target: NodeId) -> bool {
        self.node.is_reachable(target)
    }

    fn handle(&self, request: &mut Request) -> usize {
        self.node.handle(request)
    }

    fn handle_walk(&self, request: &mut Request, walker: &mut PathWalker) -> usize {
        self.node.handle_walk(request, walker)
    }

    fn as_virtual(&self) -> Option<&VirtualNode> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::FnHandler;
    use crate::node::DirectoryNode;
    use crate::request::RequestKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter_handler(name: &str, catch_all: bool) -> (Arc<FnHandler>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let captured = count.clone();
        let handler = Arc::new(FnHandler::with_catch_all(name, catch_all, move |_| {
            captured.fetch_add(1, Ordering::SeqCst);
        }));
        (handler, count)
    }

    #[test]
    fn handlers_never_reach_the_underlying_node() {
        let real = DirectoryNode::new("real");
        let virtual_node = VirtualNode::new(real.clone(), "overlay");
        let (handler, _) = counter_handler("mine", false);
        virtual_node.add_handler(handler).unwrap();

        assert!(virtual_node.has_handler("mine"));
        assert!(!real.has_handler("mine"));
        // Only the overlay itself lands on the real node.
        assert!(real.has_handler("overlay"));
    }

    #[test]
    fn overlay_tracks_handler_count_transitions() {
        let real = DirectoryNode::new("real");
        let virtual_node = VirtualNode::new(real.clone(), "overlay");
        assert!(!real.has_handler("overlay"));

        let (first, _) = counter_handler("one", false);
        let (second, _) = counter_handler("two", false);
        virtual_node.add_handler(first).unwrap();
        assert!(real.has_handler("overlay"));
        virtual_node.add_handler(second).unwrap();

        assert!(virtual_node.remove_handler("one"));
        assert!(real.has_handler("overlay"));
        assert!(virtual_node.remove_handler("two"));
        assert!(!real.has_handler("overlay"));
    }

    #[test]
    fn traversal_of_real_node_reaches_virtual_handlers() {
        let root = DirectoryNode::new("");
        let real = DirectoryNode::new("real");
        root.mount(real.clone()).unwrap();

        let virtual_node = VirtualNode::new(real, "overlay");
        let (handler, count) = counter_handler("observer", false);
        virtual_node.add_handler(handler).unwrap();

        let mut request = Request::new("/real", RequestKind::Publish);
        // One invocation for the overlay handler itself; it fans out to the
        // virtual handlers internally.
        assert_eq!(root.handle(&mut request), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn catch_all_dispatch_skips_regular_virtual_handlers() {
        let root = DirectoryNode::new("");
        let real = DirectoryNode::new("real");
        let below = DirectoryNode::new("below");
        real.mount(below).unwrap();
        root.mount(real.clone()).unwrap();

        let virtual_node = VirtualNode::new(real, "overlay");
        let (regular, regular_count) = counter_handler("regular", false);
        let (catch_all, catch_all_count) = counter_handler("all", true);
        virtual_node.add_handler(regular).unwrap();
        virtual_node.add_handler(catch_all).unwrap();

        let mut request = Request::new("/real/below", RequestKind::Publish);
        root.handle(&mut request);
        assert_eq!(regular_count.load(Ordering::SeqCst), 0);
        assert_eq!(catch_all_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn virtual_children_mirror_real_children() {
        let real = DirectoryNode::new("real");
        let real_child = DirectoryNode::new("sub");
        real.mount(real_child.clone()).unwrap();

        let virtual_node = VirtualNode::new(real, "overlay");
        let child = virtual_node.child("sub").expect("child should be wrapped");
        let virtual_child = child.as_virtual().expect("child should be virtual");
        assert_eq!(virtual_child.overlay_name(), "overlay:sub");
        // Lookups are cached.
        let again = virtual_node.child("sub").unwrap();
        assert!(Arc::ptr_eq(&child, &again));

        let (handler, _) = counter_handler("h", false);
        child.add_handler(handler).unwrap();
        assert!(real_child.has_handler("overlay:sub"));
        assert!(!real_child.has_handler("h"));

        assert!(virtual_node.child("missing").is_none());
    }

    #[test]
    fn deactivate_removes_overlays_recursively_and_forever() {
        let real = DirectoryNode::new("real");
        let real_child = DirectoryNode::new("sub");
        real.mount(real_child.clone()).unwrap();

        let virtual_node = VirtualNode::new(real.clone(), "overlay");
        let (h1, _) = counter_handler("h1", false);
        let (h2, _) = counter_handler("h2", false);
        virtual_node.add_handler(h1).unwrap();
        let child = virtual_node.child("sub").unwrap();
        child.add_handler(h2).unwrap();
        assert!(real.has_handler("overlay"));
        assert!(real_child.has_handler("overlay:sub"));

        assert!(virtual_node.deactivate());
        assert!(!real.has_handler("overlay"));
        assert!(!real_child.has_handler("overlay:sub"));

        // A deactivated overlay must not come back, even via new handlers
        // or newly materialised children. Empty the set first so the add
        // below crosses the 0 -> 1 installation boundary.
        assert!(virtual_node.remove_handler("h1"));
        let (h3, _) = counter_handler("h3", false);
        virtual_node.add_handler(h3).unwrap();
        assert!(!real.has_handler("overlay"));

        let late_child = virtual_node.child("sub").unwrap();
        let (h4, _) = counter_handler("h4", false);
        late_child.add_handler(h4).unwrap();
        assert!(!real_child.has_handler("overlay:sub"));
    }

    #[test]
    fn structural_queries_delegate() {
        let real = DirectoryNode::new("real");
        let real_child = DirectoryNode::new("sub");
        real.mount(real_child).unwrap();
        let virtual_node = VirtualNode::new(real.clone(), "overlay");

        assert_eq!(virtual_node.name(), "real");
        assert_eq!(virtual_node.id(), real.id());
        assert_eq!(virtual_node.num_children(), 1);
        assert!(virtual_node.has_child("sub"));
        assert!(virtual_node.is_reachable(real.id()));
    }
}
