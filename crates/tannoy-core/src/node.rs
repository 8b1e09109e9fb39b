//! Directory nodes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::NodeError;
use crate::handler::Handler;
use crate::path::PathWalker;
use crate::request::Request;
use crate::virtual_node::VirtualNode;

/// Shared handle to a node in the directory graph.
pub type NodeRef = Arc<dyn Node>;

/// Process-unique node identity.
///
/// Virtual nodes share the identity of the node they overlay, so identity
/// comparisons (reachability, cycle checks) see through overlays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A node in the directory graph.
///
/// Nodes are arranged in an acyclic directed graph; a node can have many
/// children and many parents. Each node carries request handlers that run
/// when a request targets the node or, for catch-all handlers, passes
/// through it.
pub trait Node: Send + Sync {
    /// Identity of this node. Overlays report the underlying node.
    fn id(&self) -> NodeId;

    /// The name used to refer to this node in paths.
    fn name(&self) -> &str;

    /// Adds a handler. Fails with [`NodeError::DuplicateName`] if a handler
    /// with the same name exists. A catch-all handler is also recorded in
    /// the catch-all list; the flag cannot change after the add.
    fn add_handler(&self, handler: Arc<dyn Handler>) -> Result<(), NodeError>;

    /// Removes the named handler from both the handler set and the
    /// catch-all list. Returns false if no such handler was added.
    fn remove_handler(&self, name: &str) -> bool;

    /// True if a handler with this name was added.
    fn has_handler(&self, name: &str) -> bool;

    /// The direct child with the given name, if mounted.
    fn child(&self, name: &str) -> Option<NodeRef>;

    /// All direct children.
    fn children(&self) -> Vec<NodeRef>;

    /// True if a direct child with this name is mounted.
    fn has_child(&self, name: &str) -> bool;

    /// Number of mounted children.
    fn num_children(&self) -> usize;

    /// Mounts `child` under this node. Fails with `DuplicateName` if a
    /// child with the same name is mounted, or `Cyclic` if this node is
    /// already reachable from `child`. Mounting is not exclusive: the same
    /// node may be mounted under several parents.
    fn mount(&self, child: NodeRef) -> Result<(), NodeError>;

    /// Unmounts the child with `child`'s name. Silent no-op (false) when
    /// absent. Only this parent edge is removed.
    fn unmount(&self, child: &NodeRef) -> bool;

    /// True if the node identified by `target` can be reached from this
    /// node by descending child edges.
    fn is_reachable(&self, target: NodeId) -> bool;

    /// Handles a request whose path is interpreted relative to this node.
    ///
    /// Traversal fires catch-all handlers at every level along the walked
    /// chain (top-down, with the path remainder), then every handler at
    /// the target node. If the target does not exist, traversal stops at
    /// the last existing node; catch-alls along the covered prefix still
    /// fire. Returns the total number of handler invocations.
    fn handle(&self, request: &mut Request) -> usize;

    /// Traversal step driven by an explicit walker. Used internally by
    /// [`handle`](Node::handle); exposed so overlays can delegate.
    fn handle_walk(&self, request: &mut Request, walker: &mut PathWalker) -> usize;

    /// Downcast hook for overlay nodes.
    fn as_virtual(&self) -> Option<&VirtualNode> {
        None
    }
}

#[derive(Default)]
struct NodeState {
    /// Children indexed by name.
    children: HashMap<String, NodeRef>,
    /// Handlers in insertion order, unique by name.
    handlers: Vec<Arc<dyn Handler>>,
    /// The catch-all subset of `handlers`, in insertion order.
    catch_all: Vec<Arc<dyn Handler>>,
}

/// A concrete directory node.
///
/// Thread-safe: all mutations are serialized on the node's own lock, and
/// traversal snapshots handler lists per level so no lock is held while a
/// handler runs.
pub struct DirectoryNode {
    id: NodeId,
    name: String,
    state: Mutex<NodeState>,
}

impl DirectoryNode {
    /// Creates a node with the given path name.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: NodeId::next(),
            name: name.into(),
            state: Mutex::new(NodeState::default()),
        })
    }
}

impl Node for DirectoryNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn add_handler(&self, handler: Arc<dyn Handler>) -> Result<(), NodeError> {
        let mut state = self.state.lock();
        if state.handlers.iter().any(|h| h.name() == handler.name()) {
            return Err(NodeError::DuplicateName);
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
        true
    }

    fn has_handler(&self, name: &str) -> bool {
        self.state.lock().handlers.iter().any(|h| h.name() == name)
    }

    fn child(&self, name: &str) -> Option<NodeRef> {
        self.state.lock().children.get(name).cloned()
    }

    fn children(&self) -> Vec<NodeRef> {
        self.state.lock().children.values().cloned().collect()
    }

    fn has_child(&self, name: &str) -> bool {
        self.state.lock().children.contains_key(name)
    }

    fn num_children(&self) -> usize {
        self.state.lock().children.len()
    }

    fn mount(&self, child: NodeRef) -> Result<(), NodeError> {
        // The reachability walk takes per-node snapshots, so it must run
        // before this node's lock is taken.
        if child.is_reachable(self.id) {
            return Err(NodeError::Cyclic);
        }
        let mut state = self.state.lock();
        if state.children.contains_key(child.name()) {
            return Err(NodeError::DuplicateName);
        }
        state.children.insert(child.name().to_owned(), child);
        Ok(())
    }

    fn unmount(&self, child: &NodeRef) -> bool {
        self.state.lock().children.remove(child.name()).is_some()
    }

    fn is_reachable(&self, target: NodeId) -> bool {
        if self.id == target {
            return true;
        }
        let children = self.children();
        children.iter().any(|child| child.is_reachable(target))
    }

    fn handle(&self, request: &mut Request) -> usize {
        let mut walker = PathWalker::new(request.path());
        self.handle_walk(request, &mut walker)
    }

    fn handle_walk(&self, request: &mut Request, walker: &mut PathWalker) -> usize {
        let mut executed = 0;
        if walker.at_leaf() {
            let handlers = self.state.lock().handlers.clone();
            for handler in handlers {
                handler.handle(request);
                executed += 1;
            }
        } else {
            let catch_all = self.state.lock().catch_all.clone();
            if !catch_all.is_empty() {
                let remainder = walker.remainder();
                for handler in catch_all {
                    handler.handle_catch_all(&remainder, request);
                    executed += 1;
                }
            }
            walker.move_down();
            let child = self.state.lock().children.get(walker.current_node_name()).cloned();
            if let Some(child) = child {
                executed += child.handle_walk(request, walker);
            } else {
                tracing::trace!(path = request.path(), "target node not found");
            }
        }
        executed
    }
}
