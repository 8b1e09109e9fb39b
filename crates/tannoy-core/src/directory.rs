//! The directory facade.

use std::sync::Arc;

use crate::handler::Handler;
use crate::node::{DirectoryNode, Node, NodeRef};
use crate::path::PathWalker;
use crate::request::Request;
use crate::virtual_node::VirtualNode;

/// A directory of nodes addressed by absolute paths.
///
/// The directory roots an acyclic graph of [`DirectoryNode`]s. A node is
/// addressed by the path of names from the root; because nodes may have
/// several parents, the same node can be reachable under more than one
/// path.
///
/// Linking grafts one subtree under another path through a virtual
/// overlay: the linked target and its descendants become reachable under
/// the new path, while handlers added there stay on the overlay and are
/// removed wholesale by [`unlink`](Directory::unlink). This is the
/// mechanism for granting and revoking access to resources.
///
/// A directory is plain shared state; embed it in whatever context owns
/// the peer (see `Context` in the protocol crate). All operations are
/// thread-safe.
pub struct Directory {
    root: Arc<DirectoryNode>,
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}

impl Directory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self {
            root: DirectoryNode::new(""),
        }
    }

    /// Creates every missing node along `path`. The path must be absolute;
    /// a trailing wildcard is ignored. No-op (true) if the path exists.
    pub fn create_path(&self, path: &str) -> bool {
        let mut walker = PathWalker::new(path);
        if walker.num_nodes() < 2 || !walker.current_node_name().is_empty() {
            return false;
        }
        let mut node: NodeRef = self.root.clone();
        while walker.move_down() {
            let name = walker.current_node_name();
            match node.child(name) {
                Some(child) => node = child,
                None => {
                    let child = DirectoryNode::new(name);
                    if let Err(error) = node.mount(child.clone()) {
                        // Lost a race against a concurrent create of the
                        // same segment; re-read before giving up.
                        match node.child(name) {
                            Some(existing) => {
                                node = existing;
                                continue;
                            }
                            None => {
                                tracing::debug!(path, %error, "create_path failed");
                                return false;
                            }
                        }
                    }
                    node = child;
                }
            }
        }
        true
    }

    /// Looks up the node at an absolute `path`. A trailing wildcard
    /// addresses the node just before it.
    pub fn node(&self, path: &str) -> Option<NodeRef> {
        let mut walker = PathWalker::new(path);
        if !walker.current_node_name().is_empty() {
            return None;
        }
        let mut node: NodeRef = self.root.clone();
        while walker.move_down() {
            match node.child(walker.current_node_name()) {
                Some(child) => node = child,
                None => {
                    tracing::trace!(path, "node not found");
                    return None;
                }
            }
        }
        Some(node)
    }

    /// True if a node exists at `path`.
    pub fn path_exists(&self, path: &str) -> bool {
        self.node(path).is_some()
    }

    /// Removes the leaf of `path` by unmounting it from its parent along
    /// this path only. Other parents and the node's own subtree are
    /// untouched. The root cannot be removed.
    pub fn remove_path(&self, path: &str) -> bool {
        let mut walker = PathWalker::new(path);
        if walker.num_nodes() < 2 || !walker.current_node_name().is_empty() {
            return false;
        }
        let mut parent: NodeRef = self.root.clone();
        let mut node: NodeRef = self.root.clone();
        while walker.move_down() {
            match node.child(walker.current_node_name()) {
                Some(child) => {
                    parent = node;
                    node = child;
                }
                None => return false,
            }
        }
        parent.unmount(&node)
    }

    /// Adds `handler` to the node at `path`. False when the path is
    /// missing or the handler name is taken.
    pub fn add_handler(&self, path: &str, handler: Arc<dyn Handler>) -> bool {
        tracing::trace!(path, handler = handler.name(), "add handler");
        let Some(node) = self.node(path) else {
            return false;
        };
        match node.add_handler(handler) {
            Ok(()) => true,
            Err(error) => {
                tracing::trace!(path, %error, "add handler failed");
                false
            }
        }
    }

    /// Removes the named handler from the node at `path`. No-op when
    /// either is missing.
    pub fn remove_handler(&self, path: &str, handler_name: &str) -> bool {
        tracing::trace!(path, handler = handler_name, "remove handler");
        match self.node(path) {
            Some(node) => node.remove_handler(handler_name),
            None => false,
        }
    }

    /// True if the node at `path` exists and has the named handler.
    pub fn has_handler(&self, path: &str, handler_name: &str) -> bool {
        match self.node(path) {
            Some(node) => node.has_handler(handler_name),
            None => false,
        }
    }

    /// Dispatches `request` from the node at `base_path`; the request path
    /// is interpreted relative to that node. Returns the number of handler
    /// invocations; 0 when the base is missing.
    pub fn handle(&self, base_path: &str, request: &mut Request) -> usize {
        tracing::trace!(base = base_path, path = request.path(), "handle");
        match self.node(base_path) {
            Some(base) => base.handle(request),
            None => 0,
        }
    }

    /// Links the node at `to` under the node at `from`.
    ///
    /// The target and its subtree become reachable through `from`, via a
    /// virtual overlay named `"virtual:" + from`. Fails when either path
    /// is missing, when the target already carries that overlay (the link
    /// exists), or when mounting fails (name collision under `from`, or a
    /// cycle).
    pub fn link(&self, from: &str, to: &str) -> bool {
        tracing::trace!(from, to, "link");
        let Some(from_node) = self.node(from) else {
            return false;
        };
        let Some(to_node) = self.node(to) else {
            return false;
        };
        let overlay_name = format!("virtual:{from}");
        if to_node.has_handler(&overlay_name) {
            return false;
        }
        let virtual_node = VirtualNode::new(to_node, overlay_name);
        match from_node.mount(virtual_node) {
            Ok(()) => true,
            Err(error) => {
                tracing::trace!(from, to, %error, "link failed");
                false
            }
        }
    }

    /// Removes the link from `from` to `to`: deactivates the virtual
    /// overlay (tearing down every handler added through the link) and
    /// unmounts it. The reverse of [`link`](Directory::link).
    pub fn unlink(&self, from: &str, to: &str) -> bool {
        tracing::trace!(from, to, "unlink");
        let Some(from_node) = self.node(from) else {
            return false;
        };
        let Some(to_node) = self.node(to) else {
            return false;
        };
        let Some(child) = from_node.child(to_node.name()) else {
            return false;
        };
        if let Some(virtual_node) = child.as_virtual() {
            virtual_node.deactivate();
        }
        from_node.unmount(&child)
    }
}
