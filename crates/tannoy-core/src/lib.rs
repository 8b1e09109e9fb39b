//! tannoy-core: hierarchical handler directory for the tannoy messaging peer.
//!
//! The directory is a named, acyclic multi-parent graph of nodes. Each node
//! carries a set of request handlers; a request addressed by a path walks
//! the graph from a base node, firing catch-all handlers along the way and
//! every handler at the target node.
//!
//! Access control is expressed structurally: granting a peer access to a
//! resource means linking the resource under the peer's home subtree.
//! Links are backed by [`VirtualNode`] overlays, so handlers added through
//! a link never leak into the linked target and are torn down wholesale
//! when the link is removed.
//!
//! # Concurrency
//!
//! Every node guards its own state with a [`parking_lot::Mutex`]. Traversal
//! snapshots the handler list per level, so no node lock is held while a
//! user handler runs. Mutators (`add_handler`, `mount`, ...) are serialized
//! per node.

pub mod directory;
pub mod error;
pub mod event;
pub mod handler;
pub mod node;
pub mod path;
pub mod request;
pub mod virtual_node;

pub use directory::Directory;
pub use error::NodeError;
pub use handler::{FnHandler, Handler};
pub use node::{DirectoryNode, Node, NodeId, NodeRef};
pub use path::PathWalker;
pub use request::{Request, RequestError, RequestKind, RequestResult};
pub use virtual_node::VirtualNode;
