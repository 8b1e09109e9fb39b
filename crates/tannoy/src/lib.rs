//! tannoy: a symmetric WAMP v1 peer over a hierarchical handler directory.
//!
//! A tannoy peer is broker, dealer, publisher, subscriber, caller and
//! callee at once. Requests (publishes, events and RPC calls) are routed
//! into a directory of handler-carrying nodes under the peer's home path;
//! subscriptions install relay handlers that republish matching traffic to
//! the subscribed peer.
//!
//! The directory doubles as the access-control surface: granting a user
//! access to a resource links the resource under the user's home subtree,
//! revoking it unlinks it. Links are virtual overlays, so nothing a peer
//! installs through a link survives its removal.
//!
//! # Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tannoy::prelude::*;
//!
//! let context = Context::new();
//! let directory = context.directory();
//!
//! // Register an RPC method under the peer's home.
//! directory.create_path("/home/user/rpc/add");
//! directory.add_handler(
//!     "/home/user/rpc/add",
//!     Arc::new(MethodHandler::typed("add", false, |(a, b): (i64, i64)| {
//!         Ok::<_, RpcError>(a + b)
//!     })),
//! );
//!
//! // Accept a connection: `sender` ships frames to the peer's socket,
//! // inbound frames are fed to `connection.process(text)`.
//! let connection = WampConnection::new(
//!     Uri::parse("wamp://server/endpoint")?,
//!     Some("user".into()),
//!     "/home/user",
//!     sender,
//!     context.clone(),
//! );
//! connection.welcome();
//! ```
//!
//! The transport is out of scope: anything that can ship text frames
//! (typically a WebSocket) implements [`FrameSender`] and drives
//! [`Connection::process`].

pub use tannoy_core::{
    Directory, DirectoryNode, FnHandler, Handler, Node, NodeError, NodeId, NodeRef, PathWalker,
    Request, RequestError, RequestKind, RequestResult, VirtualNode,
};

pub use tannoy_wamp::{
    CallFailure, CallState, Connection, ConnectionCore, ConnectionRegistry, Context, FrameSender,
    MessageType, MethodHandler, PublishOptions, RelayHandler, RemoteCallError, RemoteMethod,
    RemoteMethodCall, RpcCallback, RpcError, ServiceDefinition, ServiceRegistry, Uri, UriError,
    WampConnection,
};

/// Event observation utilities for service tasks.
pub mod event {
    pub use tannoy_core::event::{Event, Observer, ObserverHandle, Processor, Watcher};
}

/// Convenient imports for peers and services.
pub mod prelude {
    pub use tannoy_core::{Directory, Handler, Request, RequestKind};
    pub use tannoy_wamp::{
        Connection, Context, FrameSender, MethodHandler, RemoteMethod, RpcError, Uri,
        WampConnection,
    };
}
