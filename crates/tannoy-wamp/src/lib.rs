//! tannoy-wamp: symmetric WAMP v1 protocol engine.
//!
//! A [`WampConnection`] speaks WAMP v1 over any transport that can ship
//! text frames (the [`FrameSender`] seam) and feed inbound frames to
//! [`Connection::process`]. Connections are symmetric: the same instance
//! serves as broker, dealer, publisher, subscriber, caller and callee,
//! in either client or server mode.
//!
//! Inbound traffic is routed into the [`Directory`] under the peer's home
//! path; subscriptions install [`RelayHandler`]s that republish matching
//! traffic back out to the subscribed peer. Access control is structural:
//! a peer can only reach directory nodes under (or linked under) its home
//! path.
//!
//! Shared state (the directory and the connection and service
//! registries) travels in an explicit [`Context`] handed to each
//! connection; there are no process-wide singletons.
//!
//! [`Directory`]: tannoy_core::Directory

pub mod connection;
pub mod context;
pub mod message;
pub mod method;
pub mod registry;
pub mod relay;
pub mod rpc;
pub mod sender;
pub mod service;
pub mod uri;
pub mod wamp;

pub use connection::{Connection, ConnectionCore, PublishOptions};
pub use context::Context;
pub use message::MessageType;
pub use method::{ArgsError, FromArgs, MethodHandler, RpcError};
pub use registry::ConnectionRegistry;
pub use relay::RelayHandler;
pub use rpc::{
    CallFailure, CallState, RemoteCallError, RemoteMethod, RemoteMethodCall, RpcCallback,
    DEFAULT_CALL_TIMEOUT,
};
pub use sender::FrameSender;
pub use service::{ServiceDefinition, ServiceRegistry};
pub use uri::{Uri, UriError};
pub use wamp::WampConnection;
