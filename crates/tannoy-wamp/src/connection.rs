//! Connection base state and protocol trait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::context::Context;
use crate::rpc::RpcCallback;
use crate::uri::Uri;

/// Optional routing controls for a publish.
///
/// `exclude_me` keeps the publish away from the publisher's own
/// subscription. `exclude` and `eligible` carry explicit session-id lists;
/// a subscriber receives the publish iff it is not excluded and, when an
/// eligible list is present, appears in it.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub exclude_me: bool,
    pub exclude: Option<Vec<String>>,
    pub eligible: Option<Vec<String>>,
}

/// State shared by every connection protocol.
///
/// A connection is symmetric: the same state serves the client and the
/// server side of a protocol. The home path scopes every request made
/// through the connection: a request for `/x/y` is dispatched at
/// `home_path + "/x/y"`, so a peer can only reach directory nodes under
/// (or linked under) its home subtree.
pub struct ConnectionCore {
    uri: Uri,
    user_account: Mutex<Option<String>>,
    home_path: Mutex<String>,
    session_id: Mutex<String>,
    server_id: Mutex<Option<String>>,
    ready: AtomicBool,
    context: Context,
}

impl ConnectionCore {
    /// Creates connection state bound to `context`.
    ///
    /// `uri` names the server endpoint this connection talks to (client
    /// side) or was accepted at (server side). `home_path` is normalised
    /// to an absolute path without a trailing slash. The session id starts
    /// as `"0"` until the welcome handshake replaces it.
    pub fn new(
        uri: Uri,
        user_account: Option<String>,
        home_path: &str,
        context: Context,
    ) -> Self {
        let mut home_path = if home_path.starts_with('/') {
            home_path.to_owned()
        } else {
            format!("/{home_path}")
        };
        if home_path.ends_with('/') {
            home_path.pop();
        }
        Self {
            uri,
            user_account: Mutex::new(user_account),
            home_path: Mutex::new(home_path),
            session_id: Mutex::new("0".to_owned()),
            server_id: Mutex::new(None),
            ready: AtomicBool::new(false),
            context,
        }
    }

    /// The URI of the server endpoint associated with this connection.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// The hostname of the server endpoint.
    pub fn hostname(&self) -> &str {
        self.uri.host()
    }

    /// The user account bound to this connection, if any.
    pub fn user_account(&self) -> Option<String> {
        self.user_account.lock().clone()
    }

    /// Rebinds the user account.
    pub fn set_user_account(&self, user_account: Option<String>) {
        *self.user_account.lock() = user_account;
    }

    /// The home directory path requests are resolved under.
    pub fn home_path(&self) -> String {
        self.home_path.lock().clone()
    }

    /// Rebinds the home directory path. Protocol implementations may move
    /// a connection once the peer's account is known.
    pub fn set_home_path(&self, home_path: impl Into<String>) {
        *self.home_path.lock() = home_path.into();
    }

    /// The current session id. `"0"` before the handshake completes.
    pub fn session_id(&self) -> String {
        self.session_id.lock().clone()
    }

    pub(crate) fn set_session_id(&self, session_id: impl Into<String>) {
        *self.session_id.lock() = session_id.into();
    }

    /// The server identification received in the welcome handshake, on the
    /// client side of an established connection.
    pub fn server_id(&self) -> Option<String> {
        self.server_id.lock().clone()
    }

    pub(crate) fn set_server_id(&self, server_id: impl Into<String>) {
        *self.server_id.lock() = Some(server_id.into());
    }

    /// True while the connection can send and receive messages.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// The context this connection routes through.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Flips the ready flag. On the not-ready -> ready transition the
    /// connection is registered with the connection registry, which fans
    /// the event out to services; the reverse transition deregisters it.
    /// `connection` must be the connection owning this core.
    pub fn set_ready(&self, connection: &Arc<dyn Connection>, ready: bool) {
        if self.ready.swap(ready, Ordering::SeqCst) == ready {
            return;
        }
        if ready {
            self.context.connections().add(connection.clone());
        } else {
            self.context.connections().remove(connection);
        }
    }
}

/// A symmetric peer connection.
///
/// Both endpoints of a connection are treated alike: either side can
/// publish, subscribe, and make RPC calls. Publishes are fire-and-forget;
/// calls always produce exactly one callback, success or error.
///
/// Implementors speak a concrete wire protocol and feed inbound frames to
/// [`process`](Connection::process).
pub trait Connection: Send + Sync {
    /// The connection's shared state.
    fn core(&self) -> &ConnectionCore;

    /// Makes an RPC call to the method at `method_path` on the remote
    /// endpoint. The callback fires exactly once when the call completes.
    /// Returns true if the request frame was sent.
    fn call(
        &self,
        method_path: &str,
        callback: Box<dyn RpcCallback>,
        arguments: Vec<Value>,
    ) -> bool;

    /// Like [`call`](Connection::call) with a fully specified method URI.
    fn call_uri(
        &self,
        method_uri: &Uri,
        callback: Box<dyn RpcCallback>,
        arguments: Vec<Value>,
    ) -> bool;

    /// Publishes `data` on `topic_path`.
    fn publish(&self, topic_path: &str, data: Value) -> bool {
        self.publish_with(topic_path, data, PublishOptions::default())
    }

    /// Publishes `data` on `topic_path` with explicit routing controls.
    fn publish_with(&self, topic_path: &str, data: Value, options: PublishOptions) -> bool;

    /// Publishes `data` on a fully specified topic URI. Routing controls
    /// beyond the URI's own query parameters are not available here.
    fn publish_uri(&self, topic_uri: &Uri, data: Value) -> bool;

    /// Subscribes to `topic_path`. A trailing `/*` subscribes the whole
    /// subtree.
    fn subscribe(&self, topic_path: &str) -> bool;

    /// Subscribes to a fully specified topic URI.
    fn subscribe_uri(&self, topic_uri: &Uri) -> bool;

    /// Unsubscribes from `topic_path`; counterpart of
    /// [`subscribe`](Connection::subscribe).
    fn unsubscribe(&self, topic_path: &str) -> bool;

    /// Unsubscribes from a fully specified topic URI.
    fn unsubscribe_uri(&self, topic_uri: &Uri) -> bool;

    /// Processes one inbound frame. Returns true if the frame conformed to
    /// the protocol and was interpreted, including frames whose
    /// processing produced a logic error that was reported to the peer.
    fn process(&self, input: &str) -> bool;

    /// Closes the connection: deregisters it and releases every handler it
    /// installed.
    fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core(home_path: &str) -> ConnectionCore {
        ConnectionCore::new(
            Uri::parse("wamp://host.zz/endpoint").unwrap(),
            None,
            home_path,
            Context::new(),
        )
    }

    #[test]
    fn home_path_is_normalised() {
        assert_eq!(core("home/user/").home_path(), "/home/user");
        assert_eq!(core("/home/user").home_path(), "/home/user");
        assert_eq!(core("/").home_path(), "");
    }

    #[test]
    fn fresh_connections_are_dormant() {
        let core = core("/home/user");
        assert_eq!(core.session_id(), "0");
        assert_eq!(core.server_id(), None);
        assert!(!core.is_ready());
        assert_eq!(core.hostname(), "host.zz");
    }
}
