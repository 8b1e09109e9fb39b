//! Server-side subscription relay.

use std::sync::Weak;

use serde_json::Value;

use tannoy_core::{Handler, Request, RequestKind};

use crate::connection::Connection;
use crate::uri::Uri;

/// Republishes directory traffic to one subscribed peer.
///
/// One relay handler is installed per (path, peer) subscription. When a
/// publish dispatched into the directory reaches the handler's node, the
/// event payload is sent back out over the peer's connection, rewritten to
/// the URI the peer subscribed with. This maps the publisher's URI space
/// onto the subscriber's.
///
/// Only single-argument publish requests are relayed; RPC traffic never
/// leaves the directory through a relay.
pub struct RelayHandler {
    name: String,
    catch_all: bool,
    connection: Weak<dyn Connection>,
    relay_uri: Uri,
}

impl RelayHandler {
    /// Creates a relay towards `connection` for `relay_uri`.
    ///
    /// A relay URI whose path ends in `/*` makes this a catch-all handler
    /// covering the whole subtree; relayed URIs then carry the full target
    /// path with the wildcard stripped.
    pub fn new(
        name: impl Into<String>,
        connection: Weak<dyn Connection>,
        relay_uri: Uri,
    ) -> Self {
        let catch_all = relay_uri.path().ends_with("/*");
        let relay_uri = if catch_all {
            let mut stripped = relay_uri;
            let path = stripped.path().to_owned();
            stripped.set_path(&path[..path.len() - 1]);
            stripped
        } else {
            relay_uri
        };
        Self {
            name: name.into(),
            catch_all,
            connection,
            relay_uri,
        }
    }

    fn relay(&self, relay_uri: &Uri, request: &mut Request) {
        if request.kind() != RequestKind::Publish || request.num_arguments() != 1 {
            return;
        }
        let Some(connection) = self.connection.upgrade() else {
            // The peer is gone; the handler will be cleaned up with it.
            return;
        };
        let session_id = connection.core().session_id();
        if let Some(eligible) = request.parameter("eligible") {
            if !list_contains(eligible, &session_id) {
                tracing::trace!(uri = %relay_uri, "not eligible");
                return;
            }
        }
        if let Some(exclude) = request.parameter("exclude") {
            if list_contains(exclude, &session_id) {
                tracing::trace!(uri = %relay_uri, "excluded from relay");
                return;
            }
        }
        tracing::trace!(uri = %relay_uri, "relay");
        let data = request.argument(0).cloned().unwrap_or(Value::Null);
        connection.publish_uri(relay_uri, data);
    }
}

/// Membership test against a comma-separated session-id list.
fn list_contains(list: &str, session_id: &str) -> bool {
    list.split(',').any(|entry| entry == session_id)
}

impl Handler for RelayHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_catch_all(&self) -> bool {
        self.catch_all
    }

    fn handle(&self, request: &mut Request) {
        let relay_uri = self.relay_uri.clone();
        self.relay(&relay_uri, request);
    }

    fn handle_catch_all(&self, path_remainder: &str, request: &mut Request) {
        let mut relay_uri = self.relay_uri.clone();
        let path = format!("{}{}", relay_uri.path(), path_remainder);
        relay_uri.set_path(&path);
        self.relay(&relay_uri, request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_relay_uri_is_stripped() {
        let uri = Uri::parse("wamp://u@host/topics/cat1/*").unwrap();
        let handler = RelayHandler::new("relay", Weak::<NeverConnection>::new(), uri);
        assert!(handler.is_catch_all());
        assert_eq!(handler.relay_uri.path(), "/topics/cat1/");

        let uri = Uri::parse("wamp://u@host/topics/cat1/topic1").unwrap();
        let handler = RelayHandler::new("relay", Weak::<NeverConnection>::new(), uri);
        assert!(!handler.is_catch_all());
        assert_eq!(handler.relay_uri.path(), "/topics/cat1/topic1");
    }

    #[test]
    fn session_list_membership() {
        assert!(list_contains("abc", "abc"));
        assert!(list_contains("abc,def", "abc"));
        assert!(list_contains("abc,def", "def"));
        assert!(!list_contains("abc,def", "ab"));
        assert!(!list_contains("abcdef", "abc"));
    }

    // Placeholder connection type for Weak::new(); never instantiated.
    struct NeverConnection;

    impl Connection for NeverConnection {
        fn core(&self) -> &crate::connection::ConnectionCore {
            unreachable!()
        }
        fn call(
            &self,
            _: &str,
            _: Box<dyn crate::rpc::RpcCallback>,
            _: Vec<Value>,
        ) -> bool {
            unreachable!()
        }
        fn call_uri(
            &self,
            _: &Uri,
            _: Box<dyn crate::rpc::RpcCallback>,
            _: Vec<Value>,
        ) -> bool {
            unreachable!()
        }
        fn publish_with(&self, _: &str, _: Value, _: crate::connection::PublishOptions) -> bool {
            unreachable!()
        }
        fn publish_uri(&self, _: &Uri, _: Value) -> bool {
            unreachable!()
        }
        fn subscribe(&self, _: &str) -> bool {
            unreachable!()
        }
        fn subscribe_uri(&self, _: &Uri) -> bool {
            unreachable!()
        }
        fn unsubscribe(&self, _: &str) -> bool {
            unreachable!()
        }
        fn unsubscribe_uri(&self, _: &Uri) -> bool {
            unreachable!()
        }
        fn process(&self, _: &str) -> bool {
            unreachable!()
        }
        fn close(&self) {
            unreachable!()
        }
    }
}
