//! The WAMP v1 connection state machine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde_json::{json, Value};

use tannoy_core::{Request, RequestKind};

use crate::connection::{Connection, ConnectionCore, PublishOptions};
use crate::context::Context;
use crate::message::{MessageType, WAMP_VERSION};
use crate::relay::RelayHandler;
use crate::rpc::RpcCallback;
use crate::sender::FrameSender;
use crate::uri::Uri;

/// Scheme used for URIs generated from bare paths.
const URI_SCHEME: &str = "wamp";

/// Length of generated session id strings.
const SESSION_ID_LENGTH: usize = 16;

/// Server identification sent in Welcome frames. Opaque to clients; echoed
/// back through [`ConnectionCore::server_id`].
const SERVER_ID: &str = concat!("tannoy/", env!("CARGO_PKG_VERSION"));

/// Error-URI fragment for calls that reached no method.
const ERROR_RPC: &str = "rpc_error";

/// Error-URI fragment for methods that reported an error.
const ERROR_LOGIC: &str = "logic_error";

/// A symmetric WAMP v1 connection.
///
/// One instance serves either end of a WAMP session. It starts in client
/// mode; calling [`welcome`](WampConnection::welcome) flips it to server
/// mode and opens the session. Beyond the standard protocol, both sides
/// may publish, subscribe and call. The wire publish/event asymmetry
/// (type 7 vs. type 8) is folded into a single publish surface that picks
/// the id by mode.
///
/// Inbound URIs are CURIE-expanded and normalised, then resolved against
/// the connection's home path, so a peer only ever reaches directory nodes
/// under its home subtree (or subtrees linked beneath it). Subscriptions
/// install a [`RelayHandler`] per topic; publishes fan out through every
/// relay installed at matching nodes.
///
/// The connection must be [`close`](Connection::close)d to release its
/// relay handlers.
///
/// Thread-safe; [`process`](Connection::process) may be driven by a pool
/// of workers.
pub struct WampConnection {
    core: ConnectionCore,
    sender: Arc<dyn FrameSender>,
    weak_self: Weak<WampConnection>,
    is_server: AtomicBool,
    rpc_counter: AtomicU64,
    /// RPC calls awaiting a response, by call id.
    pending_calls: Mutex<HashMap<String, Box<dyn RpcCallback>>>,
    /// Topics subscribed to as a client, in subscription order.
    client_subscribed_uris: Mutex<Vec<Uri>>,
    /// Directory paths subscribed to by the remote peer, in order.
    server_subscribed_paths: Mutex<Vec<String>>,
    /// CURIE prefix table: short prefix -> expansion.
    prefixes: Mutex<HashMap<String, String>>,
}

impl WampConnection {
    /// Creates a connection in client mode.
    ///
    /// `uri` is the server endpoint this connection belongs to;
    /// `user_account` is transmitted in generated URIs; `home_path` scopes
    /// every request into the directory of `context`; frames go out
    /// through `sender`.
    pub fn new(
        uri: Uri,
        user_account: Option<String>,
        home_path: &str,
        sender: Arc<dyn FrameSender>,
        context: Context,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            core: ConnectionCore::new(uri, user_account, home_path, context),
            sender,
            weak_self: weak_self.clone(),
            is_server: AtomicBool::new(false),
            rpc_counter: AtomicU64::new(0),
            pending_calls: Mutex::new(HashMap::new()),
            client_subscribed_uris: Mutex::new(Vec::new()),
            server_subscribed_paths: Mutex::new(Vec::new()),
            prefixes: Mutex::new(HashMap::new()),
        })
    }

    /// True once [`welcome`](WampConnection::welcome) switched this
    /// connection to the server protocol.
    pub fn is_server(&self) -> bool {
        self.is_server.load(Ordering::SeqCst)
    }

    /// Resets the session id, allowing the instance to run another
    /// handshake.
    pub fn clear_session_id(&self) {
        self.core.set_session_id("0");
    }

    /// Opens a session towards a WAMP client with a freshly generated
    /// session id, switching this connection to server mode.
    pub fn welcome(&self) -> bool {
        self.welcome_with(&random_session_id())
    }

    /// Opens a session towards a WAMP client with the given session id,
    /// switching this connection to server mode. Returns true if the
    /// Welcome frame was sent; the connection is then ready.
    pub fn welcome_with(&self, session_id: &str) -> bool {
        self.core.set_session_id(session_id);
        self.is_server.store(true, Ordering::SeqCst);
        let frame = json!([
            MessageType::Welcome.id(),
            session_id,
            WAMP_VERSION,
            SERVER_ID
        ]);
        if self.send(&frame) {
            self.set_ready(true);
            tracing::trace!(session_id, "connected as server");
            true
        } else {
            false
        }
    }

    /// Sends an event message; alias of [`publish`](Connection::publish)
    /// under the server-side name. The wire type id follows the connection
    /// mode either way.
    pub fn event(&self, topic_path: &str, data: Value) -> bool {
        self.publish(topic_path, data)
    }

    /// Registers a CURIE prefix at the remote endpoint: the peer may then
    /// abbreviate URIs starting with `uri` as `prefix:rest`.
    pub fn prefix(&self, prefix: &str, uri: &Uri) -> bool {
        let frame = json!([MessageType::Prefix.id(), prefix, uri.to_string()]);
        self.send(&frame)
    }

    fn send(&self, frame: &Value) -> bool {
        self.sender.send_text(&frame.to_string())
    }

    fn set_ready(&self, ready: bool) {
        if let Some(this) = self.weak_self.upgrade() {
            let connection: Arc<dyn Connection> = this;
            self.core.set_ready(&connection, ready);
        }
    }

    /// Expands a registered CURIE prefix, then parses and normalises the
    /// URI. `None` when the string is not a valid URI.
    fn create_uri(&self, uri_string: &str) -> Option<Uri> {
        let expanded;
        let mut input = uri_string;
        {
            let prefixes = self.prefixes.lock();
            if !prefixes.is_empty() {
                if let Some(index) = uri_string.find(':').filter(|&index| index > 0) {
                    if let Some(expansion) = prefixes.get(&uri_string[..index]) {
                        expanded = format!("{expansion}{}", &uri_string[index + 1..]);
                        input = &expanded;
                    }
                }
            }
        }
        let mut uri = Uri::parse(input).ok()?;
        uri.normalize();
        Some(uri)
    }

    /// Builds a full URI for `path` from this connection's scheme, user
    /// and hostname.
    fn create_uri_from_path(&self, path: &str) -> Option<Uri> {
        let mut uri = Uri::from_parts(URI_SCHEME, self.core.hostname(), path).ok()?;
        if let Some(user) = self.core.user_account() {
            uri.set_user(user);
        }
        Some(uri)
    }

    /// Normalises a request path to absolute form; empty paths are
    /// rejected.
    fn absolute_path(path: &str) -> Option<String> {
        if path.is_empty() {
            return None;
        }
        Some(if path.starts_with('/') {
            path.to_owned()
        } else {
            format!("/{path}")
        })
    }

    /// The unique relay-handler name for a subscription of this peer at
    /// `path`: `<path> "->" [user] "@" <session-id>`. Part of the external
    /// contract; administrative tooling may look handlers up by it.
    fn relay_handler_name(&self, path: &str) -> String {
        let session_id = self.core.session_id();
        match self.core.user_account() {
            Some(user) => format!("{path}->{user}@{session_id}"),
            None => format!("{path}->@{session_id}"),
        }
    }

    fn make_call_error(
        &self,
        mut uri: Uri,
        call_id: &str,
        error_code: &str,
        description: &str,
        details: Option<Value>,
    ) -> Value {
        uri.set_fragment(error_code);
        let mut frame = vec![
            json!(MessageType::CallError.id()),
            json!(call_id),
            json!(uri.to_string()),
            json!(description),
        ];
        if let Some(details) = details {
            frame.push(details);
        }
        Value::Array(frame)
    }

    /// Collapses result values per the protocol: no values is `null`, one
    /// value rides alone, several ride as an array.
    fn make_call_result(&self, call_id: &str, values: &[Value]) -> Value {
        let result = match values.len() {
            0 => Value::Null,
            1 => values[0].clone(),
            _ => Value::Array(values.to_vec()),
        };
        json!([MessageType::CallResult.id(), call_id, result])
    }

    fn publish_internal(&self, topic_uri: &Uri, data: Value, options: &PublishOptions) -> bool {
        let type_id = if self.is_server() {
            MessageType::Event.id()
        } else {
            MessageType::Publish.id()
        };
        let mut frame = vec![json!(type_id), json!(topic_uri.to_string()), data];
        if options.exclude_me {
            frame.push(json!(true));
        } else if let Some(exclude) = &options.exclude {
            frame.push(json!(exclude));
        }
        if let Some(eligible) = &options.eligible {
            if frame.len() < 4 {
                // The protocol positions eligible after exclude.
                frame.push(json!([]));
            }
            frame.push(json!(eligible));
        }
        self.send(&Value::Array(frame))
    }

    // ------------------------------------------------------------------
    // Inbound frame processors. Payload layouts are documented in
    // [`MessageType`].
    // ------------------------------------------------------------------

    fn process_welcome(&self, frame: &[Value]) -> bool {
        if frame.len() < 4 {
            tracing::trace!("invalid welcome frame");
            return false;
        }
        let (Some(session_id), Some(server_id)) = (frame[1].as_str(), frame[3].as_str()) else {
            return false;
        };
        self.core.set_session_id(session_id);
        self.core.set_server_id(server_id);
        self.set_ready(true);
        tracing::trace!(server_id, session_id, "received server welcome");
        true
    }

    fn process_prefix(&self, frame: &[Value]) -> bool {
        if frame.len() < 3 {
            tracing::trace!("invalid prefix frame");
            return false;
        }
        let (Some(prefix), Some(uri)) = (frame[1].as_str(), frame[2].as_str()) else {
            return false;
        };
        self.prefixes
            .lock()
            .insert(prefix.to_owned(), uri.to_owned());
        tracing::trace!(prefix, uri, "registered prefix");
        true
    }

    fn process_call(&self, frame: &[Value]) -> bool {
        if frame.len() < 3 {
            // Protocol violation; no reply.
            tracing::trace!("invalid call frame");
            return false;
        }
        let (Some(call_id), Some(method)) = (frame[1].as_str(), frame[2].as_str()) else {
            return false;
        };
        let Some(uri) = self.create_uri(method) else {
            tracing::trace!(method, "invalid method uri");
            let Some(error_uri) = self.create_uri_from_path("/error") else {
                return false;
            };
            let reply =
                self.make_call_error(error_uri, call_id, ERROR_RPC, "undefined method", None);
            return self.send(&reply);
        };
        let mut request =
            Request::with_parameters(uri.path().to_owned(), uri.parameters().to_vec());
        request.set_kind(RequestKind::Call);
        request.add_arguments(frame[3..].iter().cloned());

        let home_path = self.core.home_path();
        let executed = self
            .core
            .context()
            .directory()
            .handle(&home_path, &mut request);
        if executed > 0 {
            let result = request.result();
            if !result.has_errors() {
                let reply = self.make_call_result(call_id, result.values());
                self.send(&reply);
                tracing::trace!(method, "processed RPC call with success");
            } else {
                // The protocol carries a single error; further errors are
                // informational only.
                let error = result.error(0).expect("result has errors");
                let reply = self.make_call_error(
                    uri.clone(),
                    call_id,
                    ERROR_LOGIC,
                    &error.description,
                    error.details.clone(),
                );
                self.send(&reply);
                tracing::trace!(method, "processed RPC call with error");
            }
        } else {
            let reply = self.make_call_error(uri, call_id, ERROR_RPC, "undefined method", None);
            self.send(&reply);
            tracing::trace!(method, "call to undefined method");
        }
        true
    }

    fn process_call_result(&self, frame: &[Value]) -> bool {
        if frame.len() < 3 {
            tracing::trace!("invalid call result frame");
            return false;
        }
        let Some(call_id) = frame[1].as_str() else {
            return false;
        };
        let Some(callback) = self.pending_calls.lock().remove(call_id) else {
            tracing::trace!(call_id, "call result with no callback");
            return true;
        };
        callback.on_success(frame[2].clone());
        tracing::trace!(call_id, "processed call result");
        true
    }

    fn process_call_error(&self, frame: &[Value]) -> bool {
        if frame.len() < 4 {
            tracing::trace!("invalid call error frame");
            return false;
        }
        let (Some(call_id), Some(error_uri), Some(description)) =
            (frame[1].as_str(), frame[2].as_str(), frame[3].as_str())
        else {
            return false;
        };
        let details = frame.get(4).cloned();
        let Some(callback) = self.pending_calls.lock().remove(call_id) else {
            tracing::trace!(call_id, "call error with no callback");
            return true;
        };
        // An unparsable error URI is reported as absent rather than
        // failing the callback.
        callback.on_error(
            Uri::parse(error_uri).ok(),
            description.to_owned(),
            details,
        );
        tracing::trace!(call_id, "processed call error");
        true
    }

    fn process_subscribe(&self, frame: &[Value]) -> bool {
        if frame.len() < 2 {
            tracing::trace!("invalid subscribe frame");
            return false;
        }
        let Some(topic) = frame[1].as_str() else {
            return false;
        };
        let Some(uri) = self.create_uri(topic) else {
            tracing::trace!(topic, "invalid topic uri");
            return false;
        };
        let path = format!("{}{}", self.core.home_path(), uri.path());
        {
            let mut subscribed = self.server_subscribed_paths.lock();
            if !subscribed.contains(&path) {
                let peer: Weak<dyn Connection> = self.weak_self.clone();
                let handler = Arc::new(RelayHandler::new(
                    self.relay_handler_name(&path),
                    peer,
                    uri,
                ));
                if self
                    .core
                    .context()
                    .directory()
                    .add_handler(&path, handler)
                {
                    subscribed.push(path.clone());
                }
            }
        }
        tracing::trace!(path = %path, "processed subscribe");
        true
    }

    fn process_unsubscribe(&self, frame: &[Value]) -> bool {
        if frame.len() < 2 {
            tracing::trace!("invalid unsubscribe frame");
            return false;
        }
        let Some(topic) = frame[1].as_str() else {
            return false;
        };
        let Some(uri) = self.create_uri(topic) else {
            tracing::trace!(topic, "invalid topic uri");
            return false;
        };
        let path = format!("{}{}", self.core.home_path(), uri.path());
        self.core
            .context()
            .directory()
            .remove_handler(&path, &self.relay_handler_name(&path));
        self.server_subscribed_paths
            .lock()
            .retain(|subscribed| subscribed != &path);
        tracing::trace!(path = %path, "processed unsubscribe");
        true
    }

    fn process_publish(&self, frame: &[Value]) -> bool {
        if frame.len() < 3 {
            tracing::trace!("invalid publish frame");
            return false;
        }
        let Some(topic) = frame[1].as_str() else {
            return false;
        };
        let Some(mut uri) = self.create_uri(topic) else {
            tracing::trace!(topic, "invalid topic uri");
            return false;
        };
        // exclude_me and the explicit routing lists travel as URI query
        // parameters from here on; relay handlers filter on them.
        if let Some(exclude) = frame.get(3) {
            match exclude {
                Value::Bool(_) => uri.set_parameter("exclude", self.core.session_id()),
                Value::Array(list) => {
                    let exclude = join_session_ids(list);
                    if !exclude.is_empty() {
                        uri.set_parameter("exclude", exclude);
                    }
                }
                _ => {}
            }
            if let Some(Value::Array(list)) = frame.get(4) {
                let eligible = join_session_ids(list);
                if !eligible.is_empty() {
                    uri.set_parameter("eligible", eligible);
                }
            }
        }
        let mut request =
            Request::with_parameters(uri.path().to_owned(), uri.parameters().to_vec());
        request.set_kind(RequestKind::Publish);
        request.add_argument(frame[2].clone());
        let home_path = self.core.home_path();
        self.core
            .context()
            .directory()
            .handle(&home_path, &mut request);
        tracing::trace!(topic, "processed publish");
        true
    }

    fn process_event(&self, frame: &[Value]) -> bool {
        if frame.len() < 3 {
            tracing::trace!("invalid event frame");
            return false;
        }
        let Some(topic) = frame[1].as_str() else {
            return false;
        };
        // Events may arrive for URIs that were never individually
        // subscribed: wildcard subscriptions cover them.
        let Some(uri) = self.create_uri(topic) else {
            tracing::trace!(topic, "invalid topic uri");
            return false;
        };
        let mut request =
            Request::with_parameters(uri.path().to_owned(), uri.parameters().to_vec());
        request.set_kind(RequestKind::Publish);
        request.add_argument(frame[2].clone());
        let home_path = self.core.home_path();
        self.core
            .context()
            .directory()
            .handle(&home_path, &mut request);
        tracing::trace!(topic, "processed event");
        true
    }

    /// Cancels client subscriptions (sending unsubscribes) and removes the
    /// relay handlers installed for the remote peer.
    fn unsubscribe_all(&self) {
        let topics: Vec<Uri> = std::mem::take(&mut *self.client_subscribed_uris.lock());
        for topic_uri in topics {
            // The socket may already be gone; failure to flush the
            // unsubscribe is non-fatal.
            self.unsubscribe_uri(&topic_uri);
        }
        let paths: Vec<String> = std::mem::take(&mut *self.server_subscribed_paths.lock());
        let directory = self.core.context().directory().clone();
        for path in paths {
            directory.remove_handler(&path, &self.relay_handler_name(&path));
        }
    }
}

impl Connection for WampConnection {
    fn core(&self) -> &ConnectionCore {
        &self.core
    }

    fn call(
        &self,
        method_path: &str,
        callback: Box<dyn RpcCallback>,
        arguments: Vec<Value>,
    ) -> bool {
        let Some(path) = Self::absolute_path(method_path) else {
            return false;
        };
        let Some(uri) = self.create_uri_from_path(&path) else {
            return false;
        };
        self.call_uri(&uri, callback, arguments)
    }

    fn call_uri(
        &self,
        method_uri: &Uri,
        callback: Box<dyn RpcCallback>,
        arguments: Vec<Value>,
    ) -> bool {
        let call_id = {
            let mut pending = self.pending_calls.lock();
            let counter = self.rpc_counter.fetch_add(1, Ordering::SeqCst) + 1;
            let call_id = format!(
                "{}:{}:{}",
                self.core.session_id(),
                counter,
                epoch_millis()
            );
            pending.insert(call_id.clone(), callback);
            call_id
        };
        let mut frame = vec![
            json!(MessageType::Call.id()),
            json!(call_id),
            json!(method_uri.to_string()),
        ];
        frame.extend(arguments);
        self.send(&Value::Array(frame))
    }

    fn publish_with(&self, topic_path: &str, data: Value, options: PublishOptions) -> bool {
        let Some(path) = Self::absolute_path(topic_path) else {
            return false;
        };
        let Some(uri) = self.create_uri_from_path(&path) else {
            return false;
        };
        self.publish_internal(&uri, data, &options)
    }

    fn publish_uri(&self, topic_uri: &Uri, data: Value) -> bool {
        self.publish_internal(topic_uri, data, &PublishOptions::default())
    }

    fn subscribe(&self, topic_path: &str) -> bool {
        let Some(path) = Self::absolute_path(topic_path) else {
            return false;
        };
        let Some(uri) = self.create_uri_from_path(&path) else {
            return false;
        };
        self.subscribe_uri(&uri)
    }

    fn subscribe_uri(&self, topic_uri: &Uri) -> bool {
        let frame = json!([MessageType::Subscribe.id(), topic_uri.to_string()]);
        if self.send(&frame) {
            self.client_subscribed_uris.lock().push(topic_uri.clone());
            true
        } else {
            false
        }
    }

    fn unsubscribe(&self, topic_path: &str) -> bool {
        let Some(path) = Self::absolute_path(topic_path) else {
            return false;
        };
        let Some(uri) = self.create_uri_from_path(&path) else {
            return false;
        };
        self.unsubscribe_uri(&uri)
    }

    fn unsubscribe_uri(&self, topic_uri: &Uri) -> bool {
        let frame = json!([MessageType::Unsubscribe.id(), topic_uri.to_string()]);
        if self.send(&frame) {
            self.client_subscribed_uris
                .lock()
                .retain(|subscribed| subscribed != topic_uri);
            true
        } else {
            false
        }
    }

    fn process(&self, input: &str) -> bool {
        let Ok(Value::Array(frame)) = serde_json::from_str::<Value>(input) else {
            tracing::trace!("undecodable frame");
            return false;
        };
        let Some(message_type) = frame.first().and_then(Value::as_u64).and_then(MessageType::from_id)
        else {
            tracing::trace!("invalid frame type");
            return false;
        };
        match message_type {
            MessageType::Welcome => self.process_welcome(&frame),
            MessageType::Prefix => self.process_prefix(&frame),
            MessageType::Call => self.process_call(&frame),
            MessageType::CallResult => self.process_call_result(&frame),
            MessageType::CallError => self.process_call_error(&frame),
            MessageType::Subscribe => self.process_subscribe(&frame),
            MessageType::Unsubscribe => self.process_unsubscribe(&frame),
            MessageType::Publish => self.process_publish(&frame),
            MessageType::Event => self.process_event(&frame),
        }
    }

    fn close(&self) {
        self.set_ready(false);
        self.unsubscribe_all();
    }
}

fn epoch_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or(0)
}

fn join_session_ids(list: &[Value]) -> String {
    let ids: Vec<&str> = list.iter().filter_map(Value::as_str).collect();
    ids.join(",")
}

/// Generates a 16-character session id from 80 bits of system randomness,
/// base-32 encoded.
fn random_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_LENGTH * 5 / 8];
    getrandom::getrandom(&mut bytes).expect("system random source unavailable");
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuv";
    let mut id = String::with_capacity(SESSION_ID_LENGTH);
    let mut accumulator: u32 = 0;
    let mut pending_bits = 0;
    for byte in bytes {
        accumulator = (accumulator << 8) | u32::from(byte);
        pending_bits += 8;
        while pending_bits >= 5 {
            pending_bits -= 5;
            id.push(ALPHABET[(accumulator >> pending_bits) as usize & 31] as char);
        }
    }
    id
}
