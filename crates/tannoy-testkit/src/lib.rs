//! tannoy-testkit: in-memory fixtures for exercising tannoy peers.
//!
//! A [`RecordingSender`] captures outbound frames and can loop them
//! straight into a receiving connection, so a client/server pair runs a
//! full WAMP session in-process without a socket. [`LinkedPair`] wires two
//! connections together that way; [`RecordingHandler`] captures what
//! reaches a directory node.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;

use tannoy_core::{Handler, Request};
use tannoy_wamp::{Connection, Context, FrameSender, Uri, WampConnection};

/// Frame sender that records every frame and optionally forwards it to a
/// linked receiving connection.
///
/// With a receiver linked, `send_text` returns the receiver's `process`
/// result, so a protocol violation on the far side surfaces at the send
/// call site. Without one, frames are recorded and reported sent. A failed
/// transport is simulated with [`set_broken`](RecordingSender::set_broken).
#[derive(Default)]
pub struct RecordingSender {
    frames: Mutex<Vec<String>>,
    receiver: Mutex<Option<Weak<dyn Connection>>>,
    broken: Mutex<bool>,
}

impl RecordingSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Routes frames sent through this sender into `receiver`.
    pub fn set_receiver(&self, receiver: &Arc<WampConnection>) {
        let receiver: Arc<dyn Connection> = receiver.clone();
        let weak: Weak<dyn Connection> = Arc::downgrade(&receiver);
        *self.receiver.lock() = Some(weak);
    }

    /// Makes every send fail, as a dead socket would.
    pub fn set_broken(&self, broken: bool) {
        *self.broken.lock() = broken;
    }

    /// The most recent frame, if any.
    pub fn last_frame(&self) -> Option<String> {
        self.frames.lock().last().cloned()
    }

    /// All recorded frames in send order.
    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().clone()
    }

    /// The most recent frame decoded as a JSON array.
    pub fn last_message(&self) -> Option<Vec<Value>> {
        let frame = self.last_frame()?;
        match serde_json::from_str(&frame) {
            Ok(Value::Array(message)) => Some(message),
            _ => None,
        }
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }
}

impl FrameSender for RecordingSender {
    fn send_text(&self, text: &str) -> bool {
        if *self.broken.lock() {
            return false;
        }
        self.frames.lock().push(text.to_owned());
        let receiver = self.receiver.lock().clone();
        match receiver.and_then(|weak| weak.upgrade()) {
            Some(connection) => connection.process(text),
            None => true,
        }
    }

    fn send_binary(&self, _data: &[u8]) -> bool {
        false
    }
}

/// A client and server connection joined by in-memory loopback senders.
///
/// Frames sent by the client are processed by the server and vice versa,
/// synchronously, so a test drives a complete round trip with ordinary
/// calls.
pub struct LinkedPair {
    client: Arc<WampConnection>,
    server: Arc<WampConnection>,
    client_out: Arc<RecordingSender>,
    server_out: Arc<RecordingSender>,
    user_account: String,
}

impl LinkedPair {
    /// Builds a linked pair for `user_account` against a shared `context`.
    ///
    /// `endpoint` is the URI path of the test endpoint; the client and
    /// server sides get `/client` and `/server` suffixes so the two
    /// connections stay distinguishable inside one process. Home paths
    /// scope each side's view of the directory.
    pub fn new(
        context: &Context,
        endpoint: &str,
        user_account: &str,
        client_home_path: &str,
        server_home_path: &str,
    ) -> Self {
        let hostname = "testkit.local";
        let client_out = RecordingSender::new();
        let server_out = RecordingSender::new();
        let client_uri = Uri::from_parts("ws", hostname, &format!("{endpoint}/client"))
            .expect("client endpoint uri");
        let server_uri = Uri::from_parts("ws", hostname, &format!("{endpoint}/server"))
            .expect("server endpoint uri");
        let client = WampConnection::new(
            client_uri,
            Some(user_account.to_owned()),
            client_home_path,
            client_out.clone(),
            context.clone(),
        );
        let server = WampConnection::new(
            server_uri,
            Some(user_account.to_owned()),
            server_home_path,
            server_out.clone(),
            context.clone(),
        );
        client_out.set_receiver(&server);
        server_out.set_receiver(&client);
        Self {
            client,
            server,
            client_out,
            server_out,
            user_account: user_account.to_owned(),
        }
    }

    /// Runs the welcome handshake with a deterministic session id derived
    /// from the user account.
    pub fn open(&self) {
        self.server.welcome_with(&self.session_id());
    }

    /// The session id [`open`](LinkedPair::open) establishes.
    pub fn session_id(&self) -> String {
        format!("test-session-{}", self.user_account)
    }

    pub fn client(&self) -> &Arc<WampConnection> {
        &self.client
    }

    pub fn server(&self) -> &Arc<WampConnection> {
        &self.server
    }

    /// The last frame the client put on the wire.
    pub fn client_output(&self) -> Option<String> {
        self.client_out.last_frame()
    }

    /// The last frame the server put on the wire.
    pub fn server_output(&self) -> Option<String> {
        self.server_out.last_frame()
    }

    pub fn client_sender(&self) -> &Arc<RecordingSender> {
        &self.client_out
    }

    pub fn server_sender(&self) -> &Arc<RecordingSender> {
        &self.server_out
    }

    /// Closes both sides.
    pub fn close(&self) {
        self.client.close();
        self.server.close();
    }
}

#[derive(Default)]
struct RecordingState {
    arguments: Option<Vec<Value>>,
    path_remainder: Option<String>,
}

/// Handler that captures the arguments (and, for catch-all dispatch, the
/// path remainder) of the requests it receives.
pub struct RecordingHandler {
    name: String,
    catch_all: bool,
    state: Mutex<RecordingState>,
}

impl RecordingHandler {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_catch_all(name, false)
    }

    pub fn with_catch_all(name: impl Into<String>, catch_all: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            catch_all,
            state: Mutex::new(RecordingState::default()),
        })
    }

    /// The captured argument at `index` from the most recent request, if
    /// one was captured.
    pub fn argument(&self, index: usize) -> Option<Value> {
        self.state
            .lock()
            .arguments
            .as_ref()
            .and_then(|arguments| arguments.get(index).cloned())
    }

    /// The path remainder of the most recent catch-all dispatch, if the
    /// last request arrived that way.
    pub fn path_remainder(&self) -> Option<String> {
        self.state.lock().path_remainder.clone()
    }

    /// True if any request has been captured since the last clear.
    pub fn was_called(&self) -> bool {
        self.state.lock().arguments.is_some()
    }

    /// Forgets captured state.
    pub fn clear(&self) {
        *self.state.lock() = RecordingState::default();
    }
}

impl Handler for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_catch_all(&self) -> bool {
        self.catch_all
    }

    fn handle(&self, request: &mut Request) {
        let mut state = self.state.lock();
        state.arguments = Some(request.arguments().to_vec());
        state.path_remainder = None;
    }

    fn handle_catch_all(&self, path_remainder: &str, request: &mut Request) {
        self.handle(request);
        self.state.lock().path_remainder = Some(path_remainder.to_owned());
    }
}
