//! Client-side RPC plumbing.

use core::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Notify;

use crate::connection::Connection;
use crate::uri::Uri;

/// Default synchronous call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Receives the outcome of an RPC call.
///
/// For every initiated call exactly one of the two methods fires, at most
/// once; the consuming receivers make a double completion unrepresentable.
/// Callbacks run on the thread driving the peer's inbound frames and must
/// not block on that same connection.
pub trait RpcCallback: Send {
    /// The call completed; `result` is the method result, `Null` when the
    /// method returned nothing.
    fn on_success(self: Box<Self>, result: Value);

    /// The call failed. `error_uri` is absent when the wire carried an
    /// unparsable URI.
    fn on_error(
        self: Box<Self>,
        error_uri: Option<Uri>,
        description: String,
        details: Option<Value>,
    );
}

impl<F> RpcCallback for F
where
    F: FnOnce(Result<Value, (Option<Uri>, String, Option<Value>)>) + Send,
{
    fn on_success(self: Box<Self>, result: Value) {
        self(Ok(result))
    }

    fn on_error(
        self: Box<Self>,
        error_uri: Option<Uri>,
        description: String,
        details: Option<Value>,
    ) {
        self(Err((error_uri, description, details)))
    }
}

/// Stage of a remote method call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallState {
    /// The call has not been made.
    #[default]
    Initialized,
    /// The call is on the wire, awaiting a response.
    InProgress,
    /// A response has been received.
    Completed,
}

/// Why a [`RemoteMethod::call`] failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallFailure {
    /// The call could not be made.
    CallError,
    /// The remote method returned an error.
    RemoteError,
    /// No response arrived within the timeout. The call is not cancelled;
    /// the response may still arrive later.
    Timeout,
}

/// Error raised by [`RemoteMethod::call`].
#[derive(Debug, Clone)]
pub struct RemoteCallError {
    pub reason: CallFailure,
    pub error_uri: Option<Uri>,
    pub description: Option<String>,
    pub details: Option<Value>,
}

impl RemoteCallError {
    fn new(reason: CallFailure) -> Self {
        Self {
            reason,
            error_uri: None,
            description: None,
            details: None,
        }
    }
}

impl fmt::Display for RemoteCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            CallFailure::CallError => write!(f, "call could not be made"),
            CallFailure::Timeout => write!(f, "call timed out"),
            CallFailure::RemoteError => match &self.description {
                Some(description) => write!(f, "remote error: {description}"),
                None => write!(f, "remote error"),
            },
        }
    }
}

impl std::error::Error for RemoteCallError {}

#[derive(Default)]
struct CallProgress {
    stage: CallState,
    successful: bool,
    result: Option<Value>,
    error_uri: Option<Uri>,
    error_description: Option<String>,
    error_details: Option<Value>,
}

struct CallShared {
    progress: Mutex<CallProgress>,
    completed: Notify,
}

/// Callback adapter feeding a shared call state.
struct SharedCallback(Arc<CallShared>);

impl RpcCallback for SharedCallback {
    fn on_success(self: Box<Self>, result: Value) {
        {
            let mut progress = self.0.progress.lock();
            progress.stage = CallState::Completed;
            progress.successful = true;
            if !result.is_null() {
                progress.result = Some(result);
            }
        }
        self.0.completed.notify_waiters();
    }

    fn on_error(
        self: Box<Self>,
        error_uri: Option<Uri>,
        description: String,
        details: Option<Value>,
    ) {
        {
            let mut progress = self.0.progress.lock();
            progress.stage = CallState::Completed;
            progress.successful = false;
            progress.error_uri = error_uri;
            progress.error_description = Some(description);
            progress.error_details = details;
        }
        self.0.completed.notify_waiters();
    }
}

/// A single remote method call.
///
/// Each instance represents exactly one call: it can be fired once, either
/// fire-and-track ([`call_async`](RemoteMethodCall::call_async)) or
/// fire-and-wait ([`call`](RemoteMethodCall::call)). Completion state and
/// the decoded result or error stay available on the instance afterwards.
///
/// Waiting never cancels the call on the wire; after a timeout the caller
/// may keep waiting with
/// [`wait_until_completion`](RemoteMethodCall::wait_until_completion).
pub struct RemoteMethodCall<T> {
    connection: Arc<dyn Connection>,
    method_path: String,
    timeout: Duration,
    shared: Arc<CallShared>,
    _result: PhantomData<fn() -> T>,
}

impl<T> RemoteMethodCall<T> {
    /// Prepares a call to `method_path` over `connection`.
    pub fn new(connection: Arc<dyn Connection>, method_path: impl Into<String>) -> Self {
        Self {
            connection,
            method_path: method_path.into(),
            timeout: DEFAULT_CALL_TIMEOUT,
            shared: Arc::new(CallShared {
                progress: Mutex::new(CallProgress::default()),
                completed: Notify::new(),
            }),
            _result: PhantomData,
        }
    }

    /// The timeout used by [`call`](RemoteMethodCall::call).
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// The current stage of the call.
    pub fn state(&self) -> CallState {
        self.shared.progress.lock().stage
    }

    /// True if the call completed without an error.
    pub fn is_successful(&self) -> bool {
        self.shared.progress.lock().successful
    }

    /// The error description, when the call completed with an error.
    pub fn error_description(&self) -> Option<String> {
        self.shared.progress.lock().error_description.clone()
    }

    /// The error details, when provided by the remote method.
    pub fn error_details(&self) -> Option<Value> {
        self.shared.progress.lock().error_details.clone()
    }

    /// The error URI, when the call completed with an error.
    pub fn error_uri(&self) -> Option<Uri> {
        self.shared.progress.lock().error_uri.clone()
    }

    /// Fires the call and returns immediately. False if the call was
    /// already fired or the request frame could not be sent.
    pub fn call_async(&self, arguments: Vec<Value>) -> bool {
        {
            let mut progress = self.shared.progress.lock();
            if progress.stage != CallState::Initialized {
                return false;
            }
            progress.stage = CallState::InProgress;
        }
        self.connection.call(
            &self.method_path,
            Box::new(SharedCallback(self.shared.clone())),
            arguments,
        )
    }

    /// Fires the call and waits for completion up to the configured
    /// timeout. True if the call completed in time.
    pub async fn call(&self, arguments: Vec<Value>) -> bool {
        if !self.call_async(arguments) {
            return false;
        }
        self.wait_until_completion(self.timeout).await
    }

    /// Waits for the call to complete, up to `timeout`.
    ///
    /// Returns immediately when the call already completed or has not been
    /// fired. A timeout leaves the call in progress; waiting again is
    /// allowed, and any number of tasks may wait concurrently.
    pub async fn wait_until_completion(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before re-checking, so a completion racing
            // this check still wakes the wait below.
            let notified = self.shared.completed.notified();
            match self.state() {
                CallState::Completed => return true,
                CallState::Initialized => return false,
                CallState::InProgress => {}
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.state() == CallState::Completed;
            }
        }
    }
}

impl<T: DeserializeOwned> RemoteMethodCall<T> {
    /// The decoded result of a successful call, or `None` when the method
    /// returned nothing (or the value does not decode as `T`).
    pub fn result(&self) -> Option<T> {
        let progress = self.shared.progress.lock();
        progress
            .result
            .clone()
            .and_then(|value| serde_json::from_value(value).ok())
    }
}

/// A remote method that can be called repeatedly.
///
/// Each invocation runs through a fresh [`RemoteMethodCall`].
pub struct RemoteMethod<T> {
    connection: Arc<dyn Connection>,
    method_path: String,
    _result: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> RemoteMethod<T> {
    pub fn new(connection: Arc<dyn Connection>, method_path: impl Into<String>) -> Self {
        Self {
            connection,
            method_path: method_path.into(),
            _result: PhantomData,
        }
    }

    /// Calls the remote method and waits for the result with the default
    /// timeout. `Ok(None)` means the method completed without returning a
    /// value.
    pub async fn call(&self, arguments: Vec<Value>) -> Result<Option<T>, RemoteCallError> {
        let method_call =
            RemoteMethodCall::<T>::new(self.connection.clone(), self.method_path.clone());
        if method_call.call(arguments).await {
            if method_call.is_successful() {
                Ok(method_call.result())
            } else {
                Err(RemoteCallError {
                    reason: CallFailure::RemoteError,
                    error_uri: method_call.error_uri(),
                    description: method_call.error_description(),
                    details: method_call.error_details(),
                })
            }
        } else {
            match method_call.state() {
                CallState::InProgress => Err(RemoteCallError::new(CallFailure::Timeout)),
                _ => Err(RemoteCallError::new(CallFailure::CallError)),
            }
        }
    }

    /// Fires the call and returns the tracking [`RemoteMethodCall`]
    /// immediately.
    pub fn call_async(&self, arguments: Vec<Value>) -> RemoteMethodCall<T> {
        let method_call =
            RemoteMethodCall::<T>::new(self.connection.clone(), self.method_path.clone());
        method_call.call_async(arguments);
        method_call
    }
}
