//! Request handler trait.

use crate::request::Request;

/// Handles requests for the resource behind a directory node.
///
/// Regular handlers run only when the request targets their node.
/// Catch-all handlers additionally run for every request that passes
/// through their node on the way to a descendant, whether or not that
/// descendant exists. The catch-all flag is fixed at construction; a
/// handler cannot change it after being added to a node.
pub trait Handler: Send + Sync {
    /// Unique name of the handler within a node.
    fn name(&self) -> &str;

    /// True if this handler also fires for requests passing through the
    /// node towards a descendant.
    fn is_catch_all(&self) -> bool;

    /// Handles a request targeting this handler's node.
    fn handle(&self, request: &mut Request);

    /// Handles a request passing through this handler's node. Only called
    /// on catch-all handlers when the node is not the target.
    /// `path_remainder` is the relative path from this node to the target.
    ///
    /// The default forwards to [`handle`](Handler::handle).
    fn handle_catch_all(&self, path_remainder: &str, request: &mut Request) {
        let _ = path_remainder;
        self.handle(request);
    }
}

type HandlerFn = dyn Fn(&mut Request) + Send + Sync;

/// Closure-backed handler for lightweight registrations.
pub struct FnHandler {
    name: String,
    catch_all: bool,
    func: Box<HandlerFn>,
}

impl FnHandler {
    /// Creates a regular handler around `func`.
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut Request) + Send + Sync + 'static,
    {
        Self::with_catch_all(name, false, func)
    }

    /// Creates a regular or catch-all handler around `func`.
    pub fn with_catch_all<F>(name: impl Into<String>, catch_all: bool, func: F) -> Self
    where
        F: Fn(&mut Request) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            catch_all,
            func: Box::new(func),
        }
    }
}

impl Handler for FnHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_catch_all(&self) -> bool {
        self.catch_all
    }

    fn handle(&self, request: &mut Request) {
        (self.func)(request);
    }
}
