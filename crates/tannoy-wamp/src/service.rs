//! Service registration and connection wiring.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use tannoy_core::{Directory, Handler, RequestKind};

use crate::connection::Connection;
use crate::method::{MethodHandler, RpcError};

struct ServiceHandlerEntry {
    /// Request path used on the wire to (un)subscribe, relative to the
    /// peer's home.
    request_path: String,
    /// Full directory path of the node carrying the handler.
    node_path: String,
    /// Name of the installed handler.
    handler_name: String,
    kind: RequestKind,
}

/// A named set of request handlers rooted at a service home path.
///
/// All request paths of the definition are interpreted with respect to the
/// home path, so the same service can be instantiated once per user home.
/// Handlers are installed into the directory as they are added and removed
/// together when the service is dropped from the registry.
pub struct ServiceDefinition {
    name: String,
    /// Home path with a trailing slash, ready for concatenation.
    home_path: String,
    directory: Arc<Directory>,
    auto_connect: AtomicBool,
    handlers: Mutex<Vec<ServiceHandlerEntry>>,
}

impl ServiceDefinition {
    fn new(name: String, home_path: &str, directory: Arc<Directory>) -> Self {
        let home_path = if home_path.ends_with('/') {
            home_path.to_owned()
        } else {
            format!("{home_path}/")
        };
        Self {
            name,
            home_path,
            directory,
            auto_connect: AtomicBool::new(true),
            handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The service home path, with its trailing slash.
    pub fn home_path(&self) -> &str {
        &self.home_path
    }

    /// Whether this service is wired onto new connections automatically.
    pub fn auto_connect(&self) -> bool {
        self.auto_connect.load(Ordering::SeqCst)
    }

    /// Controls automatic wiring of this service onto new connections.
    /// When disabled, [`connect`](ServiceDefinition::connect) must be
    /// called manually.
    pub fn set_auto_connect(&self, auto_connect: bool) {
        self.auto_connect.store(auto_connect, Ordering::SeqCst);
    }

    /// Registers a service method at `request_path` (relative to the
    /// service home; a trailing `/*` registers a catch-all). `kind`
    /// selects the traffic the method answers: `Call` methods serve RPC,
    /// `Publish` methods consume subscribed events and are auto-subscribed
    /// on connect. The directory path is created as needed.
    pub fn add_method<F>(
        &self,
        request_path: &str,
        kind: RequestKind,
        arity: usize,
        method: F,
    ) -> bool
    where
        F: Fn(&[Value]) -> Result<Option<Value>, RpcError> + Send + Sync + 'static,
    {
        let handler_name = format!("{}:{}:{}", self.name, kind, request_path);
        let catch_all = request_path.ends_with("/*");
        self.add_handler(
            request_path,
            kind,
            Arc::new(MethodHandler::new(handler_name, catch_all, arity, method)),
        )
    }

    /// Registers an arbitrary handler at `request_path`; the typed
    /// [`add_method`](ServiceDefinition::add_method) is built on this.
    pub fn add_handler(
        &self,
        request_path: &str,
        kind: RequestKind,
        handler: Arc<dyn Handler>,
    ) -> bool {
        let request_path = if request_path.starts_with('/') {
            request_path.to_owned()
        } else {
            format!("/{request_path}")
        };
        let mut node_path = format!("{}{}", self.home_path, &request_path[1..]);
        if let Some(stripped) = node_path.strip_suffix("/*") {
            node_path = stripped.to_owned();
        }
        let handler_name = handler.name().to_owned();
        if self.directory.create_path(&node_path)
            && self.directory.add_handler(&node_path, handler)
        {
            tracing::trace!(
                service = %self.name,
                handler = %handler_name,
                path = %node_path,
                "added service handler"
            );
            self.handlers.lock().push(ServiceHandlerEntry {
                request_path,
                node_path,
                handler_name,
                kind,
            });
            true
        } else {
            false
        }
    }

    /// The request paths of publish-kind handlers, the ones that need a
    /// live subscription. Snapshotted so no lock is held while frames go
    /// out.
    fn event_paths(&self) -> Vec<String> {
        self.handlers
            .lock()
            .iter()
            .filter(|entry| entry.kind == RequestKind::Publish)
            .map(|entry| entry.request_path.clone())
            .collect()
    }

    /// Wires this service onto `connection` by subscribing every
    /// publish-kind request path. Returns false if any subscribe failed.
    pub fn connect(&self, connection: &Arc<dyn Connection>) -> bool {
        let mut success = true;
        for request_path in self.event_paths() {
            if !connection.subscribe(&request_path) {
                success = false;
            }
        }
        success
    }

    /// Unwires this service from `connection`; counterpart of
    /// [`connect`](ServiceDefinition::connect).
    pub fn disconnect(&self, connection: &Arc<dyn Connection>) -> bool {
        let mut success = true;
        for request_path in self.event_paths() {
            if !connection.unsubscribe(&request_path) {
                success = false;
            }
        }
        success
    }

    /// Removes every handler this service installed. Directory paths are
    /// left in place; they may be shared with other services.
    pub fn remove_all_handlers(&self) {
        let mut entries = self.handlers.lock();
        for entry in entries.drain(..) {
            self.directory
                .remove_handler(&entry.node_path, &entry.handler_name);
            tracing::trace!(
                service = %self.name,
                handler = %entry.handler_name,
                path = %entry.node_path,
                "removed service handler"
            );
        }
    }
}

/// Registry of services known to a peer.
///
/// Services are notified when connections become ready or close; services
/// flagged auto-connect have their event subscriptions wired onto every
/// new connection.
pub struct ServiceRegistry {
    directory: Arc<Directory>,
    services: Mutex<Vec<Arc<ServiceDefinition>>>,
}

impl ServiceRegistry {
    pub fn new(directory: Arc<Directory>) -> Self {
        Self {
            directory,
            services: Mutex::new(Vec::new()),
        }
    }

    /// Registers a service with a unique name and a home path.
    ///
    /// # Panics
    ///
    /// Panics if a service with the same name is already registered.
    pub fn add_service(&self, name: impl Into<String>, home_path: &str) -> Arc<ServiceDefinition> {
        let name = name.into();
        let mut services = self.services.lock();
        assert!(
            !services.iter().any(|service| service.name == name),
            "duplicate service name: {name}"
        );
        let definition = Arc::new(ServiceDefinition::new(
            name,
            home_path,
            self.directory.clone(),
        ));
        services.push(definition.clone());
        definition
    }

    /// The registered service with this name, if any.
    pub fn service(&self, name: &str) -> Option<Arc<ServiceDefinition>> {
        self.services
            .lock()
            .iter()
            .find(|service| service.name == name)
            .cloned()
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.service(name).is_some()
    }

    pub fn num_services(&self) -> usize {
        self.services.lock().len()
    }

    /// Removes a service and every handler it installed.
    pub fn remove_service(&self, name: &str) {
        let removed = {
            let mut services = self.services.lock();
            match services.iter().position(|service| service.name == name) {
                Some(index) => Some(services.remove(index)),
                None => None,
            }
        };
        if let Some(service) = removed {
            service.remove_all_handlers();
            tracing::trace!(service = name, "removed service");
        }
    }

    /// Notifies services of a newly ready connection. Auto-connect
    /// services wire their subscriptions onto it.
    pub fn connect(&self, connection: &Arc<dyn Connection>) {
        let services = self.services.lock().clone();
        for service in services {
            if service.auto_connect() {
                service.connect(connection);
            }
        }
    }

    /// Notifies services of a closing connection.
    pub fn disconnect(&self, connection: &Arc<dyn Connection>) {
        let services = self.services.lock().clone();
        for service in services {
            if service.auto_connect() {
                service.disconnect(connection);
            }
        }
    }
}
