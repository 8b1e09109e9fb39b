//! Shared peer context.

use std::sync::Arc;

use tannoy_core::Directory;

use crate::registry::ConnectionRegistry;
use crate::service::ServiceRegistry;

/// The shared state a peer routes through: the handler directory, the set
/// of ready connections, and the registered services.
///
/// A context replaces process-wide singletons: tests and multi-tenant
/// hosts create as many independent contexts as they need and hand one to
/// every connection. Cloning is cheap and shares the underlying state.
#[derive(Clone)]
pub struct Context {
    directory: Arc<Directory>,
    connections: Arc<ConnectionRegistry>,
    services: Arc<ServiceRegistry>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Creates a fresh context with an empty directory and no services.
    pub fn new() -> Self {
        let directory = Arc::new(Directory::new());
        let services = Arc::new(ServiceRegistry::new(directory.clone()));
        let connections = Arc::new(ConnectionRegistry::new(services.clone()));
        Self {
            directory,
            connections,
            services,
        }
    }

    /// The handler directory.
    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    /// The registry of ready connections.
    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    /// The registered services.
    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }
}
