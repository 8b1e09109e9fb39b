//! Registry of ready connections.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::connection::Connection;
use crate::service::ServiceRegistry;

/// Tracks every connection that is currently ready.
///
/// Connections register themselves on the not-ready -> ready transition
/// and deregister on the reverse; no other code should call
/// [`add`](ConnectionRegistry::add) or [`remove`](ConnectionRegistry::remove).
/// Registration fans out to the service registry so services can wire
/// their subscriptions onto the new connection.
pub struct ConnectionRegistry {
    services: Arc<ServiceRegistry>,
    connections: Mutex<Vec<Arc<dyn Connection>>>,
}

impl ConnectionRegistry {
    pub fn new(services: Arc<ServiceRegistry>) -> Self {
        Self {
            services,
            connections: Mutex::new(Vec::new()),
        }
    }

    /// Registers a ready connection and notifies services. Registering the
    /// same connection twice is a no-op.
    ///
    /// # Panics
    ///
    /// Panics if the connection is not ready; only the ready transition
    /// may register a connection.
    pub fn add(&self, connection: Arc<dyn Connection>) {
        assert!(
            connection.core().is_ready(),
            "only ready connections can be registered"
        );
        {
            let mut connections = self.connections.lock();
            if connections
                .iter()
                .any(|existing| Arc::ptr_eq(existing, &connection))
            {
                return;
            }
            connections.push(connection.clone());
        }
        self.services.connect(&connection);
    }

    /// Deregisters a connection and notifies services of the close.
    /// No-op if the connection was never registered.
    pub fn remove(&self, connection: &Arc<dyn Connection>) {
        let removed = {
            let mut connections = self.connections.lock();
            match connections
                .iter()
                .position(|existing| Arc::ptr_eq(existing, connection))
            {
                Some(index) => {
                    connections.remove(index);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.services.disconnect(connection);
        }
    }

    /// Snapshot of all ready connections.
    pub fn connections(&self) -> Vec<Arc<dyn Connection>> {
        self.connections.lock().clone()
    }

    pub fn num_connections(&self) -> usize {
        self.connections.lock().len()
    }
}
