use tracing::{debug, trace};
use uuid::Uuid;

use atrium_types::events::GatewayEvent;

use crate::registry::SessionRegistry;

/// Delivers events to every live connection of a user.
#[derive(Clone, Default)]
pub struct Dispatcher {
    registry: SessionRegistry,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Fire-and-forget push to all of the user's connections.
    ///
    /// A user with no connections is simply offline; nothing is queued.
    /// A connection that is already shutting down is skipped without
    /// affecting the others. Returns how many connections accepted it.
    pub fn publish(&self, user_id: Uuid, event: GatewayEvent) -> usize {
        let connections = self.registry.connections_for(user_id);
        if connections.is_empty() {
            trace!("{} offline, dropping {}", user_id, event.name());
            return 0;
        }

        let name = event.name();
        let mut delivered = 0;
        for connection in &connections {
            match connection.send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => debug!(
                    "Connection {:?} of {} closed before {} could be queued",
                    connection.id, user_id, name
                ),
            }
        }

        trace!("{} -> {} ({}/{} connections)", name, user_id, delivered, connections.len());
        delivered
    }
}
