use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::SendError};
use tracing::debug;
use uuid::Uuid;

use atrium_types::events::GatewayEvent;

/// Unique identifier for one live connection of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Sending half of a registered connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    sender: UnboundedSender<GatewayEvent>,
}

impl ConnectionHandle {
    /// Queue an event for this connection. Fails only when the
    /// connection task has already gone away.
    pub fn send(&self, event: GatewayEvent) -> Result<(), SendError<GatewayEvent>> {
        self.sender.send(event)
    }
}

/// In-process map of user id -> live connections.
///
/// A user with no connections has no entry. Lookups and mutations never
/// hold the lock across an await point, so a std lock is enough.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<Uuid, HashMap<ConnectionId, UnboundedSender<GatewayEvent>>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection for `user_id`. The receiver yields every event
    /// published to the user until the connection is unregistered.
    pub fn register(&self, user_id: Uuid) -> (ConnectionId, UnboundedReceiver<GatewayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn_id = ConnectionId::new();

        let mut sessions = self.write();
        let connections = sessions.entry(user_id).or_default();
        connections.insert(conn_id, tx);

        debug!(
            "Registered connection {:?} for {}, {} live",
            conn_id,
            user_id,
            connections.len()
        );

        (conn_id, rx)
    }

    /// Like [`register`](Self::register), but the returned guard
    /// unregisters the connection when dropped.
    pub fn register_guarded(&self, user_id: Uuid) -> (SessionGuard, UnboundedReceiver<GatewayEvent>) {
        let (conn_id, rx) = self.register(user_id);
        let guard = SessionGuard {
            registry: self.clone(),
            user_id,
            conn_id,
        };
        (guard, rx)
    }

    /// Remove one connection. Drops the user's entry when it was the last.
    /// Returns false if the connection was not registered.
    pub fn unregister(&self, user_id: Uuid, conn_id: ConnectionId) -> bool {
        let mut sessions = self.write();

        let Some(connections) = sessions.get_mut(&user_id) else {
            return false;
        };
        let removed = connections.remove(&conn_id).is_some();

        if connections.is_empty() {
            sessions.remove(&user_id);
            debug!("{} has no live connections left", user_id);
        } else if removed {
            debug!(
                "Unregistered connection {:?} for {}, {} live",
                conn_id,
                user_id,
                connections.len()
            );
        }

        removed
    }

    /// Snapshot of the user's live connections.
    pub fn connections_for(&self, user_id: Uuid) -> Vec<ConnectionHandle> {
        self.read()
            .get(&user_id)
            .map(|connections| {
                connections
                    .iter()
                    .map(|(id, sender)| ConnectionHandle {
                        id: *id,
                        sender: sender.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.read().contains_key(&user_id)
    }

    pub fn connection_count(&self, user_id: Uuid) -> usize {
        self.read().get(&user_id).map(|c| c.len()).unwrap_or(0)
    }

    pub fn online_user_count(&self) -> usize {
        self.read().len()
    }

    // A panic while holding the lock cannot leave the map half-updated
    // (every mutation is a single insert/remove), so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, HashMap<ConnectionId, UnboundedSender<GatewayEvent>>>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, HashMap<ConnectionId, UnboundedSender<GatewayEvent>>>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Keeps a connection registered for as long as it is alive.
pub struct SessionGuard {
    registry: SessionRegistry,
    user_id: Uuid,
    conn_id: ConnectionId,
}

impl SessionGuard {
    pub fn connection_id(&self) -> ConnectionId {
        self.conn_id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.user_id, self.conn_id);
    }
}
