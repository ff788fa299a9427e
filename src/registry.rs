use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    error::{ChatError, ChatResult},
    events::ServerEvent,
    store::UserId,
};

/// Outbound queue of a single live connection.
pub type Outbox = mpsc::UnboundedSender<ServerEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> ConnectionId {
        ConnectionId(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "c/{}", self.0.simple())
    }
}

/// An authenticated user as seen by the live channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: UserId,
    pub username: String,
}

struct Binding {
    identity: Identity,
    outbox: Outbox,
}

/// Connection handle to identity bindings, indexed both ways.
///
/// Not synchronised on its own; [`crate::presence::Presence`] owns it behind
/// the same lock as the room and the online set.
#[derive(Default)]
pub struct SessionRegistry {
    bindings: HashMap<ConnectionId, Binding>,
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
}

impl SessionRegistry {
    /// Returns how many live connections the identity has after binding.
    pub fn bind(&mut self, conn: ConnectionId, identity: Identity, outbox: Outbox) -> ChatResult<usize> {
        if self.bindings.contains_key(&conn) {
            return Err(ChatError::AlreadyBound);
        }

        let connections = self.by_user.entry(identity.id).or_default();
        connections.insert(conn);
        let count = connections.len();
        self.bindings.insert(conn, Binding { identity, outbox });

        Ok(count)
    }

    pub fn unbind(&mut self, conn: ConnectionId) -> Option<Identity> {
        let Binding { identity, .. } = self.bindings.remove(&conn)?;

        if let Some(connections) = self.by_user.get_mut(&identity.id) {
            connections.remove(&conn);
            if connections.is_empty() {
                self.by_user.remove(&identity.id);
            }
        }

        Some(identity)
    }

    pub fn connections_for(&self, user: UserId) -> Vec<ConnectionId> {
        self.by_user
            .get(&user)
            .map(|connections| connections.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn connection_count(&self, user: UserId) -> usize {
        self.by_user.get(&user).map_or(0, HashSet::len)
    }

    pub fn identity_of(&self, conn: ConnectionId) -> Option<&Identity> {
        self.bindings.get(&conn).map(|binding| &binding.identity)
    }

    pub fn outbox(&self, conn: ConnectionId) -> Option<&Outbox> {
        self.bindings.get(&conn).map(|binding| &binding.outbox)
    }
}
