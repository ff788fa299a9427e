//! Room membership and who is online.
//!
//! The registry, the room and the online set only change together under one
//! lock, and presence events are queued while that lock is held. Everyone
//! therefore sees `user_joined`/`user_left`/`online_users` in the order the
//! mutations happened, and an `online_users` frame always describes the state
//! right after the change that triggered it.

use std::{
    collections::{BTreeSet, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tracing::{debug, info};

use crate::{
    error::ChatResult,
    events::ServerEvent,
    registry::{ConnectionId, Identity, Outbox, SessionRegistry},
    store::UserId,
};

/// Connections that receive room broadcasts.
#[derive(Debug, Default)]
pub struct Room {
    members: HashSet<ConnectionId>,
}

impl Room {
    pub fn insert(&mut self, conn: ConnectionId) -> bool {
        self.members.insert(conn)
    }

    pub fn remove(&mut self, conn: ConnectionId) -> bool {
        self.members.remove(&conn)
    }

    pub fn members(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.members.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Default)]
struct PresenceState {
    registry: SessionRegistry,
    room: Room,
    online: BTreeSet<String>,
}

impl PresenceState {
    fn online_users(&self) -> Vec<String> {
        self.online.iter().cloned().collect()
    }

    fn send(&self, conn: ConnectionId, event: ServerEvent) -> bool {
        // a closed outbox means the connection is on its way out
        self.registry
            .outbox(conn)
            .is_some_and(|outbox| outbox.send(event).is_ok())
    }

    fn broadcast(&self, event: &ServerEvent) -> usize {
        self.room
            .members()
            .filter(|&conn| self.send(conn, event.clone()))
            .count()
    }
}

#[derive(Clone, Default)]
pub struct Presence {
    state: Arc<Mutex<PresenceState>>,
}

impl Presence {
    fn lock(&self) -> MutexGuard<'_, PresenceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Binds `conn` to `identity` and adds it to the room.
    ///
    /// Returns `true` when this was the identity's first live connection, in
    /// which case `user_joined` and `online_users` went out to the whole room.
    /// Later connections only get an `online_users` snapshot of their own.
    pub fn join(&self, conn: ConnectionId, identity: Identity, outbox: Outbox) -> ChatResult<bool> {
        let mut state = self.lock();
        let username = identity.username.clone();
        let count = state.registry.bind(conn, identity, outbox)?;
        state.room.insert(conn);

        if count > 1 {
            debug!("{conn} joined as @{username} ({count} connections)");
            let online = state.online_users();
            state.send(conn, ServerEvent::OnlineUsers(online));
            return Ok(false);
        }

        state.online.insert(username.clone());
        info!("@{username} is online");
        state.broadcast(&ServerEvent::UserJoined { username });
        state.broadcast(&ServerEvent::OnlineUsers(state.online_users()));

        Ok(true)
    }

    /// Unbinds `conn` and drops it from the room. Safe to call more than once.
    ///
    /// Returns the identity if this was its last live connection.
    pub fn leave(&self, conn: ConnectionId) -> Option<Identity> {
        let mut state = self.lock();
        state.room.remove(conn);
        let identity = state.registry.unbind(conn)?;

        let remaining = state.registry.connection_count(identity.id);
        if remaining > 0 {
            debug!("{conn} left, @{} still has {remaining} connections", identity.username);
            return None;
        }

        state.online.remove(&identity.username);
        info!("@{} is offline", identity.username);
        state.broadcast(&ServerEvent::UserLeft { username: identity.username.clone() });
        state.broadcast(&ServerEvent::OnlineUsers(state.online_users()));

        Some(identity)
    }

    pub fn identity_of(&self, conn: ConnectionId) -> Option<Identity> {
        self.lock().registry.identity_of(conn).cloned()
    }

    /// Queues `event` on every connection in the room.
    pub fn broadcast(&self, event: ServerEvent) -> usize {
        self.lock().broadcast(&event)
    }

    /// Queues `event` on every live connection of `user` and nobody else.
    pub fn send_to_user(&self, user: UserId, event: ServerEvent) -> usize {
        let state = self.lock();
        state
            .registry
            .connections_for(user)
            .into_iter()
            .filter(|&conn| state.send(conn, event.clone()))
            .count()
    }

    pub fn online_users(&self) -> Vec<String> {
        self.lock().online_users()
    }

    pub fn is_online(&self, username: &str) -> bool {
        self.lock().online.contains(username)
    }

    pub fn room_size(&self) -> usize {
        self.lock().room.len()
    }
}
