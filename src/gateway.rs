use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::{RoomPayload, WsServerMessage};

/// Process-unique id of one WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

struct Connection {
    user_id: Uuid,
    tx: mpsc::UnboundedSender<WsServerMessage>,
    rooms: HashSet<Uuid>,
}

/// Room-based fanout for connected clients. Holds no durable state: entries
/// exist from connect to disconnect, and delivery is best-effort.
///
/// Lock discipline: a `connections` entry and a `rooms` entry are never held
/// at the same time.
#[derive(Clone, Default)]
pub struct RealtimeGateway {
    connections: Arc<DashMap<ConnectionId, Connection>>,
    /// chat_id -> subscribed connections
    rooms: Arc<DashMap<Uuid, HashSet<ConnectionId>>>,
    /// user_id -> open connections
    users: Arc<DashMap<Uuid, HashSet<ConnectionId>>>,
    next_id: Arc<AtomicU64>,
}

impl RealtimeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Events for it are pushed into `tx`. The flag is
    /// true when this is the user's only open connection.
    pub fn connect(
        &self,
        user_id: Uuid,
        tx: mpsc::UnboundedSender<WsServerMessage>,
    ) -> (ConnectionId, bool) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.connections.insert(
            id,
            Connection {
                user_id,
                tx,
                rooms: HashSet::new(),
            },
        );
        let mut open = self.users.entry(user_id).or_default();
        open.insert(id);
        (id, open.len() == 1)
    }

    /// Drop the connection and purge it from every room. Returns the owning
    /// user and whether that was their last open connection.
    pub fn disconnect(&self, id: ConnectionId) -> Option<(Uuid, bool)> {
        let (_, conn) = self.connections.remove(&id)?;

        for chat_id in &conn.rooms {
            if let Some(mut members) = self.rooms.get_mut(chat_id) {
                members.remove(&id);
            }
            self.rooms.remove_if(chat_id, |_, members| members.is_empty());
        }

        // Removal and the emptiness check happen under one entry lock
        let was_last = self
            .users
            .remove_if_mut(&conn.user_id, |_, open| {
                open.remove(&id);
                open.is_empty()
            })
            .is_some();

        Some((conn.user_id, was_last))
    }

    /// Subscribe the connection to a chat room. No membership check happens
    /// here; callers decide who may join.
    pub fn join(&self, id: ConnectionId, chat_id: Uuid) -> bool {
        match self.connections.get_mut(&id) {
            Some(mut conn) => {
                conn.rooms.insert(chat_id);
            }
            None => return false,
        }
        self.rooms.entry(chat_id).or_default().insert(id);
        true
    }

    pub fn leave(&self, id: ConnectionId, chat_id: Uuid) -> bool {
        let was_joined = match self.connections.get_mut(&id) {
            Some(mut conn) => conn.rooms.remove(&chat_id),
            None => return false,
        };
        if let Some(mut members) = self.rooms.get_mut(&chat_id) {
            members.remove(&id);
        }
        self.rooms.remove_if(&chat_id, |_, members| members.is_empty());
        was_joined
    }

    /// Unsubscribe every connection of `user_id` from the room and send each
    /// one a `left` frame. Used when the user stops being a member.
    pub fn evict_user(&self, chat_id: Uuid, user_id: Uuid) -> usize {
        let open: Vec<ConnectionId> = match self.users.get(&user_id) {
            Some(open) => open.iter().copied().collect(),
            None => return 0,
        };

        let mut evicted = 0;
        for id in open {
            if self.leave(id, chat_id) {
                self.send_to(id, WsServerMessage::Left { chat_id });
                evicted += 1;
            }
        }
        evicted
    }

    pub fn is_joined(&self, id: ConnectionId, chat_id: Uuid) -> bool {
        self.connections
            .get(&id)
            .is_some_and(|conn| conn.rooms.contains(&chat_id))
    }

    /// Relay a chat message to everyone else in the room.
    pub fn relay_message(&self, from: ConnectionId, payload: RoomPayload) -> usize {
        let chat_id = payload.chat_id;
        self.broadcast(chat_id, WsServerMessage::ReceiveMessage(payload), |id, _| id != from)
    }

    /// Relay a typing indicator to everyone else in the room.
    pub fn relay_typing(&self, from: ConnectionId, payload: RoomPayload, is_typing: bool) -> usize {
        let chat_id = payload.chat_id;
        let event = if is_typing {
            WsServerMessage::Typing(payload)
        } else {
            WsServerMessage::StopTyping(payload)
        };
        self.broadcast(chat_id, event, |id, _| id != from)
    }

    /// Server-originated event to a room, optionally skipping every
    /// connection of one user.
    pub fn publish(&self, chat_id: Uuid, event: WsServerMessage, exclude_user: Option<Uuid>) -> usize {
        self.broadcast(chat_id, event, |_, user_id| Some(user_id) != exclude_user)
    }

    /// Push directly to one connection.
    pub fn send_to(&self, id: ConnectionId, event: WsServerMessage) -> bool {
        self.connections
            .get(&id)
            .is_some_and(|conn| conn.tx.send(event).is_ok())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn user_connection_count(&self, user_id: Uuid) -> usize {
        self.users.get(&user_id).map(|open| open.len()).unwrap_or(0)
    }

    pub fn room_size(&self, chat_id: Uuid) -> usize {
        self.rooms.get(&chat_id).map(|members| members.len()).unwrap_or(0)
    }

    fn broadcast<F>(&self, chat_id: Uuid, event: WsServerMessage, include: F) -> usize
    where
        F: Fn(ConnectionId, Uuid) -> bool,
    {
        let members: Vec<ConnectionId> = match self.rooms.get(&chat_id) {
            Some(members) => members.iter().copied().collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for id in members {
            let Some(conn) = self.connections.get(&id) else {
                continue;
            };
            if !include(id, conn.user_id) {
                continue;
            }
            // Closed receivers are reaped on disconnect
            if conn.tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}
