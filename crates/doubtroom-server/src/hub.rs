//! In-process broadcast service.
//!
//! The hub owns the sender half of every live connection's outbound channel
//! and the transport rooms they have joined. It is constructed once at startup
//! and shared by the real-time handlers and the REST bridge.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use doubtroom_shared::protocol::ServerFrame;
use doubtroom_shared::types::{ConnectionId, RoomId, UserId};

/// Outbound frames buffered per connection before fan-out starts dropping.
pub const OUTBOUND_BUFFER: usize = 64;

struct Peer {
    user_id: Option<UserId>,
    tx: mpsc::Sender<ServerFrame>,
    rooms: HashSet<RoomId>,
}

type Target = (ConnectionId, Option<UserId>, mpsc::Sender<ServerFrame>);

/// Result of a room fan-out.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Fanout {
    pub delivered: usize,
    /// Users with a connection whose buffer was full.
    pub dropped: Vec<UserId>,
}

#[derive(Default)]
struct HubInner {
    peers: HashMap<ConnectionId, Peer>,
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
}

#[derive(Clone, Default)]
pub struct Hub {
    inner: Arc<RwLock<HubInner>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and return the receiver its writer drains.
    pub async fn register(
        &self,
        connection_id: ConnectionId,
        user_id: Option<UserId>,
    ) -> mpsc::Receiver<ServerFrame> {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let mut inner = self.inner.write().await;
        inner.peers.insert(
            connection_id,
            Peer {
                user_id,
                tx,
                rooms: HashSet::new(),
            },
        );
        debug!(conn = %connection_id, peers = inner.peers.len(), "Connection registered");
        rx
    }

    /// Drop a connection and its room memberships. Empty rooms are removed.
    pub async fn unregister(&self, connection_id: ConnectionId) {
        let mut inner = self.inner.write().await;
        let Some(peer) = inner.peers.remove(&connection_id) else {
            return;
        };
        for room in peer.rooms {
            remove_from_room(&mut inner.rooms, &room, connection_id);
        }
        debug!(conn = %connection_id, peers = inner.peers.len(), "Connection unregistered");
    }

    /// Add the connection to a room. Returns `false` for unknown connections.
    pub async fn join(&self, connection_id: ConnectionId, room_id: &RoomId) -> bool {
        let mut inner = self.inner.write().await;
        let Some(peer) = inner.peers.get_mut(&connection_id) else {
            return false;
        };
        peer.rooms.insert(room_id.clone());
        let members = inner.rooms.entry(room_id.clone()).or_default();
        members.insert(connection_id);
        info!(conn = %connection_id, room = %room_id, members = members.len(), "Joined room");
        true
    }

    /// Leave every room the connection occupies and return them.
    pub async fn leave_all(&self, connection_id: ConnectionId) -> Vec<RoomId> {
        let mut inner = self.inner.write().await;
        let rooms: Vec<RoomId> = match inner.peers.get_mut(&connection_id) {
            Some(peer) => peer.rooms.drain().collect(),
            None => return Vec::new(),
        };
        for room in &rooms {
            remove_from_room(&mut inner.rooms, room, connection_id);
        }
        rooms
    }

    pub async fn room_members(&self, room_id: &RoomId) -> Vec<ConnectionId> {
        self.inner
            .read()
            .await
            .rooms
            .get(room_id)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether any connection other than `except` is joined to the room.
    pub async fn has_other_member(&self, room_id: &RoomId, except: ConnectionId) -> bool {
        self.inner
            .read()
            .await
            .rooms
            .get(room_id)
            .is_some_and(|m| m.iter().any(|c| *c != except))
    }

    /// Deliver a frame to one connection, waiting for buffer space.
    pub async fn emit_to(&self, connection_id: ConnectionId, frame: ServerFrame) -> bool {
        let tx = {
            let inner = self.inner.read().await;
            match inner.peers.get(&connection_id) {
                Some(peer) => peer.tx.clone(),
                None => return false,
            }
        };
        tx.send(frame).await.is_ok()
    }

    /// Deliver a frame to every connection of a user. Returns how many
    /// connections accepted it.
    pub async fn emit_to_user(&self, user_id: &UserId, frame: ServerFrame) -> usize {
        let targets: Vec<Target> = {
            let inner = self.inner.read().await;
            inner
                .peers
                .iter()
                .filter(|(_, p)| p.user_id.as_ref() == Some(user_id))
                .map(|(id, p)| (*id, p.user_id.clone(), p.tx.clone()))
                .collect()
        };
        fan_out(targets, frame).delivered
    }

    /// Deliver a frame to every connection joined to the room, the sender's
    /// included. Slow consumers whose buffer is full miss the frame.
    pub async fn broadcast(&self, room_id: &RoomId, frame: ServerFrame) -> usize {
        self.broadcast_tracked(room_id, frame).await.delivered
    }

    /// Like [`Hub::broadcast`], but reports which users missed the frame so
    /// the caller can fall back to another delivery path.
    pub async fn broadcast_tracked(&self, room_id: &RoomId, frame: ServerFrame) -> Fanout {
        let targets: Vec<Target> = {
            let inner = self.inner.read().await;
            let Some(members) = inner.rooms.get(room_id) else {
                return Fanout::default();
            };
            members
                .iter()
                .filter_map(|id| {
                    inner
                        .peers
                        .get(id)
                        .map(|p| (*id, p.user_id.clone(), p.tx.clone()))
                })
                .collect()
        };
        fan_out(targets, frame)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.peers.len()
    }
}

fn remove_from_room(
    rooms: &mut HashMap<RoomId, HashSet<ConnectionId>>,
    room_id: &RoomId,
    connection_id: ConnectionId,
) {
    let now_empty = match rooms.get_mut(room_id) {
        Some(members) => {
            members.remove(&connection_id);
            members.is_empty()
        }
        None => false,
    };
    if now_empty {
        rooms.remove(room_id);
        debug!(room = %room_id, "Removed empty room");
    }
}

fn fan_out(targets: Vec<Target>, frame: ServerFrame) -> Fanout {
    let mut result = Fanout::default();
    for (id, user_id, tx) in targets {
        match tx.try_send(frame.clone()) {
            Ok(()) => result.delivered += 1,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(conn = %id, event = %frame.event, "Dropping frame for slow connection");
                if let Some(user) = user_id {
                    if !result.dropped.contains(&user) {
                        result.dropped.push(user);
                    }
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
    result
}
