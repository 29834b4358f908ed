//! Per-connection state.
//!
//! ```text
//! Connecting -> Authenticated <-> RoomJoined
//!      |              |               |
//!      +--------------+---------------+--> Disconnected
//! ```
//!
//! Nothing here is persisted; the state lives as long as the socket task.

use doubtroom_shared::types::{ConnectionId, DoubtStatus, Role, RoomId, UserId};

use crate::error::ChatError;

/// Identity claims attached at connection time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticated,
    RoomJoined {
        room_id: RoomId,
        doubt_status: DoubtStatus,
    },
    Disconnected,
}

#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    identity: Option<Identity>,
    state: ConnectionState,
}

impl Connection {
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            identity: None,
            state: ConnectionState::Connecting,
        }
    }

    pub fn authenticated(id: ConnectionId, identity: Identity) -> Self {
        Self {
            id,
            identity: Some(identity),
            state: ConnectionState::Authenticated,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Identity of an open, authenticated connection.
    pub fn require_identity(&self) -> Result<&Identity, ChatError> {
        match (&self.state, &self.identity) {
            (ConnectionState::Connecting | ConnectionState::Disconnected, _) | (_, None) => {
                Err(ChatError::AuthenticationRequired)
            }
            (_, Some(identity)) => Ok(identity),
        }
    }

    pub fn current_room(&self) -> Option<&RoomId> {
        match &self.state {
            ConnectionState::RoomJoined { room_id, .. } => Some(room_id),
            _ => None,
        }
    }

    pub fn doubt_status(&self) -> Option<DoubtStatus> {
        match &self.state {
            ConnectionState::RoomJoined { doubt_status, .. } => Some(*doubt_status),
            _ => None,
        }
    }

    pub fn is_in_room(&self, room_id: &RoomId) -> bool {
        self.current_room() == Some(room_id)
    }

    /// Enter a room, replacing any previous one.
    pub fn enter_room(&mut self, room_id: RoomId, doubt_status: DoubtStatus) -> Result<(), ChatError> {
        self.require_identity()?;
        self.state = ConnectionState::RoomJoined {
            room_id,
            doubt_status,
        };
        Ok(())
    }

    pub fn leave_room(&mut self) {
        if matches!(self.state, ConnectionState::RoomJoined { .. }) {
            self.state = ConnectionState::Authenticated;
        }
    }

    /// Move to the terminal state. Returns the identity and last room the
    /// connection held, once.
    pub fn close(&mut self) -> Option<(Identity, Option<RoomId>)> {
        let previous = std::mem::replace(&mut self.state, ConnectionState::Disconnected);
        let room = match previous {
            ConnectionState::Disconnected => return None,
            ConnectionState::RoomJoined { room_id, .. } => Some(room_id),
            _ => None,
        };
        self.identity.clone().map(|identity| (identity, room))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student() -> Identity {
        Identity {
            user_id: UserId::new("s1"),
            role: Role::Student,
        }
    }

    #[test]
    fn unauthenticated_connection_is_guarded() {
        let mut conn = Connection::new(ConnectionId::new());
        assert_eq!(conn.state(), &ConnectionState::Connecting);
        assert!(matches!(
            conn.require_identity(),
            Err(ChatError::AuthenticationRequired)
        ));
        assert!(conn.enter_room(RoomId::new("r1"), DoubtStatus::Unresolved).is_err());
        assert!(conn.close().is_none());
    }

    #[test]
    fn room_transitions() {
        let mut conn = Connection::authenticated(ConnectionId::new(), student());
        conn.enter_room(RoomId::new("r1"), DoubtStatus::Resolved).unwrap();
        assert!(conn.is_in_room(&RoomId::new("r1")));
        assert_eq!(conn.doubt_status(), Some(DoubtStatus::Resolved));

        conn.enter_room(RoomId::new("r2"), DoubtStatus::Unresolved).unwrap();
        assert_eq!(conn.current_room(), Some(&RoomId::new("r2")));

        conn.leave_room();
        assert_eq!(conn.state(), &ConnectionState::Authenticated);
    }

    #[test]
    fn close_is_terminal_and_reports_once() {
        let mut conn = Connection::authenticated(ConnectionId::new(), student());
        conn.enter_room(RoomId::new("r1"), DoubtStatus::Unresolved).unwrap();

        let (identity, room) = conn.close().unwrap();
        assert_eq!(identity, student());
        assert_eq!(room, Some(RoomId::new("r1")));
        assert!(conn.close().is_none());
        assert!(conn.require_identity().is_err());
    }
}
