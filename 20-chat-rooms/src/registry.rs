//! Clients, rooms, and the memberships binding them.
//!
//! The registry is plain synchronous state. It never performs I/O; operations
//! that change membership hand back the recipient snapshot the caller needs to
//! notify, so the coordinator can fan out after the mutation is complete.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use tracing::{debug, info};

use crate::{
    broadcast::Recipient,
    connection::MessageSink,
    error::RegistryError,
    ids::{ClientId, IdGenerator, RoomSessionId},
    protocol::{MemberInfo, ReceiveText},
};

/// One client's membership in one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSession {
    pub id: RoomSessionId,
    pub client_id: ClientId,
    pub room_handle: String,
    pub session_handle: Option<String>,
}

impl RoomSession {
    pub fn info(&self) -> MemberInfo {
        MemberInfo {
            room_session_id: self.id,
            session_handle: self.session_handle.clone(),
        }
    }
}

struct Client {
    sink: Arc<dyn MessageSink>,
    /// Room handle to the session id held in that room.
    sessions: HashMap<String, RoomSessionId>,
}

struct Room {
    members: BTreeMap<RoomSessionId, RoomSession>,
    session_ids: IdGenerator,
}

impl Room {
    fn new() -> Self {
        Self {
            members: BTreeMap::new(),
            session_ids: IdGenerator::new(),
        }
    }
}

#[derive(Debug)]
pub struct Joined {
    pub session: RoomSession,
    pub room_created: bool,
    /// Membership after the join, the new session included.
    pub members: Vec<MemberInfo>,
    /// Everyone in the room except the joining session.
    pub others: Vec<Recipient>,
}

#[derive(Debug)]
pub struct Departure {
    pub session: RoomSession,
    pub remaining: Vec<Recipient>,
    pub room_removed: bool,
}

pub struct ClosedClient {
    pub sink: Arc<dyn MessageSink>,
    pub departures: Vec<Departure>,
}

#[derive(Debug)]
pub struct TextDelivery {
    pub message: ReceiveText,
    pub recipients: Vec<Recipient>,
}

/// Point-in-time view of the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub clients: usize,
    pub rooms: BTreeMap<String, Vec<MemberInfo>>,
}

impl RegistrySnapshot {
    pub fn member_count(&self, room_handle: &str) -> usize {
        self.rooms.get(room_handle).map_or(0, Vec::len)
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    client_ids: IdGenerator,
    clients: HashMap<ClientId, Client>,
    rooms: HashMap<String, Room>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_client(&mut self, sink: Arc<dyn MessageSink>) -> ClientId {
        let id = self.client_ids.next();
        self.clients.insert(
            id,
            Client {
                sink,
                sessions: HashMap::new(),
            },
        );
        info!(client_id = id, "client connected");
        id
    }

    /// Drops the client and every membership it holds. Unknown ids yield `None`.
    pub fn close_client(&mut self, client_id: ClientId) -> Option<ClosedClient> {
        let client = self.clients.remove(&client_id)?;

        let mut sessions: Vec<(String, RoomSessionId)> = client.sessions.into_iter().collect();
        sessions.sort();
        let departures = sessions
            .into_iter()
            .filter_map(|(handle, session_id)| self.leave_room(client_id, &handle, session_id))
            .collect();

        info!(client_id, "client disconnected");
        Some(ClosedClient {
            sink: client.sink,
            departures,
        })
    }

    pub fn join_room(
        &mut self,
        client_id: ClientId,
        room_handle: &str,
        session_handle: Option<String>,
    ) -> Result<Joined, RegistryError> {
        let client = self
            .clients
            .get(&client_id)
            .ok_or(RegistryError::UnknownClient(client_id))?;
        if client.sessions.contains_key(room_handle) {
            return Err(RegistryError::ClientAlreadyInRoom {
                room: room_handle.to_string(),
            });
        }

        let room_created = !self.rooms.contains_key(room_handle);
        let room = self
            .rooms
            .entry(room_handle.to_string())
            .or_insert_with(Room::new);
        if room_created {
            info!(room = room_handle, "room created");
        }

        let session = RoomSession {
            id: room.session_ids.next(),
            client_id,
            room_handle: room_handle.to_string(),
            session_handle,
        };
        room.members.insert(session.id, session.clone());
        let members = room.members.values().map(RoomSession::info).collect();

        if let Some(client) = self.clients.get_mut(&client_id) {
            client.sessions.insert(room_handle.to_string(), session.id);
        }

        let others = self.recipients(room_handle, |member| member.id != session.id);
        info!(
            client_id,
            room = room_handle,
            session_id = session.id,
            "client joined room"
        );

        Ok(Joined {
            session,
            room_created,
            members,
            others,
        })
    }

    pub fn part_room(
        &mut self,
        client_id: ClientId,
        room_handle: &str,
    ) -> Result<Departure, RegistryError> {
        let client = self
            .clients
            .get_mut(&client_id)
            .ok_or(RegistryError::UnknownClient(client_id))?;
        let Some(session_id) = client.sessions.remove(room_handle) else {
            return Err(RegistryError::ClientDoesNotBelongToAnyRoom {
                room: room_handle.to_string(),
            });
        };

        self.leave_room(client_id, room_handle, session_id)
            .ok_or_else(|| RegistryError::ClientDoesNotBelongToAnyRoom {
                room: room_handle.to_string(),
            })
    }

    /// Resolves the sender's membership and returns who should receive the text.
    ///
    /// The sender is among the recipients and sees its own message echoed.
    pub fn send_text(
        &self,
        client_id: ClientId,
        room_handle: &str,
        content: String,
    ) -> Result<TextDelivery, RegistryError> {
        let client = self
            .clients
            .get(&client_id)
            .ok_or(RegistryError::UnknownClient(client_id))?;
        let session = client
            .sessions
            .get(room_handle)
            .and_then(|id| self.rooms.get(room_handle)?.members.get(id))
            .ok_or_else(|| RegistryError::ClientDoesNotBelongToAnyRoom {
                room: room_handle.to_string(),
            })?;

        let message = ReceiveText {
            content,
            room_handle: room_handle.to_string(),
            room_session_id: session.id,
            session_handle: session.session_handle.clone(),
        };
        Ok(TextDelivery {
            message,
            recipients: self.recipients(room_handle, |_| true),
        })
    }

    pub fn sink(&self, client_id: ClientId) -> Option<Arc<dyn MessageSink>> {
        self.clients
            .get(&client_id)
            .map(|client| Arc::clone(&client.sink))
    }

    pub fn client_ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<_> = self.clients.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn room_exists(&self, room_handle: &str) -> bool {
        self.rooms.contains_key(room_handle)
    }

    pub fn member_count(&self, room_handle: &str) -> usize {
        self.rooms
            .get(room_handle)
            .map_or(0, |room| room.members.len())
    }

    pub fn client_rooms(&self, client_id: ClientId) -> Vec<String> {
        let mut handles: Vec<String> = self
            .clients
            .get(&client_id)
            .map(|client| client.sessions.keys().cloned().collect())
            .unwrap_or_default();
        handles.sort();
        handles
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let rooms = self
            .rooms
            .iter()
            .map(|(handle, room)| {
                let members = room.members.values().map(RoomSession::info).collect();
                (handle.clone(), members)
            })
            .collect();
        RegistrySnapshot {
            clients: self.clients.len(),
            rooms,
        }
    }

    /// Removes the client's session from the room, deleting the room once it is empty.
    fn leave_room(
        &mut self,
        client_id: ClientId,
        room_handle: &str,
        session_id: RoomSessionId,
    ) -> Option<Departure> {
        let room = self.rooms.get_mut(room_handle)?;
        let session = room.members.remove(&session_id)?;

        let room_removed = room.members.is_empty();
        if room_removed {
            self.rooms.remove(room_handle);
            info!(room = room_handle, "room removed");
        }
        debug!(
            client_id,
            room = room_handle,
            session_id,
            "client left room"
        );

        Some(Departure {
            session,
            remaining: self.recipients(room_handle, |_| true),
            room_removed,
        })
    }

    fn recipients(&self, room_handle: &str, keep: impl Fn(&RoomSession) -> bool) -> Vec<Recipient> {
        let Some(room) = self.rooms.get(room_handle) else {
            return Vec::new();
        };
        room.members
            .values()
            .filter(|member| keep(*member))
            .filter_map(|member| {
                let client = self.clients.get(&member.client_id)?;
                Some(Recipient {
                    client_id: member.client_id,
                    room_session_id: member.id,
                    sink: Arc::clone(&client.sink),
                })
            })
            .collect()
    }
}
