use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Transport-level connection id assigned by the line gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct SessionOutput {
    pub session_id: SessionId,
    pub text: String,
    /// When true, the output router will close the session's write channel
    /// after delivering this message, causing the TCP connection to shut down.
    pub disconnect: bool,
}

impl SessionOutput {
    pub fn new(session_id: SessionId, text: impl Into<String>) -> Self {
        Self {
            session_id,
            text: text.into(),
            disconnect: false,
        }
    }

    /// Create a final message that will disconnect the session after delivery.
    pub fn with_disconnect(session_id: SessionId, text: impl Into<String>) -> Self {
        Self {
            session_id,
            text: text.into(),
            disconnect: true,
        }
    }
}

/// Namespace for name-derived participant ids.
const PARTICIPANT_NAMESPACE: Uuid = Uuid::from_u128(0x6f0c_1e2a_8b4d_4c3e_9a71_52d0_e8f4_3b19);

/// Stable participant identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub Uuid);

impl ParticipantId {
    /// Identity derived from a display name; the same name always maps to
    /// the same id, so reconnects keep their identity.
    pub fn from_name(name: &str) -> Self {
        Self(Uuid::new_v5(
            &PARTICIPANT_NAMESPACE,
            name.to_ascii_lowercase().as_bytes(),
        ))
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ParticipantId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum PermissionLevel {
    #[default]
    Player,
    Operator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub session_id: SessionId,
    pub permission: PermissionLevel,
    /// Whether this participant sees and is seen by others.
    pub visible: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingName,
    Active(ParticipantId),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum JoinError {
    #[error("unknown session {0:?}")]
    UnknownSession(SessionId),
    #[error("session {0:?} already joined")]
    AlreadyJoined(SessionId),
    #[error("invalid name: {0:?}")]
    InvalidName(String),
    #[error("name already in use: {0}")]
    NameTaken(String),
}

const MAX_NAME_LEN: usize = 16;

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Connected participants, keyed by connection and by identity.
#[derive(Debug, Default)]
pub struct ParticipantRegistry {
    connections: BTreeMap<SessionId, ConnectionState>,
    participants: HashMap<ParticipantId, Participant>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly accepted connection that has not named itself yet.
    pub fn connect(&mut self, session_id: SessionId) {
        self.connections
            .insert(session_id, ConnectionState::AwaitingName);
    }

    /// Bind a name to a pending connection.
    pub fn join(
        &mut self,
        session_id: SessionId,
        name: &str,
        permission: PermissionLevel,
    ) -> Result<Participant, JoinError> {
        let name = name.trim();
        match self.connections.get(&session_id) {
            None => return Err(JoinError::UnknownSession(session_id)),
            Some(ConnectionState::Active(_)) => return Err(JoinError::AlreadyJoined(session_id)),
            Some(ConnectionState::AwaitingName) => {}
        }
        if !valid_name(name) {
            return Err(JoinError::InvalidName(name.to_string()));
        }
        let id = ParticipantId::from_name(name);
        if self.participants.contains_key(&id) {
            return Err(JoinError::NameTaken(name.to_string()));
        }

        let participant = Participant {
            id,
            name: name.to_string(),
            session_id,
            permission,
            visible: true,
        };
        self.connections
            .insert(session_id, ConnectionState::Active(id));
        self.participants.insert(id, participant.clone());
        Ok(participant)
    }

    /// Forget a connection. Returns the participant if it had joined.
    pub fn disconnect(&mut self, session_id: SessionId) -> Option<Participant> {
        match self.connections.remove(&session_id)? {
            ConnectionState::AwaitingName => None,
            ConnectionState::Active(id) => self.participants.remove(&id),
        }
    }

    pub fn state(&self, session_id: SessionId) -> Option<ConnectionState> {
        self.connections.get(&session_id).copied()
    }

    pub fn get(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.get(&id)
    }

    pub fn get_mut(&mut self, id: ParticipantId) -> Option<&mut Participant> {
        self.participants.get_mut(&id)
    }

    pub fn by_session(&self, session_id: SessionId) -> Option<&Participant> {
        match self.connections.get(&session_id)? {
            ConnectionState::Active(id) => self.participants.get(id),
            ConnectionState::AwaitingName => None,
        }
    }

    /// Case-insensitive exact name lookup.
    pub fn find_by_name(&self, name: &str) -> Option<&Participant> {
        self.get(ParticipantId::from_name(name.trim()))
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.participants.contains_key(&id)
    }

    /// Joined participants in connection order.
    pub fn participants(&self) -> Vec<&Participant> {
        self.connections
            .values()
            .filter_map(|state| match state {
                ConnectionState::Active(id) => self.participants.get(id),
                ConnectionState::AwaitingName => None,
            })
            .collect()
    }

    /// All connection ids, joined or not.
    pub fn all_session_ids(&self) -> Vec<SessionId> {
        self.connections.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}
