// prints-realtime/src/ws/types.rs

//! Identity, group and connection types shared by the registry and sessions.

use crate::events::NotificationEvent;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A unique identifier for a single WebSocket connection.
pub type ConnectionId = Uuid;

/// The id of a user as issued by the authentication provider.
pub type UserId = i64;

/// The sending half of a connection's outbox. The registry holds this; the
/// session owns the receiving half and performs the actual network write.
pub type Outbox = mpsc::UnboundedSender<Arc<NotificationEvent>>;

/// The receiving half of a connection's outbox.
pub type Inbox = mpsc::UnboundedReceiver<Arc<NotificationEvent>>;

/// An authenticated user, as resolved by the external auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: UserId,
    pub display_name: String,
    pub is_secretary: bool,
}

impl Identity {
    pub fn secretary(id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            is_secretary: true,
        }
    }

    pub fn teacher(id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            is_secretary: false,
        }
    }
}

/// The group a connection belongs to for its whole lifetime.
///
/// All secretary connections share one group; every teacher gets a private
/// group keyed by their user id. Renders as `secretary` or `teacher:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupKey {
    Secretary,
    Teacher(UserId),
}

impl GroupKey {
    /// Selects the group for an identity. This is the only authorization rule
    /// on the notification path.
    pub fn for_identity(identity: &Identity) -> Self {
        if identity.is_secretary {
            GroupKey::Secretary
        } else {
            GroupKey::Teacher(identity.id)
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Secretary => f.write_str("secretary"),
            GroupKey::Teacher(id) => write!(f, "teacher:{}", id),
        }
    }
}

/// Error returned when a string is not a valid `GroupKey`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid group key: {0:?}")]
pub struct ParseGroupKeyError(pub String);

impl FromStr for GroupKey {
    type Err = ParseGroupKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "secretary" {
            return Ok(GroupKey::Secretary);
        }
        s.strip_prefix("teacher:")
            .and_then(|id| id.parse::<UserId>().ok())
            .map(GroupKey::Teacher)
            .ok_or_else(|| ParseGroupKeyError(s.to_owned()))
    }
}

/// A registry entry for one live connection: its id and its send capability.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub(crate) outbox: Outbox,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, outbox: Outbox) -> Self {
        Self { id, outbox }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secretary_identity_lands_in_shared_group() {
        let marie = Identity::secretary(1, "Marie Mukamana");
        let other = Identity::secretary(2, "Second Office");
        assert_eq!(GroupKey::for_identity(&marie), GroupKey::Secretary);
        assert_eq!(GroupKey::for_identity(&other), GroupKey::Secretary);
    }

    #[test]
    fn teachers_get_distinct_groups() {
        let seven = GroupKey::for_identity(&Identity::teacher(7, "Jean Baptiste"));
        let nine = GroupKey::for_identity(&Identity::teacher(9, "Alice Uwamahoro"));
        assert_eq!(seven, GroupKey::Teacher(7));
        assert_eq!(nine, GroupKey::Teacher(9));
        assert_ne!(seven, nine);
    }

    #[test]
    fn group_key_parses_its_own_rendering() {
        for key in [GroupKey::Secretary, GroupKey::Teacher(7), GroupKey::Teacher(-3)] {
            assert_eq!(key.to_string().parse::<GroupKey>(), Ok(key));
        }
        assert_eq!(GroupKey::Teacher(7).to_string(), "teacher:7");
    }

    #[test]
    fn malformed_group_keys_are_rejected() {
        for raw in ["", "teacher:", "teacher:abc", "teacher_7", "Secretary"] {
            assert!(raw.parse::<GroupKey>().is_err(), "{raw:?} should not parse");
        }
    }
}
