//! Domain model shared between the store, the realtime layer and the client
//! core.
//!
//! Row structs (`ConversationRow`, `Participant`, `Message`, `ChatRequest`)
//! mirror what the backend persists. [`Conversation`] is the client-side view
//! of a conversation with the direct/group distinction made explicit.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::types::{normalize_pair, ConversationId, MessageId, RequestId, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A user profile as published by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    /// Unique handle, optional until the user picks one.
    pub username: Option<String>,
    pub fullname: String,
    /// Public URL of the avatar image in the blob store.
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub email: Option<String>,
}

impl User {
    /// Name to show in a conversation header.
    pub fn display_name(&self) -> &str {
        match &self.username {
            Some(u) if self.fullname.is_empty() => u,
            _ => &self.fullname,
        }
    }
}

/// Mutable profile fields. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub fullname: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
}

// ---------------------------------------------------------------------------
// Conversation rows
// ---------------------------------------------------------------------------

/// A conversation exactly as stored by the backend.
///
/// Direct conversations carry a normalized pair (`user_a < user_b`); groups
/// carry a name, an icon and their creator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationRow {
    pub id: ConversationId,
    pub created_at: DateTime<Utc>,
    pub is_group: bool,
    pub user_a: Option<UserId>,
    pub user_b: Option<UserId>,
    pub name: Option<String>,
    pub icon_url: Option<String>,
    pub created_by: Option<UserId>,
}

impl ConversationRow {
    pub fn direct(a: UserId, b: UserId, created_at: DateTime<Utc>) -> Self {
        let (user_a, user_b) = normalize_pair(a, b);
        Self {
            id: ConversationId::new(),
            created_at,
            is_group: false,
            user_a: Some(user_a),
            user_b: Some(user_b),
            name: None,
            icon_url: None,
            created_by: Some(a),
        }
    }

    pub fn group(name: String, creator: UserId, created_at: DateTime<Utc>) -> Self {
        Self {
            id: ConversationId::new(),
            created_at,
            is_group: true,
            user_a: None,
            user_b: None,
            name: Some(name),
            icon_url: None,
            created_by: Some(creator),
        }
    }

    /// For a direct conversation, the party that is not `me`.
    pub fn other_party(&self, me: UserId) -> Option<UserId> {
        if self.is_group {
            return None;
        }
        match (self.user_a, self.user_b) {
            (Some(a), Some(b)) if a == me => Some(b),
            (Some(a), Some(b)) if b == me => Some(a),
            _ => None,
        }
    }

    pub fn is_direct_party(&self, user: UserId) -> bool {
        !self.is_group && (self.user_a == Some(user) || self.user_b == Some(user))
    }
}

/// Group metadata change. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupUpdate {
    pub name: Option<String>,
    pub icon_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Participants
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Member => "member",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "member" => Ok(Role::Member),
            other => Err(ModelError::UnknownRole(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Client-side conversation view
// ---------------------------------------------------------------------------

/// A participant with their profile attached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub user: User,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConversationKind {
    Direct {
        other_user: User,
    },
    Group {
        name: String,
        icon_url: Option<String>,
        created_by: Option<UserId>,
        participants: Vec<Member>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: ConversationKind,
    pub last_message: Option<Message>,
}

impl Conversation {
    /// Timestamp the conversation list is ordered by.
    pub fn activity_at(&self) -> DateTime<Utc> {
        self.last_message
            .as_ref()
            .map(|m| m.created_at)
            .unwrap_or(self.created_at)
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, ConversationKind::Group { .. })
    }

    pub fn role_of(&self, user: UserId) -> Option<Role> {
        match &self.kind {
            ConversationKind::Direct { .. } => None,
            ConversationKind::Group { participants, .. } => participants
                .iter()
                .find(|m| m.user.id == user)
                .map(|m| m.role),
        }
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// File attached to a message. The bytes live in the blob store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub mime_type: String,
    pub file_name: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub reply_to: Option<MessageId>,
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub liked_by: BTreeSet<UserId>,
    pub attachment: Option<Attachment>,
}

impl Message {
    /// Unread from `reader`'s point of view.
    pub fn is_unread_for(&self, reader: UserId) -> bool {
        self.sender_id != reader && self.read_at.is_none()
    }

    /// Deterministic order: creation time, ties broken by id.
    pub fn sort_key(&self) -> (DateTime<Utc>, MessageId) {
        (self.created_at, self.id)
    }
}

/// A message with the sender's profile resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub sender: Option<User>,
}

// ---------------------------------------------------------------------------
// Chat requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Denied,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Denied => "denied",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "accepted" => Ok(RequestStatus::Accepted),
            "denied" => Ok(RequestStatus::Denied),
            other => Err(ModelError::UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatRequest {
    pub id: RequestId,
    pub requester_id: UserId,
    pub recipient_id: UserId,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set only on the transition to `denied`; starts the cooldown clock.
    pub denied_at: Option<DateTime<Utc>>,
}

impl ChatRequest {
    pub fn new(requester_id: UserId, recipient_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id: RequestId::new(),
            requester_id,
            recipient_id,
            status: RequestStatus::Pending,
            created_at: now,
            updated_at: now,
            denied_at: None,
        }
    }

    pub fn involves(&self, user: UserId) -> bool {
        self.requester_id == user || self.recipient_id == user
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user(name: &str) -> User {
        User {
            id: UserId::new(),
            username: Some(name.to_string()),
            fullname: String::new(),
            avatar_url: None,
            bio: None,
            email: None,
        }
    }

    #[test]
    fn direct_row_is_normalized_and_knows_the_other_party() {
        let a = UserId::new();
        let b = UserId::new();
        let now = Utc::now();
        let ab = ConversationRow::direct(a, b, now);
        let ba = ConversationRow::direct(b, a, now);
        assert_eq!((ab.user_a, ab.user_b), (ba.user_a, ba.user_b));
        assert_eq!(ab.other_party(a), Some(b));
        assert_eq!(ab.other_party(b), Some(a));
        assert_eq!(ab.other_party(UserId::new()), None);
    }

    #[test]
    fn activity_falls_back_to_creation_time() {
        let created = Utc::now();
        let mut conv = Conversation {
            id: ConversationId::new(),
            created_at: created,
            kind: ConversationKind::Direct {
                other_user: user("bob"),
            },
            last_message: None,
        };
        assert_eq!(conv.activity_at(), created);

        let later = created + Duration::minutes(5);
        conv.last_message = Some(Message {
            id: MessageId::new(),
            conversation_id: conv.id,
            sender_id: UserId::new(),
            content: "hi".into(),
            created_at: later,
            read_at: None,
            reply_to: None,
            edited_at: None,
            liked_by: BTreeSet::new(),
            attachment: None,
        });
        assert_eq!(conv.activity_at(), later);
    }

    #[test]
    fn role_and_status_parse() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert!("owner".parse::<Role>().is_err());
        assert_eq!(
            "denied".parse::<RequestStatus>().unwrap(),
            RequestStatus::Denied
        );
    }

    #[test]
    fn conversation_serializes_with_type_tag() {
        let conv = Conversation {
            id: ConversationId::new(),
            created_at: Utc::now(),
            kind: ConversationKind::Group {
                name: "crew".into(),
                icon_url: None,
                created_by: None,
                participants: Vec::new(),
            },
            last_message: None,
        };
        let json = serde_json::to_value(&conv).unwrap();
        assert_eq!(json["type"], "group");
        assert_eq!(json["name"], "crew");
    }
}
