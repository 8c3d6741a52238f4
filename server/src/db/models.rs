/// Database row types.
/// These correspond to the SQLite schema defined in migrations.rs; the
/// recipient sets and member flags are folded in from their join tables.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// User record in the users table (password hash is never loaded here)
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    /// Whether the user shows up in search.
    pub discoverable: bool,
    pub created_at: String,
}

impl User {
    /// Name shown in notification titles.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.username)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
        }
    }
}

impl FromStr for ConversationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Self::Direct),
            "group" => Ok(Self::Group),
            other => Err(format!("unknown conversation kind '{}'", other)),
        }
    }
}

/// Conversation with its persisted member set.
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub kind: ConversationKind,
    pub title: Option<String>,
    pub members: Vec<String>,
    pub admins: Vec<String>,
    pub muted_by: Vec<String>,
    /// Denormalized preview; best-effort cache, not authoritative.
    pub last_message: Option<String>,
    pub last_message_at: Option<String>,
    pub created_at: String,
}

impl Conversation {
    pub fn has_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m == user_id)
    }

    pub fn is_muted_by(&self, user_id: &str) -> bool {
        self.muted_by.iter().any(|m| m == user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    Emoji,
    System,
    Call,
    Location,
    Document,
    Sticker,
    Video,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Emoji => "emoji",
            Self::System => "system",
            Self::Call => "call",
            Self::Location => "location",
            Self::Document => "document",
            Self::Sticker => "sticker",
            Self::Video => "video",
        }
    }
}

impl Default for MessageType {
    fn default() -> Self {
        Self::Text
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "text" => Self::Text,
            "image" => Self::Image,
            "emoji" => Self::Emoji,
            "system" => Self::System,
            "call" => Self::Call,
            "location" => Self::Location,
            "document" => Self::Document,
            "sticker" => Self::Sticker,
            "video" => Self::Video,
            other => return Err(format!("unknown message type '{}'", other)),
        })
    }
}

/// Which recipient set a `message_receipts` row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptKind {
    Delivered,
    Read,
    Deleted,
}

impl ReceiptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Deleted => "deleted",
        }
    }
}

/// Persisted message plus its three recipient sets.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub message_type: MessageType,
    pub body: Option<String>,
    pub emojis: Option<String>,
    pub media_url: Option<String>,
    pub file_name: Option<String>,
    /// Bytes.
    pub file_size: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Tombstone: replacement text once deleted for everyone. One-way.
    pub deleted_for_everyone: Option<String>,
    pub delivered_to: Vec<String>,
    pub read_by: Vec<String>,
    pub deleted_for: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Message {
    pub fn is_tombstoned(&self) -> bool {
        self.deleted_for_everyone.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendRequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl FriendRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

impl FromStr for FriendRequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown friend request status '{}'", other)),
        }
    }
}

/// A friend request with both parties resolved.
#[derive(Debug, Clone, Serialize)]
pub struct FriendRequest {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub status: FriendRequestStatus,
    pub created_at: String,
    pub updated_at: String,
    pub sender: User,
    pub receiver: User,
}

/// `requested` while a request between the two is pending, `accepted` once
/// they are friends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactStatus {
    Requested,
    Accepted,
}

impl ContactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Accepted => "accepted",
        }
    }
}

impl FromStr for ContactStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(Self::Requested),
            "accepted" => Ok(Self::Accepted),
            other => Err(format!("unknown contact status '{}'", other)),
        }
    }
}

/// One side of a contact pair, as seen by its owner.
#[derive(Debug, Clone, Serialize)]
pub struct Contact {
    pub peer: User,
    pub status: ContactStatus,
    pub created_at: String,
}
