use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{FlagId, MessageId, RoomId, UserId};

// -- Identity --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Moderator,
    Admin,
}

impl Role {
    pub fn can_moderate(self) -> bool {
        matches!(self, Role::Moderator | Role::Admin)
    }

    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// The caller of an operation, as vouched for by the auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub username: String,
    pub role: Role,
    pub verified: bool,
}

impl Actor {
    pub fn new(user_id: impl Into<UserId>, username: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            role,
            verified: false,
        }
    }

    pub fn verified(mut self) -> Self {
        self.verified = true;
        self
    }

    pub fn can_moderate(&self) -> bool {
        self.role.can_moderate()
    }
}

// -- Rooms --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    General,
    Ticker,
    Private,
    Vip,
}

impl std::str::FromStr for RoomKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "general" => Ok(Self::General),
            "ticker" => Ok(Self::Ticker),
            "private" => Ok(Self::Private),
            "vip" => Ok(Self::Vip),
            other => Err(format!("unknown room kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: String,
    pub kind: RoomKind,
    pub symbol: Option<String>,
    pub requires_verification: bool,
    pub member_count: usize,
    pub online_count: usize,
}

// -- Messages --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mention {
    /// Username as written, without the sigil.
    pub raw: String,
    /// `None` when the username is unknown; the mention stays plain text.
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entities {
    pub mentions: Vec<Mention>,
    pub tickers: Vec<String>,
    pub hashtags: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewState {
    #[default]
    Clean,
    Flagged,
    Upheld,
    Dismissed,
}

impl ReviewState {
    /// Content stays hidden once a moderator upholds a flag.
    pub fn hides_content(self) -> bool {
        self == ReviewState::Upheld
    }

    pub fn needs_review(self) -> bool {
        self == ReviewState::Flagged
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagResolution {
    Pending,
    Upheld,
    Dismissed,
}

/// A moderator's ruling on a flagged message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Upheld,
    Dismissed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewFlag {
    pub id: FlagId,
    pub message_id: MessageId,
    pub reporter_id: UserId,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub resolution: FlagResolution,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewCase {
    pub message_id: MessageId,
    pub room_id: RoomId,
    pub author_id: UserId,
    pub review_state: ReviewState,
    pub flags: Vec<ReviewFlag>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: usize,
    pub user_ids: Vec<UserId>,
}

/// Outward shape of a message. Bodies of removed messages never leave the
/// server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    pub room_id: RoomId,
    pub author_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub pinned: bool,
    pub tombstoned: bool,
    pub entities: Entities,
    pub review_state: ReviewState,
    pub needs_review: bool,
    pub sentiment: Option<f32>,
    pub reactions: Vec<ReactionGroup>,
}

// -- Credibility --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredibilityView {
    pub user_id: UserId,
    pub score: f64,
    pub sample_count: u32,
    pub last_updated: Option<DateTime<Utc>>,
    pub community_favorite: bool,
}

// -- Social graph --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowEdge {
    pub follower_id: UserId,
    pub followee_id: UserId,
    pub alerts_enabled: bool,
}

/// A slice of an ordered listing; pass `next_cursor` back to continue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}
