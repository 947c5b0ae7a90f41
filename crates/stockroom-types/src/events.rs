use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, RoomId, SessionId, UserId};
use crate::models::{CredibilityView, Entities, MessageView, ReviewState};

/// Events pushed over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all_fields = "camelCase")]
pub enum GatewayEvent {
    /// Server confirms the session is live
    Ready { session_id: SessionId, user_id: UserId },

    /// Someone came online in, or left, a room
    PresenceChanged {
        room_id: RoomId,
        user_id: UserId,
        delta: i32,
        online_count: usize,
    },

    MessageCreated { message: MessageView },

    /// Body and entities after an edit; reactions and review state are unchanged
    MessageEdited {
        message_id: MessageId,
        room_id: RoomId,
        body: String,
        entities: Entities,
        edited_at: DateTime<Utc>,
    },

    MessageDeleted { message_id: MessageId, room_id: RoomId },

    MessagePinned {
        message_id: MessageId,
        room_id: RoomId,
        pinned: bool,
    },

    ReactionChanged {
        message_id: MessageId,
        emoji: String,
        new_count: usize,
        user_id: UserId,
        user_reacted: bool,
    },

    ReviewStateChanged {
        message_id: MessageId,
        room_id: RoomId,
        review_state: ReviewState,
        needs_review: bool,
    },

    CredibilityChanged { credibility: CredibilityView },

    /// A followed author with alerts enabled posted something
    FollowAlert { message: MessageView },

    NewFollower { follower_id: UserId },

    TypingStarted { room_id: RoomId, user_id: UserId },

    /// A gateway command failed; only the issuing session sees this
    Error { code: String, message: String },

    Pong,
}

/// Who an event is for. Serialized next to the event as `roomId`, `userId`
/// or `sessionId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Scope {
    /// Every session subscribed to the room
    #[serde(rename = "roomId")]
    Room(RoomId),
    /// Every session of the user, regardless of room subscriptions
    #[serde(rename = "userId")]
    User(UserId),
    #[serde(rename = "sessionId")]
    Session(SessionId),
}

/// A routed event, also the exact frame written to sockets:
/// `{"roomId": .., "type": .., "payload": ..}`.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub scope: Scope,
    #[serde(flatten)]
    pub event: GatewayEvent,
}

impl Envelope {
    pub fn room(room_id: RoomId, event: GatewayEvent) -> Self {
        Self {
            scope: Scope::Room(room_id),
            event,
        }
    }

    pub fn user(user_id: UserId, event: GatewayEvent) -> Self {
        Self {
            scope: Scope::User(user_id),
            event,
        }
    }

    pub fn session(session_id: SessionId, event: GatewayEvent) -> Self {
        Self {
            scope: Scope::Session(session_id),
            event,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all_fields = "camelCase")]
pub enum GatewayCommand {
    /// Go online in a room and start receiving its events
    JoinRoom { room_id: RoomId },

    LeaveRoom { room_id: RoomId },

    /// Receive room events without showing up in presence
    Subscribe { room_ids: Vec<RoomId> },

    Unsubscribe { room_ids: Vec<RoomId> },

    StartTyping { room_id: RoomId },

    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_frame_shape() {
        let envelope = Envelope::room(
            RoomId::new("stocks"),
            GatewayEvent::MessageDeleted {
                message_id: MessageId::new(7),
                room_id: RoomId::new("stocks"),
            },
        );
        let value: serde_json::Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(value["roomId"], "stocks");
        assert_eq!(value["type"], "MessageDeleted");
        assert_eq!(value["payload"]["messageId"], "7");
    }

    #[test]
    fn user_scoped_frame_carries_user_id() {
        let envelope = Envelope::user(
            UserId::new("bob"),
            GatewayEvent::NewFollower {
                follower_id: UserId::new("alice"),
            },
        );
        let value: serde_json::Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(value["userId"], "bob");
        assert_eq!(value["payload"]["followerId"], "alice");
        assert!(value.get("roomId").is_none());
    }

    #[test]
    fn commands_parse_from_client_json() {
        let cmd: GatewayCommand =
            serde_json::from_str(r#"{"type":"JoinRoom","payload":{"roomId":"stocks"}}"#).unwrap();
        assert!(
            matches!(cmd, GatewayCommand::JoinRoom { room_id } if room_id.as_str() == "stocks")
        );

        let ping: GatewayCommand = serde_json::from_str(r#"{"type":"Ping"}"#).unwrap();
        assert!(matches!(ping, GatewayCommand::Ping));
    }
}
