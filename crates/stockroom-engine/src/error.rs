use thiserror::Error;

use stockroom_types::models::ReviewState;
use stockroom_types::{MessageId, RoomId, UserId};

pub type Result<T> = std::result::Result<T, EngineError>;

/// Failures reported synchronously by every engine operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Bad input shape or length. The client must fix it; never retried.
    #[error("invalid input: {0}")]
    Validation(String),

    #[error(transparent)]
    NotFound(#[from] NotFound),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error(transparent)]
    Conflict(#[from] Conflict),

    /// Storage or broadcast hiccup. Only idempotent operations may be retried.
    #[error("temporarily unavailable: {0}")]
    Transient(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NotFound {
    #[error("room {0} not found")]
    Room(RoomId),

    #[error("message {0} not found")]
    Message(MessageId),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Conflict {
    #[error("users cannot follow themselves")]
    InvalidSelfFollow,

    #[error("{follower} does not follow {followee}")]
    EdgeNotFound { follower: UserId, followee: UserId },

    #[error("room {0} already exists")]
    RoomExists(RoomId),

    #[error("message {0} was already flagged by this user")]
    AlreadyFlagged(MessageId),

    #[error("authors cannot flag their own messages")]
    CannotFlagOwnMessage,

    #[error("message {message_id} is {state:?} and cannot be resolved")]
    InvalidReviewTransition {
        message_id: MessageId,
        state: ReviewState,
    },

    #[error("message {0} has been removed")]
    MessageRemoved(MessageId),
}

impl EngineError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    pub fn access_denied(reason: impl Into<String>) -> Self {
        Self::AccessDenied(reason.into())
    }

    /// Stable reason code surfaced to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(NotFound::Room(_)) => "room_not_found",
            Self::NotFound(NotFound::Message(_)) => "message_not_found",
            Self::AccessDenied(_) => "access_denied",
            Self::Conflict(conflict) => match conflict {
                Conflict::InvalidSelfFollow => "invalid_self_follow",
                Conflict::EdgeNotFound { .. } => "edge_not_found",
                Conflict::RoomExists(_) => "room_exists",
                Conflict::AlreadyFlagged(_) => "already_flagged",
                Conflict::CannotFlagOwnMessage => "cannot_flag_own_message",
                Conflict::InvalidReviewTransition { .. } => "invalid_review_transition",
                Conflict::MessageRemoved(_) => "message_removed",
            },
            Self::Transient(_) => "transient",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
