pub mod api;
pub mod events;
pub mod ids;
pub mod models;

pub use ids::{FlagId, MessageId, RoomId, SessionId, UserId};
