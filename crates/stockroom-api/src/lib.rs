//! REST surface over the engine.

pub mod error;
pub mod follows;
pub mod messages;
pub mod middleware;
pub mod moderation;
pub mod reactions;
pub mod rooms;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post, put},
};

use stockroom_engine::Engine;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub engine: Arc<Engine>,
    pub jwt_secret: String,
    /// Deadline for every engine call made on behalf of a request
    pub request_timeout: Duration,
}

/// All authenticated REST routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/rooms", get(rooms::list_rooms).post(rooms::create_room))
        .route("/rooms/{room_id}", get(rooms::get_room))
        .route("/rooms/{room_id}/presence", get(rooms::presence))
        .route("/rooms/{room_id}/join", post(rooms::join_room))
        .route("/rooms/{room_id}/leave", post(rooms::leave_room))
        .route(
            "/rooms/{room_id}/members/{user_id}",
            put(rooms::add_member).delete(rooms::remove_member),
        )
        .route(
            "/rooms/{room_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/rooms/{room_id}/pins", get(messages::get_pins))
        .route(
            "/messages/{message_id}",
            get(messages::get_message)
                .patch(messages::edit_message)
                .delete(messages::delete_message),
        )
        .route(
            "/messages/{message_id}/pin",
            put(messages::pin_message).delete(messages::unpin_message),
        )
        .route("/messages/{message_id}/reactions", post(reactions::toggle_reaction))
        .route(
            "/messages/{message_id}/flags",
            get(moderation::get_flags).post(moderation::flag_message),
        )
        .route("/messages/{message_id}/review", post(moderation::resolve_review))
        .route("/moderation/queue", get(moderation::review_queue))
        .route("/users/{user_id}/credibility", get(moderation::get_credibility))
        .route(
            "/users/{user_id}/follow",
            put(follows::follow).delete(follows::unfollow),
        )
        .route("/users/{user_id}/follow/alerts", put(follows::set_alerts))
        .route("/users/{user_id}/followers", get(follows::followers))
        .route("/users/{user_id}/following", get(follows::following))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ))
        .with_state(state)
}
