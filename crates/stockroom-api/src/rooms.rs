use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use stockroom_types::api::{CreateRoomRequest, PresenceResponse};
use stockroom_types::models::Actor;
use stockroom_types::{RoomId, UserId};

use crate::AppState;
use crate::error::{ApiResult, commit, within, within_infallible};

pub async fn list_rooms(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<impl IntoResponse> {
    let rooms = within_infallible(&state, state.engine.list_rooms(&actor)).await?;
    Ok(Json(rooms))
}

/// Admin only.
pub async fn create_room(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CreateRoomRequest>,
) -> ApiResult<impl IntoResponse> {
    let room = commit(&state, move |engine| async move {
        engine
            .create_room(&actor, &req.name, req.kind, req.symbol.as_deref())
            .await
    })
    .await?;
    Ok((StatusCode::CREATED, Json(room)))
}

pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<impl IntoResponse> {
    let room = within(&state, state.engine.room(&actor, &room_id)).await?;
    Ok(Json(room))
}

pub async fn presence(
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<impl IntoResponse> {
    let online_count = within(&state, state.engine.presence_count(&actor, &room_id)).await?;
    Ok(Json(PresenceResponse { online_count }))
}

/// Presence for clients on long-lived HTTP instead of the gateway.
pub async fn join_room(
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<impl IntoResponse> {
    let online_count = commit(&state, move |engine| async move {
        engine.join_room(&room_id, &actor).await
    })
    .await?;
    Ok(Json(PresenceResponse { online_count }))
}

pub async fn leave_room(
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<impl IntoResponse> {
    let online_count = commit(&state, move |engine| async move {
        engine.leave_room(&room_id, &actor.user_id).await
    })
    .await?;
    Ok(Json(PresenceResponse { online_count }))
}

pub async fn add_member(
    State(state): State<AppState>,
    Path((room_id, user_id)): Path<(RoomId, UserId)>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<impl IntoResponse> {
    let added = commit(&state, move |engine| async move {
        engine.add_member(&actor, &room_id, &user_id).await
    })
    .await?;
    Ok(if added { StatusCode::CREATED } else { StatusCode::NO_CONTENT })
}

pub async fn remove_member(
    State(state): State<AppState>,
    Path((room_id, user_id)): Path<(RoomId, UserId)>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<impl IntoResponse> {
    commit(&state, move |engine| async move {
        engine.remove_member(&actor, &room_id, &user_id).await
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}
