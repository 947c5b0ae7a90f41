use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use stockroom_types::api::{EditMessageRequest, MessageQuery, SendMessageRequest};
use stockroom_types::models::Actor;
use stockroom_types::{MessageId, RoomId};

use crate::AppState;
use crate::error::{ApiResult, commit, within};

pub async fn send_message(
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let message = commit(&state, move |engine| async move {
        engine
            .post_message(&actor, &room_id, &req.body, req.idempotency_key)
            .await
    })
    .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// Newest first. Pass `nextCursor` back as `before` for older messages.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Query(query): Query<MessageQuery>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<impl IntoResponse> {
    let page = within(
        &state,
        state.engine.feed(&actor, &room_id, query.before, query.limit),
    )
    .await?;
    Ok(Json(page))
}

pub async fn get_pins(
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<impl IntoResponse> {
    let pins = within(&state, state.engine.pinned(&actor, &room_id)).await?;
    Ok(Json(pins))
}

pub async fn get_message(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<impl IntoResponse> {
    let message = within(&state, state.engine.message(&actor, message_id)).await?;
    Ok(Json(message))
}

pub async fn edit_message(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<EditMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let message = commit(&state, move |engine| async move {
        engine.edit_message(&actor, message_id, &req.body).await
    })
    .await?;
    Ok(Json(message))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<impl IntoResponse> {
    let message = commit(&state, move |engine| async move {
        engine.delete_message(&actor, message_id).await
    })
    .await?;
    Ok(Json(message))
}

pub async fn pin_message(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<impl IntoResponse> {
    let message = commit(&state, move |engine| async move {
        engine.pin_message(&actor, message_id).await
    })
    .await?;
    Ok(Json(message))
}

pub async fn unpin_message(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<impl IntoResponse> {
    let message = commit(&state, move |engine| async move {
        engine.unpin_message(&actor, message_id).await
    })
    .await?;
    Ok(Json(message))
}
