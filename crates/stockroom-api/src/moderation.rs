use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use stockroom_types::api::{
    FlagMessageRequest, FlagResponse, ResolveReviewRequest, ResolveReviewResponse,
};
use stockroom_types::models::Actor;
use stockroom_types::{MessageId, UserId};

use crate::AppState;
use crate::error::{ApiResult, commit, within, within_infallible};

pub async fn flag_message(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<FlagMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let outcome = commit(&state, move |engine| async move {
        engine.flag_message(&actor, message_id, &req.reason).await
    })
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(FlagResponse {
            flag: outcome.flag,
            review_state: outcome.review_state,
        }),
    ))
}

/// Moderator only.
pub async fn get_flags(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<impl IntoResponse> {
    let flags = within(&state, state.engine.flags_for(&actor, message_id)).await?;
    Ok(Json(flags))
}

/// Moderator only.
pub async fn resolve_review(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<ResolveReviewRequest>,
) -> ApiResult<impl IntoResponse> {
    let resolution = commit(&state, move |engine| async move {
        engine.resolve_review(&actor, message_id, req.verdict).await
    })
    .await?;
    Ok(Json(ResolveReviewResponse {
        review_state: resolution.review_state,
        author_credibility: resolution.penalty,
    }))
}

/// Moderator only.
pub async fn review_queue(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<impl IntoResponse> {
    let queue = within(&state, state.engine.review_queue(&actor)).await?;
    Ok(Json(queue))
}

pub async fn get_credibility(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> ApiResult<impl IntoResponse> {
    let credibility = within_infallible(&state, state.engine.credibility(&user_id)).await?;
    Ok(Json(credibility))
}
