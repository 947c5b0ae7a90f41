use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};

use stockroom_engine::EngineError;
use stockroom_types::UserId;
use stockroom_types::api::{FollowResponse, PageQuery, SetAlertsRequest};
use stockroom_types::models::Actor;

use crate::AppState;
use crate::error::{ApiResult, commit, within_infallible};

/// Following twice is a no-op that keeps the alert setting.
pub async fn follow(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<impl IntoResponse> {
    let edge = commit(&state, move |engine| async move {
        engine.follow(&actor, &user_id).await
    })
    .await?;
    Ok(Json(FollowResponse {
        following: true,
        alerts_enabled: edge.alerts_enabled,
    }))
}

pub async fn unfollow(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<impl IntoResponse> {
    commit(&state, move |engine| async move {
        Ok::<_, EngineError>(engine.unfollow(&actor, &user_id).await)
    })
    .await?;
    Ok(Json(FollowResponse {
        following: false,
        alerts_enabled: false,
    }))
}

pub async fn set_alerts(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<SetAlertsRequest>,
) -> ApiResult<impl IntoResponse> {
    let edge = commit(&state, move |engine| async move {
        engine.set_alerts(&actor, &user_id, req.enabled).await
    })
    .await?;
    Ok(Json(FollowResponse {
        following: true,
        alerts_enabled: edge.alerts_enabled,
    }))
}

pub async fn followers(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(query): Query<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = within_infallible(
        &state,
        state.engine.followers(&user_id, query.after.as_ref(), query.limit),
    )
    .await?;
    Ok(Json(page))
}

pub async fn following(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(query): Query<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = within_infallible(
        &state,
        state.engine.following(&user_id, query.after.as_ref(), query.limit),
    )
    .await?;
    Ok(Json(page))
}
