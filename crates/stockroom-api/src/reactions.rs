use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};

use stockroom_types::MessageId;
use stockroom_types::api::{ToggleReactionRequest, ToggleReactionResponse};
use stockroom_types::models::Actor;

use crate::AppState;
use crate::error::{ApiResult, commit};

/// Toggle, not increment: sending the same request twice undoes it.
pub async fn toggle_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<ToggleReactionRequest>,
) -> ApiResult<impl IntoResponse> {
    let outcome = commit(&state, move |engine| async move {
        engine.toggle_reaction(&actor, message_id, &req.emoji).await
    })
    .await?;

    Ok(Json(ToggleReactionResponse {
        emoji: outcome.emoji,
        count: outcome.new_count,
        user_reacted: outcome.user_reacted,
    }))
}
