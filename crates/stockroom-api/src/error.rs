use std::future::Future;
use std::sync::Arc;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, warn};

use stockroom_engine::{Engine, EngineError, Result as EngineResult};
use stockroom_types::api::ErrorResponse;

use crate::AppState;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub EngineError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::AccessDenied(_) => StatusCode::FORBIDDEN,
            EngineError::Conflict(_) => StatusCode::CONFLICT,
            EngineError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self.0 {
            EngineError::Transient(detail) => {
                error!("Transient failure: {}", detail);
                "temporarily unavailable, try again".to_string()
            }
            other => other.to_string(),
        };
        if status != StatusCode::SERVICE_UNAVAILABLE {
            warn!("Request failed ({}): {}", status, message);
        }

        let body = ErrorResponse {
            error: self.0.code().to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Run a read under the server-side deadline. Reads change nothing, so
/// abandoning one at the deadline is harmless.
pub async fn within<T>(
    state: &AppState,
    op: impl Future<Output = EngineResult<T>>,
) -> ApiResult<T> {
    match tokio::time::timeout(state.request_timeout, op).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(_) => Err(EngineError::Transient(format!(
            "request exceeded {}ms",
            state.request_timeout.as_millis()
        ))
        .into()),
    }
}

/// Like [`within`] for reads that cannot fail on their own.
pub async fn within_infallible<T>(state: &AppState, op: impl Future<Output = T>) -> ApiResult<T> {
    within(state, async { Ok(op.await) }).await
}

/// Run a state-changing engine call to completion on its own task.
///
/// A write commits and then does follow-up work (events, alerts,
/// credibility). Nothing may stop it in between, so neither the deadline
/// nor a client hanging up cancels the task, and the response always
/// carries the write's real outcome. Overrunning the deadline is logged.
pub async fn commit<T, F, Fut>(state: &AppState, op: F) -> ApiResult<T>
where
    F: FnOnce(Arc<Engine>) -> Fut,
    Fut: Future<Output = EngineResult<T>> + Send + 'static,
    T: Send + 'static,
{
    let mut task = tokio::spawn(op(state.engine.clone()));
    let joined = match tokio::time::timeout(state.request_timeout, &mut task).await {
        Ok(joined) => joined,
        Err(_) => {
            warn!(
                "Write overran {}ms, waiting for it to finish",
                state.request_timeout.as_millis()
            );
            task.await
        }
    };

    match joined {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => Err(EngineError::Transient(format!("engine task failed: {}", e)).into()),
    }
}
