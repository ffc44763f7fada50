use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use super::{board_error, written_response, ApiError};
use crate::{middleware::admin::AdminAuth, models::timer::SetTimerRequest, AppState};

/// GET /timer: The authoritative active timer or null.
pub async fn get_timer(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let timer = state.board.active_timer().await.map_err(board_error)?;
    Ok(Json(json!(timer)))
}

/// PUT /admin/timer: Replace the active timer and switch screens to it.
pub async fn set_timer(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Json(body): Json<SetTimerRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let written = state.board.set_timer(body).await.map_err(board_error)?;
    written_response(StatusCode::OK, "timer", written)
}

/// DELETE /admin/timer: Deactivate without replacement.
pub async fn clear_timer(
    State(state): State<AppState>,
    _auth: AdminAuth,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let written = state.board.clear_timer().await.map_err(board_error)?;
    written_response(StatusCode::OK, "deactivated", written)
}
