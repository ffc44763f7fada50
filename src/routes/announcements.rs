use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use super::{board_error, written_response, ApiError};
use crate::{
    middleware::admin::AdminAuth,
    models::announcement::AnnouncementRequest,
    AppState,
};

/// GET /announcements: Public, newest first.
pub async fn list_announcements(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let rows = state.board.list_announcements().await.map_err(board_error)?;
    Ok(Json(json!(rows)))
}

/// POST /admin/announcements
pub async fn create_announcement(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Json(body): Json<AnnouncementRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let written = state
        .board
        .post_announcement(body)
        .await
        .map_err(board_error)?;
    written_response(StatusCode::CREATED, "announcement", written)
}

/// PUT /admin/announcements/{id}: Full replace of the editable fields.
pub async fn update_announcement(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Path(id): Path<Uuid>,
    Json(body): Json<AnnouncementRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let written = state
        .board
        .update_announcement(id, body)
        .await
        .map_err(board_error)?;
    written_response(StatusCode::OK, "announcement", written)
}

/// DELETE /admin/announcements/{id}
pub async fn delete_announcement(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let written = state
        .board
        .delete_announcement(id)
        .await
        .map_err(board_error)?;
    written_response(StatusCode::OK, "deleted", written)
}
