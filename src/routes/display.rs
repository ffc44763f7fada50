use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::ApiError;
use crate::{middleware::admin::AdminAuth, models::display::SetDisplayRequest, AppState};

/// PUT /admin/display: Broadcast a display change to every screen.
pub async fn set_display(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Json(body): Json<SetDisplayRequest>,
) -> Result<Json<Value>, ApiError> {
    match state.board.request_display(body.display).await {
        Ok(()) => {
            info!("Display change to {} broadcast", body.display);
            Ok(Json(json!({ "display": body.display })))
        }
        Err(e) => {
            warn!("Display change to {} not broadcast: {}", body.display, e);
            Err((
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": e.to_string(), "display": body.display })),
            ))
        }
    }
}
