pub mod announcements;
pub mod display;
pub mod health;
pub mod metrics;
pub mod timers;
pub mod websocket;

use axum::{http::StatusCode, Json};
use serde::Serialize;
use serde_json::{json, Value};

use crate::services::board::{BoardError, Written};

pub type ApiError = (StatusCode, Json<Value>);

fn board_error(e: BoardError) -> ApiError {
    let status = match &e {
        BoardError::Invalid(_) => StatusCode::BAD_REQUEST,
        BoardError::NotFound => StatusCode::NOT_FOUND,
        BoardError::Store(err) => {
            tracing::error!("Record store error: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({ "error": e.to_string() })))
}

/// A write that landed but whose broadcast did not answers 502 with the
/// record attached, so the caller can retry the broadcast without rewriting.
fn written_response<T: Serialize>(
    ok: StatusCode,
    key: &str,
    written: Written<T>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let record = serde_json::to_value(&written.record).unwrap_or(Value::Null);
    match written.broadcast {
        Ok(()) => Ok((ok, Json(json!({ key: record })))),
        Err(e) => Err((
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": e.to_string(), key: record })),
        )),
    }
}
