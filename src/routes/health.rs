use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::AppState;

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let db = sqlx::query("SELECT 1")
        .execute(state.board.store().pool())
        .await
        .map(|_| "connected".to_string());
    let redis = state
        .board
        .feed()
        .bus()
        .ping()
        .await
        .map(|_| "connected".to_string());

    match (db, redis) {
        (Ok(db), Ok(redis)) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "db": db, "redis": redis })),
        ),
        (db, redis) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "error",
                "db": db.unwrap_or_else(|e| e.to_string()),
                "redis": redis.unwrap_or_else(|e| e.to_string()),
            })),
        ),
    }
}
