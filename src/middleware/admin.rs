use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};

use crate::AppState;

/// Extractor that validates the `X-Admin-Key` header against `config.admin_password`.
pub struct AdminAuth;

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get("X-Admin-Key")
            .and_then(|v| v.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "Missing X-Admin-Key header"))?;

        if !is_admin_key(state, key) {
            return Err((StatusCode::UNAUTHORIZED, "Invalid admin key"));
        }

        Ok(AdminAuth)
    }
}

pub fn is_admin_key(state: &AppState, key: &str) -> bool {
    key == state.config.admin_password
}
