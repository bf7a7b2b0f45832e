use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use super::booking::UserId;

/// Header set by the upstream authentication layer.
pub const USER_HEADER: &str = "x-user-id";

/// The authenticated user a request acts on behalf of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActingUser(pub UserId);

#[axum::async_trait]
impl<S> FromRequestParts<S> for ActingUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| ActingUser(UserId(value.to_string())))
            .ok_or_else(|| {
                let payload = json!({ "error": format!("missing {USER_HEADER} header") });
                (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
            })
    }
}
