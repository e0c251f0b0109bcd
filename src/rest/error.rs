// rest/error.rs: Uniform REST error envelope.
//
// Every failure leaves the server as `{"error": "<message>"}`. The
// outward message is a fixed string per route; whatever detail caused
// the failure goes to the log and never onto the wire.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

#[derive(Debug)]
pub enum ApiError {
    /// 401: the route needs a signed-in caller and there is none.
    Unauthenticated,
    /// 404 with a route-specific message.
    NotFound(&'static str),
    /// 400 with a route-specific message.
    BadRequest(&'static str),
    /// 500 with a fixed outward message.
    Internal(&'static str),
}

impl ApiError {
    /// 500 carrying `public` outward; `detail` is logged here and goes
    /// no further.
    pub fn internal(public: &'static str, detail: impl std::fmt::Display) -> Self {
        error!(err = %detail, "{public}");
        ApiError::Internal(public)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthenticated => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
