// rest/routes/ai.rs: One-shot completion, nothing persisted.

use axum::{extract::State, http::HeaderMap, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::gateway::GatewayError;
use crate::rest::caller_identity;
use crate::rest::error::ApiError;
use crate::AppContext;

#[derive(Deserialize)]
pub struct CompleteRequest {
    pub message: String,
}

/// POST /ai: run the message through the completion provider with the
/// caller's stored history as context. Anonymous callers are served with
/// an empty history. No message is written anywhere.
pub async fn complete(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(body): Json<CompleteRequest>,
) -> Result<Json<Value>, ApiError> {
    let identity = caller_identity(&ctx, &headers)
        .await
        .map_err(|e| ApiError::internal("Failed to process with AI", e))?;

    let email = identity.as_ref().map(|i| i.email.as_str());
    let reply = ctx
        .gateway
        .complete(email, &body.message)
        .await
        .map_err(|e| match e {
            GatewayError::Upstream(e) => ApiError::internal("Failed to get AI response", e),
            GatewayError::Persistence(e) => ApiError::internal("Failed to process with AI", e),
        })?;

    Ok(Json(json!({ "response": reply })))
}
