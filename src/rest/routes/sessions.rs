// rest/routes/sessions.rs: Named chat sessions.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::rest::caller_identity;
use crate::rest::error::ApiError;
use crate::store::NEW_CHAT_TITLE;
use crate::AppContext;

/// POST /sessions: create a fresh session titled "New Chat" and return it.
pub async fn create_session(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let identity = caller_identity(&ctx, &headers)
        .await
        .map_err(|e| ApiError::internal("Failed to create session", e))?
        .ok_or(ApiError::Unauthenticated)?;

    let user = ctx
        .store
        .find_or_create_user(&identity.email)
        .await
        .map_err(|e| ApiError::internal("Failed to create session", e))?;

    let session = ctx
        .store
        .create_session(&user.id, NEW_CHAT_TITLE)
        .await
        .map_err(|e| ApiError::internal("Failed to create session", e))?;

    Ok(Json(json!({
        "id": session.id,
        "title": session.title,
        "timestamp": session.timestamp,
    })))
}

/// DELETE /sessions/{id}: ownership-checked delete. A session id that
/// exists under another account is indistinguishable from one that never
/// existed.
pub async fn delete_session(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let identity = caller_identity(&ctx, &headers)
        .await
        .map_err(|e| ApiError::internal("Failed to delete session", e))?
        .ok_or(ApiError::Unauthenticated)?;

    let user = ctx
        .store
        .get_user_by_email(&identity.email)
        .await
        .map_err(|e| ApiError::internal("Failed to delete session", e))?
        .ok_or(ApiError::NotFound("Session not found"))?;

    let deleted = ctx
        .store
        .delete_session(&user.id, &id)
        .await
        .map_err(|e| ApiError::internal("Failed to delete session", e))?;
    if !deleted {
        return Err(ApiError::NotFound("Session not found"));
    }

    Ok(Json(json!({ "message": "Session deleted successfully" })))
}
