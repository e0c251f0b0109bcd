// rest/routes/chats.rs: Flat message history on the implicit session.
//
// This is the surface the single-thread frontend speaks: one stream of
// messages per account, no session ids on the wire.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use crate::rest::caller_identity;
use crate::rest::error::ApiError;
use crate::store::{MessageRow, UserRow, PRIMARY_SESSION_ID};
use crate::AppContext;

fn chat_json(row: &MessageRow) -> Value {
    json!({
        "id": row.id,
        "content": row.content,
        "role": row.role,
        "timestamp": row.timestamp,
    })
}

#[derive(Deserialize)]
pub struct ListChatsQuery {
    /// Serve only the most recent N messages (still oldest first).
    pub limit: Option<u32>,
}

/// GET /chats: the caller's message history, oldest first. Anonymous
/// callers get `{"chats": []}`, not an error.
pub async fn list_chats(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<ListChatsQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let identity = caller_identity(&ctx, &headers)
        .await
        .map_err(|e| ApiError::internal("Failed to get chats", e))?;

    let Some(identity) = identity else {
        return Ok(Json(json!({ "chats": [] })));
    };

    let user = ctx
        .store
        .find_or_create_user(&identity.email)
        .await
        .map_err(|e| ApiError::internal("Failed to get chats", e))?;

    let rows = match query.limit {
        Some(limit) => {
            ctx.store
                .recent_messages(&user.id, PRIMARY_SESSION_ID, limit)
                .await
        }
        None => ctx.store.list_messages(&user.id, PRIMARY_SESSION_ID).await,
    }
    .map_err(|e| ApiError::internal("Failed to get chats", e))?;

    let chats: Vec<Value> = rows.iter().map(chat_json).collect();
    Ok(Json(json!({ "chats": chats })))
}

#[derive(Deserialize)]
pub struct SaveChatRequest {
    pub content: String,
    pub role: String,
    /// Explicit account the message belongs to; overrides the caller's own.
    #[serde(default)]
    pub email: Option<String>,
}

/// POST /chats: append one message to the implicit session.
///
/// The account is picked by the body email when present, else the
/// caller's identity. Only a body email may create a missing account;
/// a signed-in caller the store has never seen gets 404 (longstanding
/// client contract).
pub async fn save_chat(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(body): Json<SaveChatRequest>,
) -> Result<Json<Value>, ApiError> {
    let identity = caller_identity(&ctx, &headers)
        .await
        .map_err(|e| ApiError::internal("Failed to save chat", e))?;

    let role = body
        .role
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid role"))?;

    let user: Option<UserRow> = match (&body.email, &identity) {
        (Some(email), _) => Some(
            ctx.store
                .find_or_create_user(email)
                .await
                .map_err(|e| ApiError::internal("Failed to save chat", e))?,
        ),
        (None, Some(identity)) => ctx
            .store
            .get_user_by_email(&identity.email)
            .await
            .map_err(|e| ApiError::internal("Failed to save chat", e))?,
        (None, None) => None,
    };
    let Some(user) = user else {
        return Err(ApiError::NotFound("User not found"));
    };

    ctx.store
        .ensure_primary_session(&user.id)
        .await
        .map_err(|e| ApiError::internal("Failed to save chat", e))?;

    let row = ctx
        .store
        .append_message(&user.id, PRIMARY_SESSION_ID, role, &body.content)
        .await
        .map_err(|e| ApiError::internal("Failed to save chat", e))?;

    Ok(Json(json!({ "chat": chat_json(&row) })))
}

/// DELETE /chats: drop every message the caller owns, across all
/// sessions. The sessions themselves stay.
pub async fn delete_chats(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let identity = caller_identity(&ctx, &headers)
        .await
        .map_err(|e| ApiError::internal("Failed to delete chats", e))?
        .ok_or(ApiError::Unauthenticated)?;

    let user = ctx
        .store
        .get_user_by_email(&identity.email)
        .await
        .map_err(|e| ApiError::internal("Failed to delete chats", e))?
        .ok_or(ApiError::NotFound("User not found"))?;

    let deleted = ctx
        .store
        .delete_user_messages(&user.id)
        .await
        .map_err(|e| ApiError::internal("Failed to delete chats", e))?;
    debug!(user = %user.id, deleted, "cleared chat history");

    Ok(Json(json!({ "message": "Chats deleted successfully" })))
}
