// rest/routes/mail.rs: Delegated test-mail sends.

use axum::{extract::State, http::HeaderMap, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::rest::caller_identity;
use crate::rest::error::ApiError;
use crate::AppContext;

#[derive(Deserialize, Default)]
pub struct SendEmailRequest {
    /// Recipient; the caller's own address when omitted.
    #[serde(default)]
    pub to: Option<String>,
}

/// POST /send-email: send a canned test message through the mail API,
/// authorized by the caller's own bearer credential. The body is
/// optional; an empty send goes to the caller themselves.
pub async fn send_email(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    body: Option<Json<SendEmailRequest>>,
) -> Result<Json<Value>, ApiError> {
    let identity = caller_identity(&ctx, &headers)
        .await
        .map_err(|e| ApiError::internal("Failed to send email", e))?
        .ok_or(ApiError::Unauthenticated)?;

    let body = body.map(|Json(b)| b).unwrap_or_default();
    let to = body.to.as_deref().unwrap_or(&identity.email);

    let message_id = ctx
        .mail
        .send_test_message(&identity.access_token, &identity.email, to)
        .await
        .map_err(|e| ApiError::internal("Failed to send email", e))?;

    Ok(Json(json!({
        "success": true,
        "messageId": message_id,
        "message": "Email sent successfully",
    })))
}
