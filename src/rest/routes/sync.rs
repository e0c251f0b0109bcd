// rest/routes/sync.rs: Device reconciliation endpoint.

use axum::{extract::State, http::HeaderMap, Json};
use std::sync::Arc;

use crate::rest::caller_identity;
use crate::rest::error::ApiError;
use crate::sync::{SyncRequest, SyncSnapshot};
use crate::AppContext;

/// POST /sync: push a device's local sessions and messages, get the
/// canonical server state back. Any write failure fails the whole call;
/// the writes that landed stay, so the client simply retries.
pub async fn sync(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(body): Json<SyncRequest>,
) -> Result<Json<SyncSnapshot>, ApiError> {
    let identity = caller_identity(&ctx, &headers)
        .await
        .map_err(|e| ApiError::internal("Sync failed", e))?
        .ok_or(ApiError::Unauthenticated)?;

    let user = ctx
        .store
        .find_or_create_user(&identity.email)
        .await
        .map_err(|e| ApiError::internal("Sync failed", e))?;

    let snapshot = ctx
        .sync
        .reconcile(&user.id, &body)
        .await
        .map_err(|e| ApiError::internal("Sync failed", e))?;

    Ok(Json(snapshot))
}
