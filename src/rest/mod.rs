// rest/mod.rs: Public HTTP API server.
//
// Axum HTTP server (default 127.0.0.1:4400; widen bind_address for LAN
// access). Serves the chat frontends and their sync traffic.
//
// Endpoints:
//   GET    /health
//   POST   /sync
//   GET    /chats
//   POST   /chats
//   DELETE /chats
//   POST   /sessions
//   DELETE /sessions/{id}
//   POST   /ai
//   POST   /send-email

pub mod error;
pub mod routes;

use anyhow::Result;
use axum::{
    http::{header, HeaderMap},
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::identity::Identity;
use crate::AppContext;

pub async fn start_rest_server(ctx: Arc<AppContext>) -> Result<()> {
    let bind = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
    let addr: SocketAddr = bind.parse()?;

    let router = build_router(ctx);

    info!("HTTP API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/health", get(routes::health::health))
        // Device reconciliation
        .route("/sync", post(routes::sync::sync))
        // Flat message history (implicit session)
        .route(
            "/chats",
            get(routes::chats::list_chats)
                .post(routes::chats::save_chat)
                .delete(routes::chats::delete_chats),
        )
        // Named sessions
        .route("/sessions", post(routes::sessions::create_session))
        .route("/sessions/{id}", delete(routes::sessions::delete_session))
        // Completion without persistence
        .route("/ai", post(routes::ai::complete))
        // Delegated test mail
        .route("/send-email", post(routes::mail::send_email))
        // Browser frontends live on other origins
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

/// The bearer credential off the Authorization header, if any.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Resolve the caller's identity from the request headers.
///
/// `Ok(None)` means anonymous: no credential at all, or one the identity
/// provider rejected. Routes that need a signed-in caller turn that into
/// 401 themselves; routes that serve anonymous callers carry on.
pub(crate) async fn caller_identity(
    ctx: &AppContext,
    headers: &HeaderMap,
) -> Result<Option<Identity>> {
    match bearer_token(headers) {
        Some(token) => ctx.resolver.resolve(token).await,
        None => Ok(None),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
