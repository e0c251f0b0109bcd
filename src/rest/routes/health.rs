// rest/routes/health.rs: Liveness probe.

use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::AppContext;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
}

/// GET /health: process liveness plus how long this instance has served.
pub async fn health(State(ctx): State<Arc<AppContext>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: ctx.started_at.elapsed().as_secs(),
    })
}
