//! Network edge of the client controller.
//!
//! The controller only ever needs two server calls, so the trait stays
//! that small; tests swap in a stub.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::sync::{SyncRequest, SyncSnapshot};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Push the full local snapshot, get the canonical state back.
    async fn reconcile(&self, request: &SyncRequest) -> Result<SyncSnapshot>;

    /// Ask the server to drop one session.
    async fn delete_session(&self, session_id: &str) -> Result<()>;
}

/// Talks to a running parleyd over HTTP with a bearer credential.
pub struct HttpSyncTransport {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpSyncTransport {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        let base_url: String = base_url.into();
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }
}

#[async_trait]
impl SyncTransport for HttpSyncTransport {
    async fn reconcile(&self, request: &SyncRequest) -> Result<SyncSnapshot> {
        let response = self
            .client
            .post(format!("{}/sync", self.base_url))
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await
            .context("sync request failed")?
            .error_for_status()
            .context("sync request rejected")?;
        response.json().await.context("malformed sync response")
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.client
            .delete(format!("{}/sessions/{}", self.base_url, session_id))
            .bearer_auth(&self.token)
            .send()
            .await
            .context("session delete request failed")?
            .error_for_status()
            .context("session delete rejected")?;
        Ok(())
    }
}
