//! Caller identity resolution.
//!
//! The HTTP surface authenticates with opaque bearer credentials issued by
//! an external identity provider. Resolution exchanges the credential for
//! the caller's email via the provider's userinfo endpoint. Resolved
//! identities are cached for a few minutes so chatty clients do not hammer
//! the provider on every request.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::IdentityConfig;

const CACHE_TTL: Duration = Duration::from_secs(300);
const USERINFO_TIMEOUT: Duration = Duration::from_secs(10);

/// A resolved caller.
#[derive(Debug, Clone)]
pub struct Identity {
    pub email: String,
    /// The bearer credential itself, retained because it doubles as the
    /// delegated mail-send authorization.
    pub access_token: String,
}

/// Turns a bearer credential into an identity.
///
/// `Ok(None)` means the credential is invalid or expired (a 401 for the
/// caller); `Err` means the provider itself could not be consulted.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<Option<Identity>>;
}

// ─── HTTP userinfo resolver ──────────────────────────────────────────────────

#[derive(Deserialize)]
struct UserinfoResponse {
    email: Option<String>,
}

struct CachedEmail {
    email: String,
    expires_at: Instant,
}

/// Resolves credentials against an OpenID-style userinfo endpoint
/// (`GET {userinfo_url}` with the credential as bearer auth).
pub struct HttpUserinfoResolver {
    client: reqwest::Client,
    userinfo_url: String,
    ttl: Duration,
    cache: RwLock<HashMap<String, CachedEmail>>,
}

impl HttpUserinfoResolver {
    pub fn new(config: &IdentityConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(USERINFO_TIMEOUT)
            .build()
            .context("failed to build userinfo client")?;
        Ok(Self {
            client,
            userinfo_url: config.userinfo_url.clone(),
            ttl: CACHE_TTL,
            cache: RwLock::new(HashMap::new()),
        })
    }

    #[cfg(test)]
    fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    async fn cached_email(&self, token: &str) -> Option<String> {
        let cache = self.cache.read().await;
        cache
            .get(token)
            .filter(|hit| hit.expires_at > Instant::now())
            .map(|hit| hit.email.clone())
    }

    async fn remember(&self, token: &str, email: &str) {
        let mut cache = self.cache.write().await;
        // Expired entries ride along until the next write; keep the map from
        // growing without bound.
        cache.retain(|_, hit| hit.expires_at > Instant::now());
        cache.insert(
            token.to_string(),
            CachedEmail {
                email: email.to_string(),
                expires_at: Instant::now() + self.ttl,
            },
        );
    }
}

#[async_trait]
impl IdentityResolver for HttpUserinfoResolver {
    async fn resolve(&self, token: &str) -> Result<Option<Identity>> {
        if let Some(email) = self.cached_email(token).await {
            return Ok(Some(Identity {
                email,
                access_token: token.to_string(),
            }));
        }

        let resp = self
            .client
            .get(&self.userinfo_url)
            .bearer_auth(token)
            .send()
            .await
            .context("userinfo request failed")?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            debug!(status = status.as_u16(), "credential rejected by identity provider");
            return Ok(None);
        }
        let resp = resp
            .error_for_status()
            .context("userinfo endpoint returned an error")?;

        let info: UserinfoResponse = resp.json().await.context("malformed userinfo response")?;
        let Some(email) = info.email else {
            // Valid token without an email claim cannot own any chat data.
            return Ok(None);
        };

        self.remember(token, &email).await;
        Ok(Some(Identity {
            email,
            access_token: token.to_string(),
        }))
    }
}

// ─── Static resolver ─────────────────────────────────────────────────────────

/// Fixed token-to-email table. Used by tests and by local setups that have
/// no identity provider to talk to.
#[derive(Default)]
pub struct StaticResolver {
    identities: HashMap<String, String>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, email: impl Into<String>) -> Self {
        self.identities.insert(token.into(), email.into());
        self
    }
}

#[async_trait]
impl IdentityResolver for StaticResolver {
    async fn resolve(&self, token: &str) -> Result<Option<Identity>> {
        Ok(self.identities.get(token).map(|email| Identity {
            email: email.clone(),
            access_token: token.to_string(),
        }))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
