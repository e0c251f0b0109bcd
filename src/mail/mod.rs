//! Delegated mail send through the caller's own mailbox.
//!
//! The identity credential doubles as the mail authorization: a message is
//! assembled from RFC 2822 lines, base64url-encoded without padding, and
//! posted as `{"raw": ...}` to a Gmail-shaped send endpoint with the
//! caller's bearer token. The content is a canned test message; the relay
//! assigns and returns the message id.

use anyhow::{Context as _, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::Rng as _;
use serde::Deserialize;
use tracing::warn;

use crate::config::MailConfig;

const SEND_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

const TEST_SUBJECTS: [&str; 5] = [
    "Quick update on our project",
    "Let's catch up soon",
    "Important announcement",
    "Weekly newsletter",
    "New features available",
];

const TEST_BODIES: [&str; 5] = [
    "Hope you're doing well! Just wanted to touch base about our recent developments.",
    "I thought you might be interested in our latest updates.",
    "We've made some exciting progress that I'd love to share with you.",
    "Here's a quick summary of what's been happening lately.",
    "Looking forward to hearing your thoughts on this.",
];

/// Failures talking to the mail relay. Display strings stay generic;
/// relay detail is logged where it occurs.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail relay returned status {status}")]
    Status { status: u16 },
    #[error("mail send failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Deserialize)]
struct SendResponse {
    id: String,
}

#[derive(Clone)]
pub struct MailRelay {
    client: reqwest::Client,
    api_url: String,
}

impl MailRelay {
    pub fn new(config: &MailConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .context("failed to build mail client")?;
        Ok(Self {
            client,
            api_url: config.api_url.clone(),
        })
    }

    /// Send a canned test message from the caller's mailbox to `to`.
    /// Returns the relay-assigned message id.
    pub async fn send_test_message(
        &self,
        access_token: &str,
        from: &str,
        to: &str,
    ) -> Result<String, MailError> {
        let (subject, body) = pick_test_content();
        let raw = encode_message(from, to, subject, body);

        let resp = self
            .client
            .post(&self.api_url)
            .bearer_auth(access_token)
            .json(&serde_json::json!({ "raw": raw }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), detail = %detail, "mail relay error");
            return Err(MailError::Status {
                status: status.as_u16(),
            });
        }

        let body: SendResponse = resp.json().await?;
        Ok(body.id)
    }
}

fn pick_test_content() -> (&'static str, &'static str) {
    let mut rng = rand::rng();
    let subject = TEST_SUBJECTS[rng.random_range(0..TEST_SUBJECTS.len())];
    let body = TEST_BODIES[rng.random_range(0..TEST_BODIES.len())];
    (subject, body)
}

/// RFC 2822 header lines, a blank separator, then the body: base64url
/// without padding, the relay's `raw` format.
fn encode_message(from: &str, to: &str, subject: &str, body: &str) -> String {
    let message = format!(
        "From: {from}\nTo: {to}\nContent-Type: text/html; charset=utf-8\nMIME-Version: 1.0\nSubject: {subject}\n\n{body}"
    );
    URL_SAFE_NO_PAD.encode(message)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
