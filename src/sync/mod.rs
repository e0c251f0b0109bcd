//! Reconciliation of client-local chat state against the store.
//!
//! The client posts everything it holds (sessions plus per-session message
//! lists). Every entry is upserted by its natural key, concurrently, with
//! ownership stamped from the authenticated caller. After all writes settle
//! the canonical state is re-read and returned; the response is never an
//! echo of the input.

use std::time::Duration;

use anyhow::Result;
use futures_util::{future::join_all, FutureExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::store::{MessageRow, Role, SessionRow, Store};

/// Ceiling for any single upsert before it counts as failed. Without it a
/// hung write would stall the join point forever.
const DEFAULT_UPSERT_TIMEOUT: Duration = Duration::from_secs(10);

// ─── Wire types ───────────────────────────────────────────────────────────────

/// A session as the client holds it. Owner fields in the payload are
/// ignored on deserialization; ownership always comes from the caller's
/// resolved identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPayload {
    pub id: String,
    pub title: String,
    pub timestamp: String,
}

/// A message as the client holds it. Same ownership rule as sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: String,
    pub content: String,
    pub role: Role,
    pub timestamp: String,
}

/// One session's message list, as paired on the wire in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessages<T> {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub messages: Vec<T>,
}

/// Full local state posted to `/sync`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncRequest {
    #[serde(default)]
    pub sessions: Vec<SessionPayload>,
    /// Local message lists grouped by session id. Entries are upserted
    /// independently of the session list, so a message can arrive before
    /// its session does.
    #[serde(default)]
    pub messages: Vec<SessionMessages<MessagePayload>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub title: String,
    pub timestamp: String,
}

impl From<SessionRow> for SessionRecord {
    fn from(row: SessionRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            timestamp: row.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub content: String,
    pub role: Role,
    pub timestamp: String,
}

impl MessageRecord {
    fn from_row(row: MessageRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            content: row.content,
            role: row.role.parse()?,
            timestamp: row.timestamp,
        })
    }
}

/// Canonical server-side state: sessions newest-activity first, each
/// session's messages oldest first. The message groups follow the session
/// list's order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    pub sessions: Vec<SessionRecord>,
    pub messages: Vec<SessionMessages<MessageRecord>>,
}

// ─── Engine ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct SyncEngine {
    store: Store,
    upsert_timeout: Duration,
}

impl SyncEngine {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            upsert_timeout: DEFAULT_UPSERT_TIMEOUT,
        }
    }

    /// Override the per-upsert ceiling. Tests shrink it to force the
    /// timed-out-write path.
    pub fn with_upsert_timeout(mut self, timeout: Duration) -> Self {
        self.upsert_timeout = timeout;
        self
    }

    /// Reconcile a client snapshot into the store and return the canonical
    /// result.
    ///
    /// All upserts run concurrently; the keys are disjoint per entry so no
    /// ordering is needed between them. The join point waits for every write
    /// to settle. Any failure (including a timeout) fails the whole call
    /// with one aggregate error, but writes that already landed stay.
    /// Upserts are idempotent by key, so the client simply retries the same
    /// payload.
    pub async fn reconcile(&self, user_id: &str, request: &SyncRequest) -> Result<SyncSnapshot> {
        let mut writes: Vec<futures_util::future::BoxFuture<'_, (String, Result<()>)>> =
            Vec::new();

        for session in &request.sessions {
            writes.push(
                async move {
                    let result = self
                        .bounded(self.store.upsert_session(
                            user_id,
                            &session.id,
                            &session.title,
                            &session.timestamp,
                        ))
                        .await;
                    (format!("session {}", session.id), result)
                }
                .boxed(),
            );
        }

        for group in &request.messages {
            for message in &group.messages {
                writes.push(
                    async move {
                        let result = self
                            .bounded(self.store.upsert_message(
                                user_id,
                                &group.session_id,
                                &message.id,
                                &message.content,
                                message.role,
                                &message.timestamp,
                            ))
                            .await;
                        (
                            format!("message {}/{}", group.session_id, message.id),
                            result,
                        )
                    }
                    .boxed(),
                );
            }
        }

        let total = writes.len();
        let mut failed = 0usize;
        for (key, result) in join_all(writes).await {
            if let Err(e) = result {
                failed += 1;
                warn!(write = %key, err = format!("{e:#}"), "sync upsert failed");
            }
        }
        if failed > 0 {
            anyhow::bail!(
                "{failed} of {total} sync writes failed; partial state persisted, retry is safe"
            );
        }
        debug!(user_id, writes = total, "sync writes settled");

        self.snapshot(user_id).await
    }

    /// Canonical re-read for a user, independent of any pending payload.
    pub async fn snapshot(&self, user_id: &str) -> Result<SyncSnapshot> {
        let sessions = self.store.list_sessions(user_id).await?;
        let mut messages = Vec::with_capacity(sessions.len());
        for session in &sessions {
            let records = self
                .store
                .list_messages(user_id, &session.id)
                .await?
                .into_iter()
                .map(MessageRecord::from_row)
                .collect::<Result<Vec<_>>>()?;
            messages.push(SessionMessages {
                session_id: session.id.clone(),
                messages: records,
            });
        }
        Ok(SyncSnapshot {
            sessions: sessions.into_iter().map(SessionRecord::from).collect(),
            messages,
        })
    }

    async fn bounded(&self, write: impl std::future::Future<Output = Result<()>>) -> Result<()> {
        match tokio::time::timeout(self.upsert_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "upsert timed out after {}ms",
                self.upsert_timeout.as_millis()
            )),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_owner_fields_are_dropped() {
        // A client claiming someone else's ownership deserializes cleanly
        // with the claim discarded.
        let raw = r#"{"id":"s1","title":"Hi","timestamp":"T1","userId":"someone-else"}"#;
        let payload: SessionPayload = serde_json::from_str(raw).unwrap();
        assert_eq!(payload.id, "s1");
        assert_eq!(payload.title, "Hi");
    }

    #[test]
    fn request_tolerates_missing_fields() {
        let req: SyncRequest = serde_json::from_str("{}").unwrap();
        assert!(req.sessions.is_empty());
        assert!(req.messages.is_empty());
    }

    #[test]
    fn message_groups_use_session_id_key() {
        let raw = r#"{
            "sessions": [],
            "messages": [{"sessionId": "s1", "messages": [
                {"id": "m1", "content": "hello", "role": "user", "timestamp": "T1"}
            ]}]
        }"#;
        let req: SyncRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].session_id, "s1");
        assert_eq!(req.messages[0].messages[0].content, "hello");

        let out = serde_json::to_value(&req.messages[0]).unwrap();
        assert!(out.get("sessionId").is_some());
    }

    #[test]
    fn message_payload_rejects_unknown_role() {
        let raw = r#"{"id":"m1","content":"x","role":"system","timestamp":"T1"}"#;
        assert!(serde_json::from_str::<MessagePayload>(raw).is_err());
    }
}
