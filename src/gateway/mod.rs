//! Chat turn orchestration.
//!
//! `converse` is the full flow: resolve the caller, assemble bounded
//! history behind the persona instruction, call the completion provider,
//! then persist both sides of the exchange. The two persistence writes are
//! deliberately separate and best-effort: once the completion succeeded
//! the caller gets the text even if a save fails, and a crash between the
//! writes legitimately leaves a user message without its reply.
//!
//! `complete` is the persist-nothing variant serving `/ai`.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ChatConfig;
use crate::provider::{CompletionProvider, PromptMessage, ProviderError};
use crate::store::{MessageRow, Role, Store, PRIMARY_SESSION_ID};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Upstream(#[from] ProviderError),
    #[error("chat persistence failed: {0}")]
    Persistence(#[source] anyhow::Error),
}

#[derive(Clone)]
pub struct ChatGateway {
    store: Store,
    provider: Arc<dyn CompletionProvider>,
    config: ChatConfig,
}

impl ChatGateway {
    pub fn new(store: Store, provider: Arc<dyn CompletionProvider>, config: ChatConfig) -> Self {
        Self {
            store,
            provider,
            config,
        }
    }

    /// Run one full turn for the caller and return the assistant text.
    ///
    /// History and persistence both use the caller's primary flat thread.
    /// Note the write order: the user message lands first, so a failure (or
    /// crash) before the reply write leaves a thread whose last entry is an
    /// unanswered user message, which is a valid observable state rather
    /// than corruption.
    /// Re-running a turn appends a fresh pair; turn writes are additive,
    /// never idempotent.
    pub async fn converse(&self, email: &str, utterance: &str) -> Result<String, GatewayError> {
        let user = self
            .store
            .find_or_create_user(email)
            .await
            .map_err(GatewayError::Persistence)?;
        let session = self
            .store
            .ensure_primary_session(&user.id)
            .await
            .map_err(GatewayError::Persistence)?;
        let history = self
            .store
            .recent_messages(&user.id, &session.id, self.config.history_limit)
            .await
            .map_err(GatewayError::Persistence)?;

        let prompt = build_prompt(&self.config.system_prompt, &history, utterance);
        let reply = self.provider.complete(&prompt).await?;
        debug!(user = %user.id, history = history.len(), "completion returned");

        if let Err(e) = self
            .store
            .append_message(&user.id, &session.id, Role::User, utterance)
            .await
        {
            warn!(err = format!("{e:#}"), "failed to persist user message");
        }
        if let Err(e) = self
            .store
            .append_message(&user.id, &session.id, Role::Assistant, &reply)
            .await
        {
            warn!(err = format!("{e:#}"), "failed to persist assistant reply");
        }

        Ok(reply)
    }

    /// Completion without any writes. Anonymous callers (and callers the
    /// store has never seen) get an empty history.
    pub async fn complete(
        &self,
        email: Option<&str>,
        utterance: &str,
    ) -> Result<String, GatewayError> {
        let history = match email {
            Some(email) => match self
                .store
                .get_user_by_email(email)
                .await
                .map_err(GatewayError::Persistence)?
            {
                Some(user) => self
                    .store
                    .recent_messages(&user.id, PRIMARY_SESSION_ID, self.config.history_limit)
                    .await
                    .map_err(GatewayError::Persistence)?,
                None => Vec::new(),
            },
            None => Vec::new(),
        };

        let prompt = build_prompt(&self.config.system_prompt, &history, utterance);
        Ok(self.provider.complete(&prompt).await?)
    }
}

/// Persona instruction first, stored history in order, the new utterance
/// as the final user turn.
fn build_prompt(
    system_prompt: &str,
    history: &[MessageRow],
    utterance: &str,
) -> Vec<PromptMessage> {
    let mut prompt = Vec::with_capacity(history.len() + 2);
    prompt.push(PromptMessage::system(system_prompt));
    for row in history {
        prompt.push(PromptMessage {
            role: row.role.clone(),
            content: row.content.clone(),
        });
    }
    prompt.push(PromptMessage::user(utterance));
    prompt
}

// ─── Tests ───────────────────────────────────────────────────────────────────
