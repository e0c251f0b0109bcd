//! Drives the local-first state: every action goes through `dispatch`,
//! which applies the transition and mirrors the result to disk. Network
//! effects (the one-shot sign-in sync, remote session deletes) are
//! separate async entry points so the reducer itself stays pure.

use std::collections::HashSet;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::sync::{MessagePayload, SessionMessages, SessionPayload, SyncRequest};

use super::cache::LocalCache;
use super::state::{Action, ChatState, DeleteMode, LocalMessage};
use super::transport::SyncTransport;

pub struct Controller<T: SyncTransport> {
    state: ChatState,
    cache: LocalCache,
    transport: T,
    /// Whether the current signed-in stretch already got its sync.
    synced: bool,
}

impl<T: SyncTransport> Controller<T> {
    /// Restore whatever a previous run left on disk; no network traffic.
    pub fn new(cache: LocalCache, transport: T) -> Result<Self> {
        let state = cache.restore()?;
        Ok(Self {
            state,
            cache,
            transport,
            synced: false,
        })
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    /// Apply an action and mirror the result to the cache.
    pub fn dispatch(&mut self, action: Action) -> Result<()> {
        // Removals need the pre-transition view of the state.
        match &action {
            Action::DeleteSession { id } => self.cache.remove_messages(id)?,
            Action::ClearAll => self.remove_all_message_files()?,
            Action::ConfirmDelete => match &self.state.pending_delete {
                Some(DeleteMode::Delete(id)) => self.cache.remove_messages(id)?,
                Some(DeleteMode::Clear) => self.remove_all_message_files()?,
                None => {}
            },
            _ => {}
        }
        self.state.apply(action);
        self.mirror()
    }

    /// Start a fresh session with a generated id.
    pub fn create_session(&mut self) -> Result<()> {
        self.dispatch(Action::CreateSession {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().to_rfc3339(),
        })
    }

    /// Switch sessions, restoring the target's history from the cache.
    pub fn select_session(&mut self, id: &str) -> Result<()> {
        let messages = self.cache.load_messages(id)?;
        self.dispatch(Action::SelectSession {
            id: id.to_string(),
            messages,
        })
    }

    /// React to the sign-in state. The anonymous-to-signed-in edge
    /// triggers exactly one reconcile; a failed one is not retried until
    /// the next sign-in (local state stays authoritative meanwhile).
    pub async fn observe_identity(&mut self, signed_in: bool) -> Result<()> {
        if !signed_in {
            self.synced = false;
            return Ok(());
        }
        if self.synced {
            return Ok(());
        }
        self.synced = true;
        self.sync().await
    }

    /// Drop one session locally and, best effort, on the server.
    pub async fn delete_session_remote(&mut self, id: &str) -> Result<()> {
        if let Err(e) = self.transport.delete_session(id).await {
            warn!(session = id, err = format!("{e:#}"), "remote session delete failed");
        }
        self.dispatch(Action::DeleteSession { id: id.to_string() })
    }

    /// Wipe everything locally and, best effort, on the server. Each
    /// session gets its own delete call; one failing does not stop the
    /// rest.
    pub async fn clear_all_remote(&mut self) -> Result<()> {
        let ids: Vec<String> = self.state.sessions.iter().map(|s| s.id.clone()).collect();
        for id in &ids {
            if let Err(e) = self.transport.delete_session(id).await {
                warn!(session = %id, err = format!("{e:#}"), "remote session delete failed");
            }
        }
        self.dispatch(Action::ClearAll)
    }

    /// Push the full local snapshot and replace local state with the
    /// canonical answer, mirroring every returned message list.
    async fn sync(&mut self) -> Result<()> {
        let request = self.local_snapshot()?;
        let snapshot = self.transport.reconcile(&request).await?;
        debug!(
            sessions = snapshot.sessions.len(),
            "received canonical snapshot"
        );

        // Message files for sessions the server no longer knows go away;
        // everything it does know is rewritten from the canonical copy.
        let known: HashSet<&str> = snapshot.sessions.iter().map(|s| s.id.as_str()).collect();
        for session in &self.state.sessions {
            if !known.contains(session.id.as_str()) {
                self.cache.remove_messages(&session.id)?;
            }
        }
        for group in &snapshot.messages {
            let messages: Vec<LocalMessage> = group
                .messages
                .iter()
                .cloned()
                .map(LocalMessage::from)
                .collect();
            self.cache.save_messages(&group.session_id, &messages)?;
        }

        self.dispatch(Action::ReceiveSnapshot(snapshot))
    }

    /// The full local state as a sync payload: the session list plus each
    /// session's cached messages.
    fn local_snapshot(&self) -> Result<SyncRequest> {
        let sessions = self
            .state
            .sessions
            .iter()
            .map(|s| SessionPayload {
                id: s.id.clone(),
                title: s.title.clone(),
                timestamp: s.timestamp.clone(),
            })
            .collect();

        let mut messages = Vec::with_capacity(self.state.sessions.len());
        for session in &self.state.sessions {
            let stored = self.cache.load_messages(&session.id)?;
            messages.push(SessionMessages {
                session_id: session.id.clone(),
                messages: stored
                    .into_iter()
                    .map(|m| MessagePayload {
                        id: m.id,
                        content: m.content,
                        role: m.role,
                        timestamp: m.timestamp,
                    })
                    .collect(),
            });
        }

        Ok(SyncRequest { sessions, messages })
    }

    fn mirror(&self) -> Result<()> {
        self.cache.save_sessions(&self.state.sessions)?;
        self.cache
            .save_current_session(self.state.current_session_id.as_deref())?;
        if let Some(current) = &self.state.current_session_id {
            self.cache.save_messages(current, &self.state.messages)?;
        }
        self.cache.save_dark_mode(self.state.dark_mode)
    }

    fn remove_all_message_files(&self) -> Result<()> {
        for session in &self.state.sessions {
            self.cache.remove_messages(&session.id)?;
        }
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
