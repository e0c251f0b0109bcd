//! Chat state and its transitions, reducer style.
//!
//! `ChatState::apply` is pure in-memory state manipulation; persistence
//! and network effects live in the controller. Keeping the transitions
//! side-effect free is what makes them testable one action at a time.

use serde::{Deserialize, Serialize};

use crate::store::Role;
use crate::sync::{MessageRecord, SessionRecord, SyncSnapshot};

/// Characters of the first message kept as a session title before "...".
pub const TITLE_MAX: usize = 30;

/// Title for sessions the client creates ahead of any message.
pub const NEW_SESSION_TITLE: &str = "New Session";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalSession {
    pub id: String,
    pub title: String,
    pub timestamp: String,
}

impl From<SessionRecord> for LocalSession {
    fn from(record: SessionRecord) -> Self {
        Self {
            id: record.id,
            title: record.title,
            timestamp: record.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalMessage {
    pub id: String,
    pub content: String,
    pub role: Role,
    pub timestamp: String,
}

impl From<MessageRecord> for LocalMessage {
    fn from(record: MessageRecord) -> Self {
        Self {
            id: record.id,
            content: record.content,
            role: record.role,
            timestamp: record.timestamp,
        }
    }
}

/// What the pending confirmation dialog would do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteMode {
    /// Wipe every session.
    Clear,
    /// Drop one session by id.
    Delete(String),
}

#[derive(Debug, Clone)]
pub enum Action {
    /// Prepend a fresh session and make it current.
    CreateSession { id: String, timestamp: String },
    /// Switch to a session; `messages` is its restored history.
    SelectSession {
        id: String,
        messages: Vec<LocalMessage>,
    },
    /// Drop a session immediately (no confirmation step).
    DeleteSession { id: String },
    /// Wipe everything immediately.
    ClearAll,
    /// Replace local state with the server's canonical answer.
    ReceiveSnapshot(SyncSnapshot),
    /// The user sent a message. Creates (or retitles) the session on the
    /// first message, matching what the frontends do on submit.
    PushUserMessage(LocalMessage),
    PushAssistantReply(LocalMessage),
    SetLoading(bool),
    SetDarkMode(bool),
    ToggleSidebar,
    /// Open the confirmation dialog for a destructive step.
    RequestDelete(DeleteMode),
    CancelDelete,
    /// Apply whatever `RequestDelete` staged.
    ConfirmDelete,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatState {
    /// Most recent first.
    pub sessions: Vec<LocalSession>,
    pub current_session_id: Option<String>,
    /// Messages of the current session, oldest first.
    pub messages: Vec<LocalMessage>,
    pub dark_mode: bool,
    pub sidebar_open: bool,
    pub loading: bool,
    /// `Some` while the confirmation dialog is up.
    pub pending_delete: Option<DeleteMode>,
}

impl ChatState {
    pub fn apply(&mut self, action: Action) {
        match action {
            Action::CreateSession { id, timestamp } => {
                self.sessions.insert(
                    0,
                    LocalSession {
                        id: id.clone(),
                        title: NEW_SESSION_TITLE.to_string(),
                        timestamp,
                    },
                );
                self.current_session_id = Some(id);
                self.messages.clear();
            }
            Action::SelectSession { id, messages } => {
                self.current_session_id = Some(id);
                self.messages = messages;
            }
            Action::DeleteSession { id } => self.drop_session(&id),
            Action::ClearAll => self.clear_all(),
            Action::ReceiveSnapshot(snapshot) => {
                self.sessions = snapshot
                    .sessions
                    .into_iter()
                    .map(LocalSession::from)
                    .collect();
                // The pointer survives even if its session is gone from the
                // snapshot; the messages then come up empty.
                self.messages = match &self.current_session_id {
                    Some(current) => snapshot
                        .messages
                        .into_iter()
                        .find(|group| &group.session_id == current)
                        .map(|group| group.messages.into_iter().map(LocalMessage::from).collect())
                        .unwrap_or_default(),
                    None => Vec::new(),
                };
            }
            Action::PushUserMessage(message) => {
                match &self.current_session_id {
                    None => {
                        // First message with no session open: the message
                        // itself becomes the session, titled by its content.
                        self.sessions.insert(
                            0,
                            LocalSession {
                                id: message.id.clone(),
                                title: title_from(&message.content),
                                timestamp: message.timestamp.clone(),
                            },
                        );
                        self.current_session_id = Some(message.id.clone());
                    }
                    Some(current) if self.messages.is_empty() => {
                        // First message of a fresh session renames it.
                        let title = title_from(&message.content);
                        if let Some(session) =
                            self.sessions.iter_mut().find(|s| &s.id == current)
                        {
                            session.title = title;
                        }
                    }
                    Some(_) => {}
                }
                self.messages.push(message);
            }
            Action::PushAssistantReply(message) => {
                self.messages.push(message);
                self.loading = false;
            }
            Action::SetLoading(loading) => self.loading = loading,
            Action::SetDarkMode(dark) => self.dark_mode = dark,
            Action::ToggleSidebar => self.sidebar_open = !self.sidebar_open,
            Action::RequestDelete(mode) => self.pending_delete = Some(mode),
            Action::CancelDelete => self.pending_delete = None,
            Action::ConfirmDelete => match self.pending_delete.take() {
                Some(DeleteMode::Clear) => self.clear_all(),
                Some(DeleteMode::Delete(id)) => self.drop_session(&id),
                None => {}
            },
        }
    }

    fn drop_session(&mut self, id: &str) {
        self.sessions.retain(|session| session.id != id);
        if self.current_session_id.as_deref() == Some(id) {
            self.current_session_id = None;
            self.messages.clear();
        }
    }

    fn clear_all(&mut self) {
        self.sessions.clear();
        self.current_session_id = None;
        self.messages.clear();
    }
}

/// Session title derived from the first message: at most `TITLE_MAX`
/// characters, with "..." marking a cut.
pub fn title_from(content: &str) -> String {
    let mut title: String = content.chars().take(TITLE_MAX).collect();
    if content.chars().count() > TITLE_MAX {
        title.push_str("...");
    }
    title
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SessionMessages;

    fn message(id: &str, content: &str, role: Role) -> LocalMessage {
        LocalMessage {
            id: id.to_string(),
            content: content.to_string(),
            role,
            timestamp: format!("2025-01-01T00:00:0{}Z", id.len() % 10),
        }
    }

    #[test]
    fn create_session_prepends_and_clears_messages() {
        let mut state = ChatState::default();
        state.apply(Action::PushUserMessage(message("m1", "hello", Role::User)));
        state.apply(Action::CreateSession {
            id: "s2".into(),
            timestamp: "2025-01-02T00:00:00Z".into(),
        });

        assert_eq!(state.sessions.len(), 2);
        assert_eq!(state.sessions[0].id, "s2");
        assert_eq!(state.sessions[0].title, NEW_SESSION_TITLE);
        assert_eq!(state.current_session_id.as_deref(), Some("s2"));
        assert!(state.messages.is_empty());
    }

    #[test]
    fn first_message_creates_and_titles_the_session() {
        let mut state = ChatState::default();
        state.apply(Action::PushUserMessage(message(
            "m1",
            "Plan the spring newsletter campaign for me",
            Role::User,
        )));

        assert_eq!(state.sessions.len(), 1);
        assert_eq!(state.sessions[0].title, "Plan the spring newsletter cam...");
        assert_eq!(
            state.current_session_id.as_deref(),
            Some(state.sessions[0].id.as_str())
        );
        assert_eq!(state.messages.len(), 1);
    }

    #[test]
    fn short_first_message_is_the_whole_title() {
        let mut state = ChatState::default();
        state.apply(Action::CreateSession {
            id: "s1".into(),
            timestamp: "2025-01-01T00:00:00Z".into(),
        });
        state.apply(Action::PushUserMessage(message("m1", "Hi", Role::User)));

        assert_eq!(state.sessions[0].title, "Hi");
    }

    #[test]
    fn later_messages_leave_the_title_alone() {
        let mut state = ChatState::default();
        state.apply(Action::PushUserMessage(message("m1", "Hi", Role::User)));
        state.apply(Action::PushAssistantReply(message(
            "m2",
            "hello",
            Role::Assistant,
        )));
        state.apply(Action::PushUserMessage(message(
            "m3",
            "A much longer follow-up question about automation",
            Role::User,
        )));

        assert_eq!(state.sessions[0].title, "Hi");
        assert_eq!(state.messages.len(), 3);
    }

    #[test]
    fn delete_current_session_clears_the_pointer() {
        let mut state = ChatState::default();
        state.apply(Action::PushUserMessage(message("m1", "Hi", Role::User)));
        let id = state.current_session_id.clone().unwrap();

        state.apply(Action::DeleteSession { id });

        assert!(state.sessions.is_empty());
        assert!(state.current_session_id.is_none());
        assert!(state.messages.is_empty());
    }

    #[test]
    fn delete_other_session_keeps_the_current_one() {
        let mut state = ChatState::default();
        state.apply(Action::CreateSession {
            id: "s1".into(),
            timestamp: "2025-01-01T00:00:00Z".into(),
        });
        state.apply(Action::CreateSession {
            id: "s2".into(),
            timestamp: "2025-01-02T00:00:00Z".into(),
        });
        state.apply(Action::PushUserMessage(message("m1", "Hi", Role::User)));

        state.apply(Action::DeleteSession { id: "s1".into() });

        assert_eq!(state.sessions.len(), 1);
        assert_eq!(state.current_session_id.as_deref(), Some("s2"));
        assert_eq!(state.messages.len(), 1);
    }

    #[test]
    fn confirm_delete_applies_the_staged_mode() {
        let mut state = ChatState::default();
        state.apply(Action::PushUserMessage(message("m1", "Hi", Role::User)));

        state.apply(Action::RequestDelete(DeleteMode::Clear));
        assert!(state.pending_delete.is_some());
        assert_eq!(state.sessions.len(), 1);

        state.apply(Action::ConfirmDelete);
        assert!(state.pending_delete.is_none());
        assert!(state.sessions.is_empty());
        assert!(state.messages.is_empty());
    }

    #[test]
    fn cancel_delete_changes_nothing_else() {
        let mut state = ChatState::default();
        state.apply(Action::PushUserMessage(message("m1", "Hi", Role::User)));
        state.apply(Action::RequestDelete(DeleteMode::Delete("s9".into())));
        state.apply(Action::CancelDelete);

        assert!(state.pending_delete.is_none());
        assert_eq!(state.sessions.len(), 1);
    }

    #[test]
    fn snapshot_replaces_sessions_and_current_messages() {
        let mut state = ChatState::default();
        state.apply(Action::CreateSession {
            id: "s1".into(),
            timestamp: "2025-01-01T00:00:00Z".into(),
        });
        state.apply(Action::PushUserMessage(message("m1", "local", Role::User)));

        let snapshot = SyncSnapshot {
            sessions: vec![SessionRecord {
                id: "s1".into(),
                title: "Hi".into(),
                timestamp: "2025-01-03T00:00:00Z".into(),
            }],
            messages: vec![SessionMessages {
                session_id: "s1".into(),
                messages: vec![MessageRecord {
                    id: "m1".into(),
                    content: "canonical".into(),
                    role: Role::User,
                    timestamp: "2025-01-01T00:00:00Z".into(),
                }],
            }],
        };
        state.apply(Action::ReceiveSnapshot(snapshot));

        assert_eq!(state.sessions.len(), 1);
        assert_eq!(state.sessions[0].title, "Hi");
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].content, "canonical");
    }

    #[test]
    fn snapshot_without_the_current_session_empties_messages() {
        let mut state = ChatState::default();
        state.apply(Action::PushUserMessage(message("m1", "local", Role::User)));

        state.apply(Action::ReceiveSnapshot(SyncSnapshot::default()));

        assert!(state.sessions.is_empty());
        // The stale pointer survives; its history does not.
        assert!(state.current_session_id.is_some());
        assert!(state.messages.is_empty());
    }

    #[test]
    fn title_cuts_on_characters_not_bytes() {
        let content = "héllo ".repeat(10);
        let title = title_from(&content);
        assert!(title.ends_with("..."));
        assert_eq!(title.chars().count(), TITLE_MAX + 3);
    }
}
