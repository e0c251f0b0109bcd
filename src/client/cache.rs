//! On-disk mirror of the client state, one JSON file per concern.
//!
//! Stands in for the browser's localStorage: `sessions.json`,
//! `current_session`, `prefs.json`, and one `messages/<session>.json`
//! per session. Absent files read back as empty defaults, so a fresh
//! directory behaves like a fresh browser profile.

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::state::{ChatState, LocalMessage, LocalSession};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Prefs {
    dark_mode: bool,
}

pub struct LocalCache {
    dir: PathBuf,
}

impl LocalCache {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(dir.join("messages"))
            .with_context(|| format!("failed to create cache dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    /// Rebuild the state a previous run left behind: preferences, the
    /// session list, and the current session's messages. Runs before any
    /// network activity.
    pub fn restore(&self) -> Result<ChatState> {
        let mut state = ChatState {
            dark_mode: self.load_dark_mode()?.unwrap_or(false),
            sessions: self.load_sessions()?,
            ..ChatState::default()
        };
        if let Some(current) = self.load_current_session()? {
            state.messages = self.load_messages(&current)?;
            state.current_session_id = Some(current);
        }
        Ok(state)
    }

    pub fn load_sessions(&self) -> Result<Vec<LocalSession>> {
        read_json_or_default(&self.dir.join("sessions.json"))
    }

    pub fn save_sessions(&self, sessions: &[LocalSession]) -> Result<()> {
        write_json(&self.dir.join("sessions.json"), sessions)
    }

    pub fn load_current_session(&self) -> Result<Option<String>> {
        let path = self.dir.join("current_session");
        match fs::read_to_string(&path) {
            Ok(id) if !id.trim().is_empty() => Ok(Some(id.trim().to_string())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    pub fn save_current_session(&self, id: Option<&str>) -> Result<()> {
        let path = self.dir.join("current_session");
        match id {
            Some(id) => fs::write(&path, id)
                .with_context(|| format!("failed to write {}", path.display())),
            None => match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => {
                    Err(e).with_context(|| format!("failed to remove {}", path.display()))
                }
            },
        }
    }

    pub fn load_messages(&self, session_id: &str) -> Result<Vec<LocalMessage>> {
        read_json_or_default(&self.message_file(session_id))
    }

    pub fn save_messages(&self, session_id: &str, messages: &[LocalMessage]) -> Result<()> {
        write_json(&self.message_file(session_id), messages)
    }

    pub fn remove_messages(&self, session_id: &str) -> Result<()> {
        let path = self.message_file(session_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to remove {}", path.display())),
        }
    }

    pub fn load_dark_mode(&self) -> Result<Option<bool>> {
        let path = self.dir.join("prefs.json");
        if !path.exists() {
            return Ok(None);
        }
        let prefs: Prefs = read_json_or_default(&path)?;
        Ok(Some(prefs.dark_mode))
    }

    pub fn save_dark_mode(&self, dark_mode: bool) -> Result<()> {
        write_json(&self.dir.join("prefs.json"), &Prefs { dark_mode })
    }

    fn message_file(&self, session_id: &str) -> PathBuf {
        // Session ids are uuid-shaped; anything else stays inside the
        // cache dir regardless.
        let safe: String = session_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join("messages").join(format!("{safe}.json"))
    }
}

fn read_json_or_default<T: serde::de::DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let contents = serde_json::to_string_pretty(value)?;
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
