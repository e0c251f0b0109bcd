//! Local-first client state: the reducer, its on-disk mirror, and the
//! controller that drives sync against a running server.
//!
//! The state model mirrors what the browser frontends keep in component
//! state and localStorage: a session list (newest first), the current
//! session's messages, and a handful of UI flags. Everything works
//! offline; signing in triggers exactly one reconcile that replaces
//! local state with the server's canonical answer.

pub mod cache;
pub mod controller;
pub mod state;
pub mod transport;

pub use cache::LocalCache;
pub use controller::Controller;
pub use state::{Action, ChatState, DeleteMode, LocalMessage, LocalSession};
pub use transport::{HttpSyncTransport, SyncTransport};
