pub mod client;
pub mod config;
pub mod gateway;
pub mod identity;
pub mod mail;
pub mod provider;
pub mod rest;
pub mod store;
pub mod sync;

use std::sync::Arc;

use config::ServerConfig;
use gateway::ChatGateway;
use identity::IdentityResolver;
use mail::MailRelay;
use store::Store;
use sync::SyncEngine;

/// Shared application state passed to every HTTP handler.
#[derive(Clone)]
pub struct AppContext {
    pub config: ServerConfig,
    pub store: Store,
    pub sync: SyncEngine,
    pub gateway: ChatGateway,
    /// Resolves bearer credentials to identities. Swapped for a static
    /// table in tests.
    pub resolver: Arc<dyn IdentityResolver>,
    pub mail: MailRelay,
    pub started_at: std::time::Instant,
}
