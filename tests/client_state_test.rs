//! Client controller against a live server: the sign-in sync contract
//! end to end, including a second device and remote deletes.

use std::sync::Arc;

use async_trait::async_trait;

use parleyd::client::{Action, Controller, HttpSyncTransport, LocalCache, LocalMessage};
use parleyd::config::ServerConfig;
use parleyd::gateway::ChatGateway;
use parleyd::identity::{IdentityResolver, StaticResolver};
use parleyd::mail::MailRelay;
use parleyd::provider::{CompletionProvider, PromptMessage, ProviderError};
use parleyd::rest;
use parleyd::store::{Role, Store};
use parleyd::sync::SyncEngine;
use parleyd::AppContext;

const ALICE_TOKEN: &str = "alice-token";

struct NoProvider;

#[async_trait]
impl CompletionProvider for NoProvider {
    async fn complete(&self, _messages: &[PromptMessage]) -> Result<String, ProviderError> {
        Ok("unused".to_string())
    }
}

async fn start_server() -> (String, tempfile::TempDir) {
    let data_dir = tempfile::tempdir().unwrap();
    let store = Store::new(data_dir.path()).await.unwrap();
    let config = ServerConfig::new(None, Some(data_dir.path().to_path_buf()), None, None);

    let resolver: Arc<dyn IdentityResolver> =
        Arc::new(StaticResolver::new().with_token(ALICE_TOKEN, "alice@example.com"));

    let ctx = Arc::new(AppContext {
        store: store.clone(),
        sync: SyncEngine::new(store.clone()),
        gateway: ChatGateway::new(store, Arc::new(NoProvider), config.chat.clone()),
        resolver,
        mail: MailRelay::new(&config.mail).unwrap(),
        config,
        started_at: std::time::Instant::now(),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = rest::build_router(ctx);
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    (format!("http://{addr}"), data_dir)
}

fn device(base: &str) -> (tempfile::TempDir, Controller<HttpSyncTransport>) {
    let dir = tempfile::tempdir().unwrap();
    let cache = LocalCache::new(dir.path()).unwrap();
    let transport = HttpSyncTransport::new(base, ALICE_TOKEN).unwrap();
    let controller = Controller::new(cache, transport).unwrap();
    (dir, controller)
}

fn user_message(id: &str, content: &str) -> LocalMessage {
    LocalMessage {
        id: id.to_string(),
        content: content.to_string(),
        role: Role::User,
        timestamp: "2025-01-01T00:00:00Z".to_string(),
    }
}

#[tokio::test]
async fn sign_in_pushes_local_state_and_adopts_the_canonical_answer() {
    let (base, _server_dir) = start_server().await;
    let (_cache_dir, mut device) = device(&base);

    device
        .dispatch(Action::PushUserMessage(user_message("m1", "Plan the launch")))
        .unwrap();
    device.observe_identity(true).await.unwrap();

    let state = device.state();
    assert_eq!(state.sessions.len(), 1);
    assert_eq!(state.sessions[0].title, "Plan the launch");
    assert_eq!(state.current_session_id.as_deref(), Some("m1"));
    assert_eq!(state.messages.len(), 1);
    assert_eq!(state.messages[0].content, "Plan the launch");
    assert_eq!(state.messages[0].role, Role::User);
}

#[tokio::test]
async fn a_second_device_sees_the_first_ones_chats() {
    let (base, _server_dir) = start_server().await;
    let (_dir_a, mut first) = device(&base);
    first
        .dispatch(Action::PushUserMessage(user_message(
            "m1",
            "From device one",
        )))
        .unwrap();
    first.observe_identity(true).await.unwrap();

    let (_dir_b, mut second) = device(&base);
    assert!(second.state().sessions.is_empty());
    second.observe_identity(true).await.unwrap();

    assert_eq!(second.state().sessions.len(), 1);
    assert_eq!(second.state().sessions[0].title, "From device one");

    // Opening the session hydrates its mirrored history.
    let id = second.state().sessions[0].id.clone();
    second.select_session(&id).unwrap();
    assert_eq!(second.state().messages.len(), 1);
    assert_eq!(second.state().messages[0].content, "From device one");
}

#[tokio::test]
async fn remote_deletes_propagate_between_devices() {
    let (base, _server_dir) = start_server().await;
    let (_dir_a, mut first) = device(&base);
    first
        .dispatch(Action::PushUserMessage(user_message("m1", "Temporary")))
        .unwrap();
    first.observe_identity(true).await.unwrap();

    let id = first.state().sessions[0].id.clone();
    first.delete_session_remote(&id).await.unwrap();
    assert!(first.state().sessions.is_empty());

    let (_dir_b, mut second) = device(&base);
    second.observe_identity(true).await.unwrap();
    assert!(second.state().sessions.is_empty());
    assert!(second.state().messages.is_empty());
}

#[tokio::test]
async fn failed_syncs_keep_local_state_and_consume_the_edge() {
    // Nothing listens here; the sync attempt fails fast.
    let dir = tempfile::tempdir().unwrap();
    let cache = LocalCache::new(dir.path()).unwrap();
    let transport = HttpSyncTransport::new("http://127.0.0.1:1", ALICE_TOKEN).unwrap();
    let mut device = Controller::new(cache, transport).unwrap();
    device
        .dispatch(Action::PushUserMessage(user_message("m1", "Offline")))
        .unwrap();

    assert!(device.observe_identity(true).await.is_err());
    assert_eq!(device.state().sessions.len(), 1);
    assert_eq!(device.state().messages.len(), 1);

    // The failed attempt still consumed the sign-in edge: this second
    // call does not reach for the network at all.
    device.observe_identity(true).await.unwrap();
}
