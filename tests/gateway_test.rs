//! Chat gateway integration tests: turn persistence, the history window,
//! and the OpenRouter-shaped provider against a local stub endpoint.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

use parleyd::config::{ChatConfig, ProviderConfig};
use parleyd::gateway::{ChatGateway, GatewayError};
use parleyd::provider::{CompletionProvider, OpenRouterProvider, PromptMessage, ProviderError};
use parleyd::store::{Role, Store, PRIMARY_SESSION_ID};

// ─── Stub provider ────────────────────────────────────────────────────────────

struct StubProvider {
    reply: Result<String, u16>,
    prompts: Mutex<Vec<Vec<PromptMessage>>>,
}

impl StubProvider {
    fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(text.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn failing(status: u16) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(status),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn captured(&self) -> Vec<Vec<PromptMessage>> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for StubProvider {
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String, ProviderError> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        match &self.reply {
            Ok(text) => Ok(text.clone()),
            Err(status) => Err(ProviderError::Status { status: *status }),
        }
    }
}

async fn gateway(provider: Arc<StubProvider>) -> (tempfile::TempDir, Store, ChatGateway) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::new(dir.path()).await.unwrap();
    let gateway = ChatGateway::new(store.clone(), provider, ChatConfig::default());
    (dir, store, gateway)
}

// ─── Turn flow ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn converse_persists_the_turn_and_returns_the_reply() {
    let provider = StubProvider::replying("hello there");
    let (_dir, store, gateway) = gateway(provider).await;

    let reply = gateway.converse("alice@example.com", "Hi").await.unwrap();
    assert_eq!(reply, "hello there");

    let user = store
        .get_user_by_email("alice@example.com")
        .await
        .unwrap()
        .unwrap();
    let rows = store
        .list_messages(&user.id, PRIMARY_SESSION_ID)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].role, "user");
    assert_eq!(rows[0].content, "Hi");
    assert_eq!(rows[1].role, "assistant");
    assert_eq!(rows[1].content, "hello there");
}

#[tokio::test]
async fn prompt_carries_persona_history_and_utterance() {
    let provider = StubProvider::replying("hello");
    let (_dir, _store, gateway) = gateway(provider.clone()).await;

    gateway.converse("alice@example.com", "Hi").await.unwrap();
    gateway
        .converse("alice@example.com", "again")
        .await
        .unwrap();

    let captured = provider.captured();
    let second = &captured[1];
    assert_eq!(second.len(), 4);
    assert_eq!(second[0].role, "system");
    assert_eq!(second[0].content, ChatConfig::default().system_prompt);
    assert_eq!(second[1].role, "user");
    assert_eq!(second[1].content, "Hi");
    assert_eq!(second[2].role, "assistant");
    assert_eq!(second[2].content, "hello");
    assert_eq!(second[3].role, "user");
    assert_eq!(second[3].content, "again");
}

#[tokio::test]
async fn history_window_is_the_last_ten_in_order() {
    let provider = StubProvider::replying("ok");
    let (_dir, store, gateway) = gateway(provider.clone()).await;

    let user = store.find_or_create_user("alice@example.com").await.unwrap();
    let session = store.ensure_primary_session(&user.id).await.unwrap();
    for i in 1..=12 {
        let role = if i % 2 == 1 { Role::User } else { Role::Assistant };
        store
            .append_message(&user.id, &session.id, role, &format!("m{i}"))
            .await
            .unwrap();
    }

    gateway
        .converse("alice@example.com", "latest")
        .await
        .unwrap();

    let captured = provider.captured();
    let prompt = &captured[0];
    // Persona, the ten newest stored messages oldest-first, then the turn.
    assert_eq!(prompt.len(), 12);
    assert_eq!(prompt[1].content, "m3");
    assert_eq!(prompt[10].content, "m12");
    assert_eq!(prompt[11].content, "latest");
}

#[tokio::test]
async fn provider_failure_writes_nothing() {
    let provider = StubProvider::failing(500);
    let (_dir, store, gateway) = gateway(provider).await;

    let err = gateway
        .converse("alice@example.com", "Hi")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GatewayError::Upstream(ProviderError::Status { status: 500 })
    ));

    // The account and its primary session exist by the time the provider
    // is called; the failed turn itself leaves no messages behind.
    let user = store
        .get_user_by_email("alice@example.com")
        .await
        .unwrap()
        .unwrap();
    let rows = store
        .list_messages(&user.id, PRIMARY_SESSION_ID)
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn failed_persistence_still_returns_the_reply() {
    let provider = StubProvider::replying("kept");
    let (_dir, store, gateway) = gateway(provider).await;
    let pool = store.pool();

    // Reads keep working; message inserts abort.
    sqlx::query(
        "CREATE TRIGGER block_message_writes BEFORE INSERT ON messages
         BEGIN SELECT RAISE(ABORT, 'writes disabled'); END",
    )
    .execute(&pool)
    .await
    .unwrap();

    let reply = gateway.converse("alice@example.com", "Hi").await.unwrap();
    assert_eq!(reply, "kept");

    let user = store
        .get_user_by_email("alice@example.com")
        .await
        .unwrap()
        .unwrap();
    let rows = store
        .list_messages(&user.id, PRIMARY_SESSION_ID)
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn resubmitted_turns_append_fresh_rows() {
    let provider = StubProvider::replying("hello");
    let (_dir, store, gateway) = gateway(provider).await;

    gateway.converse("alice@example.com", "Hi").await.unwrap();
    gateway.converse("alice@example.com", "Hi").await.unwrap();

    // A client retrying after a lost response sends the turn again and
    // gets a second copy; turns are additive, unlike sync upserts.
    let user = store
        .get_user_by_email("alice@example.com")
        .await
        .unwrap()
        .unwrap();
    let rows = store
        .list_messages(&user.id, PRIMARY_SESSION_ID)
        .await
        .unwrap();
    assert_eq!(rows.len(), 4);
    let ids: std::collections::HashSet<&str> = rows.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids.len(), 4);
}

#[tokio::test]
async fn complete_reads_history_but_never_writes() {
    let provider = StubProvider::replying("hello");
    let (_dir, store, gateway) = gateway(provider.clone()).await;
    gateway.converse("alice@example.com", "Hi").await.unwrap();

    let reply = gateway
        .complete(Some("alice@example.com"), "More")
        .await
        .unwrap();
    assert_eq!(reply, "hello");

    let user = store
        .get_user_by_email("alice@example.com")
        .await
        .unwrap()
        .unwrap();
    let rows = store
        .list_messages(&user.id, PRIMARY_SESSION_ID)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);

    // The stored turn still flows into the prompt.
    let captured = provider.captured();
    let prompt = captured.last().unwrap();
    assert_eq!(prompt.len(), 4);
    assert_eq!(prompt[3].content, "More");
}

#[tokio::test]
async fn complete_serves_unknown_callers_with_empty_history() {
    let provider = StubProvider::replying("hello");
    let (_dir, store, gateway) = gateway(provider.clone()).await;

    gateway.complete(None, "Hi").await.unwrap();
    gateway
        .complete(Some("ghost@example.com"), "Hi")
        .await
        .unwrap();

    for prompt in provider.captured() {
        assert_eq!(prompt.len(), 2);
        assert_eq!(prompt[0].role, "system");
        assert_eq!(prompt[1].content, "Hi");
    }
    // No account springs into existence as a side effect.
    assert!(store
        .get_user_by_email("ghost@example.com")
        .await
        .unwrap()
        .is_none());
}

// ─── OpenRouter provider against a stub endpoint ──────────────────────────────

struct CapturedCall {
    auth: String,
    referer: String,
    title: String,
    body: Value,
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<CapturedCall>>>);

async fn capture_and_reply(
    State(seen): State<Captured>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    seen.0.lock().unwrap().push(CapturedCall {
        auth: header("authorization"),
        referer: header("http-referer"),
        title: header("x-title"),
        body,
    });
    Json(json!({"choices": [{"message": {"content": "Hello there"}}]}))
}

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    format!("http://{addr}")
}

fn provider_config(base: &str, timeout_secs: u64) -> ProviderConfig {
    ProviderConfig {
        api_key: "sk-test".to_string(),
        api_url: format!("{base}/v1/chat/completions"),
        timeout_secs,
        ..ProviderConfig::default()
    }
}

#[tokio::test]
async fn openrouter_sends_attribution_and_parses_the_reply() {
    let seen = Captured::default();
    let router = Router::new()
        .route("/v1/chat/completions", post(capture_and_reply))
        .with_state(seen.clone());
    let base = serve(router).await;

    let config = provider_config(&base, 5);
    let provider = OpenRouterProvider::new(config.clone()).unwrap();
    let prompt = [PromptMessage::system("persona"), PromptMessage::user("Hi")];
    let reply = provider.complete(&prompt).await.unwrap();
    assert_eq!(reply, "Hello there");

    let calls = seen.0.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].auth, "Bearer sk-test");
    assert_eq!(calls[0].referer, config.app_url);
    assert_eq!(calls[0].title, config.app_name);
    assert_eq!(calls[0].body["model"], json!(config.model));
    assert_eq!(calls[0].body["messages"].as_array().unwrap().len(), 2);
    assert_eq!(calls[0].body["messages"][0]["role"], json!("system"));
    assert_eq!(calls[0].body["messages"][1]["content"], json!("Hi"));
}

#[tokio::test]
async fn upstream_error_statuses_are_reported_as_such() {
    async fn refuse() -> (StatusCode, &'static str) {
        (StatusCode::BAD_GATEWAY, "upstream broke")
    }
    let base = serve(Router::new().route("/v1/chat/completions", post(refuse))).await;

    let provider = OpenRouterProvider::new(provider_config(&base, 5)).unwrap();
    let err = provider
        .complete(&[PromptMessage::user("Hi")])
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Status { status: 502 }));
}

// The explicit request timeout is a deliberate fail-fast guard against
// an unresponsive completion endpoint.
#[tokio::test]
async fn a_stalled_upstream_times_out() {
    async fn stall() -> Json<Value> {
        tokio::time::sleep(Duration::from_secs(3)).await;
        Json(json!({"choices": [{"message": {"content": "late"}}]}))
    }
    let base = serve(Router::new().route("/v1/chat/completions", post(stall))).await;

    let provider = OpenRouterProvider::new(provider_config(&base, 1)).unwrap();
    let started = std::time::Instant::now();
    match provider.complete(&[PromptMessage::user("Hi")]).await {
        Err(ProviderError::Transport(e)) => assert!(e.is_timeout()),
        other => panic!("expected a transport timeout, got {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn an_empty_choice_list_is_malformed() {
    async fn no_choices() -> Json<Value> {
        Json(json!({"choices": []}))
    }
    let base = serve(Router::new().route("/v1/chat/completions", post(no_choices))).await;

    let provider = OpenRouterProvider::new(provider_config(&base, 5)).unwrap();
    let err = provider
        .complete(&[PromptMessage::user("Hi")])
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::MalformedResponse));
}
