use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_PORT: u16 = 4400;
const DEFAULT_PROVIDER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_MODEL: &str = "mistralai/mistral-7b-instruct";
const DEFAULT_APP_URL: &str = "http://localhost:3000";
const DEFAULT_APP_NAME: &str = "Nexus AI";
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 30;
const DEFAULT_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";
const DEFAULT_MAIL_API_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me/messages/send";
const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant focused on helping with email marketing and business automation.";
const DEFAULT_HISTORY_LIMIT: u32 = 10;

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── ProviderConfig ───────────────────────────────────────────────────────────

/// Completion provider configuration (`[provider]` in config.toml).
///
/// `app_url` and `app_name` are the attribution headers sent upstream;
/// they carry the deployment's branding, which is the only thing that
/// differs between the hosted variants of this service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// API key for the completion endpoint (PARLEY_PROVIDER_API_KEY env var).
    pub api_key: String,
    /// Chat-completions endpoint URL.
    pub api_url: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// Public URL of the frontend, sent as the HTTP-Referer header.
    pub app_url: String,
    /// Display name sent as the X-Title header.
    pub app_name: String,
    /// Request timeout in seconds (default: 30).
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_url: DEFAULT_PROVIDER_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            app_url: DEFAULT_APP_URL.to_string(),
            app_name: DEFAULT_APP_NAME.to_string(),
            timeout_secs: DEFAULT_PROVIDER_TIMEOUT_SECS,
        }
    }
}

// ─── IdentityConfig ───────────────────────────────────────────────────────────

/// Identity provider configuration (`[identity]` in config.toml).
///
/// `client_id`/`client_secret` belong to the external login flow that
/// issues the tokens this server receives; the server itself only ever
/// calls `userinfo_url`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// OpenID-style userinfo endpoint used to resolve bearer credentials.
    pub userinfo_url: String,
    /// OAuth client id (PARLEY_IDENTITY_CLIENT_ID env var).
    pub client_id: String,
    /// OAuth client secret (PARLEY_IDENTITY_CLIENT_SECRET env var).
    pub client_secret: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            userinfo_url: DEFAULT_USERINFO_URL.to_string(),
            client_id: String::new(),
            client_secret: String::new(),
        }
    }
}

// ─── MailConfig ───────────────────────────────────────────────────────────────

/// Mail relay configuration (`[mail]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MailConfig {
    /// Delegated send endpoint (Gmail-shaped `users/me/messages/send`).
    pub api_url: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_MAIL_API_URL.to_string(),
        }
    }
}

// ─── ChatConfig ───────────────────────────────────────────────────────────────

/// Chat gateway configuration (`[chat]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Persona instruction prepended to every completion prompt.
    pub system_prompt: String,
    /// How many recent messages accompany each turn (default: 10).
    pub history_limit: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

// ─── ObservabilityConfig ──────────────────────────────────────────────────────

/// Server observability configuration (`[observability]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log SQLite queries that exceed this threshold (milliseconds).
    /// Default: 100. Set to 0 to disable slow query logging.
    pub slow_query_threshold_ms: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            slow_query_threshold_ms: 100,
        }
    }
}

// ─── TOML config file ─────────────────────────────────────────────────────────

/// Optional overrides read from `{data_dir}/config.toml`. CLI and env
/// values beat these; these beat the built-in defaults.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// HTTP server port (default: 4400).
    port: Option<u16>,
    /// Bind address (default: "127.0.0.1"; use "0.0.0.0" for LAN access).
    bind_address: Option<String>,
    /// Log level filter string, e.g. "debug", "info,parleyd=trace" (default: "info").
    log: Option<String>,
    /// Completion provider configuration (`[provider]`).
    provider: Option<ProviderConfig>,
    /// Identity provider configuration (`[identity]`).
    identity: Option<IdentityConfig>,
    /// Mail relay configuration (`[mail]`).
    mail: Option<MailConfig>,
    /// Chat gateway configuration (`[chat]`).
    chat: Option<ChatConfig>,
    /// Observability configuration (`[observability]`).
    observability: Option<ObservabilityConfig>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml; using defaults");
            None
        }
    }
}

fn env_override(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

// ─── ServerConfig ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub log: String,
    /// Bind address for the HTTP server (PARLEY_BIND env var).
    pub bind_address: String,
    pub provider: ProviderConfig,
    pub identity: IdentityConfig,
    pub mail: MailConfig,
    pub chat: ChatConfig,
    pub observability: ObservabilityConfig,
}

impl ServerConfig {
    /// Assemble the effective config. Clap hands over CLI/env values as
    /// `Some`; anything unset falls through to `{data_dir}/config.toml`
    /// and then to the built-in defaults.
    pub fn new(
        port: Option<u16>,
        data_dir: Option<PathBuf>,
        log: Option<String>,
        bind_address: Option<String>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);

        // The file layer sits between explicit args and the defaults.
        let toml = load_toml(&data_dir).unwrap_or_default();

        let port = port.or(toml.port).unwrap_or(DEFAULT_PORT);
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());

        let bind_address = bind_address
            .or_else(|| env_override("PARLEY_BIND"))
            .or(toml.bind_address)
            .unwrap_or_else(default_bind_address);

        let mut provider = toml.provider.unwrap_or_default();
        if let Some(key) = env_override("PARLEY_PROVIDER_API_KEY") {
            provider.api_key = key;
        }
        if let Some(url) = env_override("PARLEY_PROVIDER_API_URL") {
            provider.api_url = url;
        }
        if let Some(model) = env_override("PARLEY_PROVIDER_MODEL") {
            provider.model = model;
        }
        if let Some(url) = env_override("PARLEY_APP_URL") {
            provider.app_url = url;
        }

        let mut identity = toml.identity.unwrap_or_default();
        if let Some(url) = env_override("PARLEY_IDENTITY_USERINFO_URL") {
            identity.userinfo_url = url;
        }
        if let Some(id) = env_override("PARLEY_IDENTITY_CLIENT_ID") {
            identity.client_id = id;
        }
        if let Some(secret) = env_override("PARLEY_IDENTITY_CLIENT_SECRET") {
            identity.client_secret = secret;
        }

        let mut mail = toml.mail.unwrap_or_default();
        if let Some(url) = env_override("PARLEY_MAIL_API_URL") {
            mail.api_url = url;
        }

        let chat = toml.chat.unwrap_or_default();
        let observability = toml.observability.unwrap_or_default();

        Self {
            port,
            data_dir,
            log,
            bind_address,
            provider,
            identity,
            mail,
            chat,
            observability,
        }
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        // ~/Library/Application Support/parleyd
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("parleyd");
        }
    }
    #[cfg(target_os = "linux")]
    {
        // $XDG_DATA_HOME/parleyd or ~/.local/share/parleyd
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("parleyd");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("parleyd");
        }
    }
    #[cfg(target_os = "windows")]
    {
        // %APPDATA%\parleyd
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("parleyd");
        }
    }
    // Fallback
    PathBuf::from(".parleyd")
}

// ─── Tests ───────────────────────────────────────────────────────────────────
