use anyhow::Result;
use clap::{Parser, Subcommand};
use parleyd::{
    config::ServerConfig,
    gateway::ChatGateway,
    identity::{HttpUserinfoResolver, IdentityResolver},
    mail::MailRelay,
    provider::OpenRouterProvider,
    rest,
    store::Store,
    sync::SyncEngine,
    AppContext,
};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "parleyd",
    about = "Parley chat backend with device sync",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// HTTP server port
    #[arg(long, env = "PARLEY_PORT")]
    port: Option<u16>,

    /// Data directory for config and the SQLite database
    #[arg(long, env = "PARLEY_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Log filter: a level (trace, debug, info, warn, error) or a
    /// tracing directive string like "info,parleyd=debug"
    #[arg(long, env = "PARLEY_LOG")]
    log: Option<String>,

    /// Bind address for the HTTP server (default: 127.0.0.1; use 0.0.0.0 for LAN access)
    #[arg(long, env = "PARLEY_BIND")]
    bind_address: Option<String>,

    /// Also write logs to this path, rotated daily
    #[arg(long, env = "PARLEY_LOG_FILE")]
    log_file: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the server (default when no subcommand given).
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Init once, before any tracing calls.
    let log_level = args.log.as_deref().unwrap_or("info").to_owned();
    let log_format =
        std::env::var("PARLEY_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
    let _file_guard = setup_logging(&log_level, args.log_file.as_deref(), &log_format);

    match args.command {
        None | Some(Command::Serve) => {
            run_server(args.port, args.data_dir, args.log, args.bind_address).await?;
        }
    }

    Ok(())
}

/// Install the global tracing subscriber: stdout always, plus a
/// daily-rolling file when `log_file` is given. The returned `WorkerGuard`
/// flushes the file writer and must live as long as the process.
///
/// `log_format` is `"pretty"` (compact human output, the default) or
/// `"json"` for aggregators. An uncreatable log directory degrades to
/// stdout-only with a warning rather than aborting startup.
fn setup_logging(
    log_level: &str,
    log_file: Option<&std::path::Path>,
    log_format: &str,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let use_json = log_format == "json";

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("parleyd.log"));

        // The appender opens the file lazily; the directory must exist first.
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!(
                "warn: could not create log directory '{}': {e}; falling back to stdout",
                dir.display()
            );
            if use_json {
                tracing_subscriber::fmt().json().with_env_filter(log_level).init();
            } else {
                tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
            }
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        if use_json {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().json())
                .with(fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().compact())
                .with(fmt::layer().with_writer(non_blocking))
                .init();
        }

        Some(guard)
    } else if use_json {
        tracing_subscriber::fmt().json().with_env_filter(log_level).init();
        None
    } else {
        tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
        None
    }
}

async fn run_server(
    port: Option<u16>,
    data_dir: Option<std::path::PathBuf>,
    log: Option<String>,
    bind_address: Option<String>,
) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "parleyd starting");

    let config = ServerConfig::new(port, data_dir, log, bind_address);
    info!(
        data_dir = %config.data_dir.display(),
        port = config.port,
        model = %config.provider.model,
        "config loaded"
    );

    if config.provider.api_key.is_empty() {
        warn!("no provider API key configured; completion calls will fail upstream");
    }

    let store = Store::new_with_slow_query(
        &config.data_dir,
        config.observability.slow_query_threshold_ms,
    )
    .await?;

    let sync = SyncEngine::new(store.clone());
    let provider = Arc::new(OpenRouterProvider::new(config.provider.clone())?);
    let gateway = ChatGateway::new(store.clone(), provider, config.chat.clone());
    let resolver: Arc<dyn IdentityResolver> =
        Arc::new(HttpUserinfoResolver::new(&config.identity)?);
    let mail = MailRelay::new(&config.mail)?;

    let ctx = Arc::new(AppContext {
        config,
        store,
        sync,
        gateway,
        resolver,
        mail,
        started_at: std::time::Instant::now(),
    });

    rest::start_rest_server(ctx).await
}
