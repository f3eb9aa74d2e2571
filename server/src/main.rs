use anyhow::{Context, Result};
use clap::Parser;
use moonrace_engine::{MemoryStore, SqliteStore, Store};
use moonrace_server::{Api, AuthResolver, Server, ServerConfig};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host interface to bind (default: localhost).
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Path to the SQLite database (in-memory store when omitted).
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Seconds between settlement passes (0 disables the loop).
    #[arg(long)]
    settlement_interval_secs: Option<u64>,

    /// Append value-history rows every N-th settlement pass.
    #[arg(long)]
    history_sample_every: Option<u32>,

    /// Identity service URL used to resolve bearer tokens.
    #[arg(long)]
    auth_url: Option<String>,

    /// Path to a static `token user-id` table (development).
    #[arg(long)]
    auth_token_file: Option<PathBuf>,

    /// Max request body size in bytes (0 disables limit).
    #[arg(long)]
    http_body_limit_bytes: Option<usize>,
}

fn is_production() -> bool {
    matches!(
        std::env::var("NODE_ENV").as_deref(),
        Ok("production") | Ok("prod")
    )
}

fn require_env(var: &str) -> Result<String> {
    let value = std::env::var(var).unwrap_or_default();
    if value.trim().is_empty() {
        anyhow::bail!("Missing required env: {var}");
    }
    Ok(value)
}

fn ensure_production_env() -> Result<()> {
    if !is_production() {
        return Ok(());
    }

    require_env("ALLOWED_HTTP_ORIGINS")?;
    require_env("METRICS_AUTH_TOKEN")?;
    require_env("PRICE_INGEST_TOKEN")?;

    Ok(())
}

fn build_config(args: &Args) -> Result<ServerConfig> {
    let mut config = ServerConfig::default();
    if let Some(interval) = args.settlement_interval_secs {
        config.settlement_interval_secs = interval;
    }
    if let Some(every) = args.history_sample_every {
        config.settlement.history_sample_every = every;
    }
    config.http_body_limit_bytes = match args.http_body_limit_bytes {
        Some(0) => None,
        Some(limit) => Some(limit),
        None => config.http_body_limit_bytes,
    };
    config.validate().map_err(|err| anyhow::anyhow!(err))?;
    Ok(config)
}

fn build_auth(args: &Args) -> Result<AuthResolver> {
    match (&args.auth_url, &args.auth_token_file) {
        (Some(url), None) => AuthResolver::http(url.clone()),
        (None, Some(path)) => AuthResolver::from_static_file(path),
        (Some(_), Some(_)) => {
            anyhow::bail!("--auth-url and --auth-token-file are mutually exclusive")
        }
        (None, None) => anyhow::bail!("one of --auth-url or --auth-token-file is required"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    ensure_production_env()?;

    let config = build_config(&args)?;
    let auth = build_auth(&args)?;

    let store: Arc<dyn Store> = match &args.db_path {
        Some(path) => {
            let store = SqliteStore::open(path)
                .with_context(|| format!("open database {}", path.display()))?;
            info!(path = %path.display(), "sqlite store opened");
            Arc::new(store)
        }
        None => {
            warn!("no --db-path given; games will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let server = Server::new(store, config, auth)
        .map_err(|err| anyhow::anyhow!("invalid config: {err}"))?;
    let server = Arc::new(server);

    tokio::spawn(Arc::clone(&server).run_settlement_loop());

    let api = Api::new(Arc::clone(&server));
    let app = api.router();

    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);
    axum::serve(listener, app).await.context("axum server error")?;

    Ok(())
}
