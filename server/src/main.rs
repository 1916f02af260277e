mod error;
mod rate_limit;
mod routes;
mod state;

use anyhow::Context;
use clap::Parser;
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tempbox_config::{apply_env_overrides, AppConfig, ConfigManager};
use tokio::time::{interval, Duration};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "tempbox-server", version, about = "Temporary inbox API backed by public mail providers")]
struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, env = "TEMPBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding the config file.
    #[arg(long)]
    bind: Option<String>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let manager = match &cli.config {
        Some(path) => {
            let data_dir = path
                .parent()
                .map(|dir| dir.join("data"))
                .unwrap_or_else(|| PathBuf::from("data"));
            ConfigManager::at(path, data_dir)
        }
        None => ConfigManager::new(),
    };

    let mut config = match manager {
        Ok(manager) => {
            tracing::info!(path = %manager.config_path().display(), "loading config");
            manager.load().context("load config")?
        }
        Err(err) => {
            tracing::warn!("no usable config location ({err}), running with defaults");
            let mut config = AppConfig::default();
            apply_env_overrides(&mut config, |key| std::env::var(key).ok())
                .context("apply environment overrides")?;
            config
        }
    };

    if let Some(bind) = &cli.bind {
        config.server.bind_addr = bind.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    let addr: SocketAddr = config
        .server
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.server.bind_addr))?;

    let state = Arc::new(
        AppState::initialize(config)
            .await
            .context("failed to initialize tempbox state")?,
    );

    let limits = state.rate_limits.clone();
    tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(60));
        loop {
            tick.tick().await;
            let purged = limits.purge_expired();
            if purged > 0 {
                let tracked = limits.create.tracked_clients() + limits.reads.tracked_clients();
                tracing::debug!(purged, tracked, "rate limiter windows purged");
            }
        }
    });

    let app = routes::router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(%addr, "tempbox server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutting down");
    })
    .await
    .context("server error")?;

    Ok(())
}
