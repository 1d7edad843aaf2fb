//! rctl-server: remote control server.
//!
//! Accepts TLS connections, authenticates clients with the configured
//! login/password, runs their commands and stores their uploads.

use anyhow::Context;
use clap::Parser;
use rctl_core::Event;
use rctl_server::config::{Overrides, ServerConfig};
use rctl_server::events::{spawn_event_log, EventBus};
use rctl_server::{tls, Listener};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// rctl-server: remote control server
#[derive(Parser, Debug)]
#[command(name = "rctl-server", version, about = "Remote control server")]
struct Cli {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Listen address
    #[arg(long)]
    bind: Option<String>,

    /// TLS certificate (PEM)
    #[arg(long)]
    cert: Option<String>,

    /// TLS private key (PEM)
    #[arg(long)]
    key: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.rctl/server.toml")]
    config: String,

    /// Generate self-signed certificate for development
    #[arg(long)]
    generate_cert: bool,

    /// Directory uploads are stored in
    #[arg(long)]
    upload_dir: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    if let Err(e) = run(cli).await {
        error!("{e:#}");
        std::process::exit(1);
    }

    info!("rctl-server stopped");
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Resolve cert/key paths
    let (cert, key) = if cli.generate_cert {
        let (c, k) = tls::generate_self_signed_cert(&tls::default_material_dir())
            .context("failed to generate self-signed certificate")?;
        info!(cert = %c.display(), key = %k.display(), "generated self-signed certificate");
        (Some(c.display().to_string()), Some(k.display().to_string()))
    } else {
        (cli.cert, cli.key)
    };

    let config = ServerConfig::load(
        Some(&PathBuf::from(&cli.config)),
        Overrides {
            bind: cli.bind,
            port: cli.port,
            cert,
            key,
            upload_dir: cli.upload_dir,
        },
    )
    .context("failed to load config")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.listen_addr(),
        "starting rctl-server"
    );
    if config.credential.is_default() {
        warn!("using the built-in default credentials; set [auth] in the config file");
    }

    std::fs::create_dir_all(&config.upload_dir).with_context(|| {
        format!("cannot create upload dir {}", config.upload_dir.display())
    })?;

    let tls_config = tls::load_tls_config(&config.cert_path, &config.key_path)
        .context("failed to load TLS config")?;

    let events = EventBus::default();
    let event_log = config
        .event_log
        .clone()
        .map(|path| spawn_event_log(path, events.subscribe()));
    let roster = tokio::spawn(print_roster(events.subscribe()));

    let listener = Listener::bind(&config, Arc::new(tls_config), events.clone())
        .await
        .with_context(|| format!("cannot listen on {}", config.listen_addr()))?;
    let shutdown = listener.shutdown_token();

    let server = tokio::spawn(listener.run());
    tokio::select! {
        _ = shutdown_signal() => info!("received shutdown signal"),
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();

    let result = server.await.context("listener task failed")?;

    // Let the writers drain once the last sender is gone.
    drop(events);
    if let Some(handle) = event_log {
        let _ = handle.await;
    }
    let _ = roster.await;

    result.context("server error")
}

/// Log the set of connected clients whenever it changes.
async fn print_roster(mut events: tokio::sync::broadcast::Receiver<Event>) {
    let mut roster = std::collections::BTreeSet::new();
    loop {
        match events.recv().await {
            Ok(Event::ClientConnected { address }) => {
                roster.insert(address);
            }
            Ok(Event::ClientDisconnected { address }) => {
                roster.remove(&address);
            }
            Ok(Event::LogLine { .. }) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
        let list: Vec<&str> = roster.iter().map(String::as_str).collect();
        info!(count = list.len(), clients = %list.join(", "), "connected clients");
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
