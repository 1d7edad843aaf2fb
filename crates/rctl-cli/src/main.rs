//! rctl: remote control client CLI.
//!
//! Logs in to an rctl server over TLS, then runs commands interactively or
//! one-off, and uploads files.

mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::ConnectOptions;
use rctl_client::{TlsSettings, Trust};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, warn};

/// rctl: remote control client
#[derive(Parser)]
#[command(name = "rctl", version, about = "Remote control client: shell commands and file upload over TLS")]
struct Cli {
    /// Server port (when the target does not name one)
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// PEM certificate to trust (usually the server's own cert.pem)
    #[arg(long, global = true)]
    ca_cert: Option<String>,

    /// Accept any server certificate (development only)
    #[arg(long, global = true)]
    insecure: bool,

    /// Name to verify the server certificate against
    #[arg(long, global = true)]
    server_name: Option<String>,

    /// Login name (prompted for when absent)
    #[arg(short, long, global = true)]
    login: Option<String>,

    /// Config file path
    #[arg(long = "config", global = true)]
    config: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,

    /// Positional arguments: host[:port] [command...]
    ///
    /// When no subcommand is given, the first positional arg is the target
    /// and any remaining args form a command to execute once.
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Open an interactive session
    Connect {
        /// Target in host[:port] format (defaults to the config host)
        target: Option<String>,
    },

    /// Run one command and print its output
    Exec {
        /// Target in host[:port] format
        target: String,
        /// Milliseconds of silence that end the output
        #[arg(long, default_value_t = 500)]
        settle_ms: u64,
        /// Command line to run
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },

    /// Upload a file to the server's upload directory
    Upload {
        /// Target in host[:port] format
        target: String,
        /// Local file to send
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing.
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("rctl=debug,rctl_client=debug,rctl_core=debug")
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("rctl=warn,rctl_client=warn")
            .with_target(false)
            .init();
    }

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("rctl: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Load config file.
    let config_path = cli
        .config
        .as_deref()
        .map(config::expand_tilde)
        .unwrap_or_else(|| config::rctl_dir().join("config.toml"));
    let cfg = config::Config::load(&config_path)?;

    let port = cli.port.unwrap_or(cfg.default.port);
    let trust = resolve_trust(&cli, &cfg)?;
    let options = |target: Option<&str>| -> Result<ConnectOptions> {
        let target = match target {
            Some(t) => t.to_string(),
            None if !cfg.default.host.is_empty() => cfg.default.host.clone(),
            None => anyhow::bail!("no target given and no default host configured"),
        };
        let mut tls = TlsSettings::new(trust.clone());
        if let Some(name) = &cli.server_name {
            tls = tls.with_server_name(name.clone());
        }
        Ok(ConnectOptions {
            addr: config::parse_target(&target, port)?,
            tls,
            login: cli.login.clone(),
            password: std::env::var("RCTL_PASSWORD").ok(),
        })
    };

    match &cli.command {
        Some(Command::Connect { target }) => commands::connect::run(options(target.as_deref())?).await,
        Some(Command::Exec {
            target,
            settle_ms,
            command,
        }) => {
            commands::exec::run(
                options(Some(target))?,
                &command.join(" "),
                Duration::from_millis(*settle_ms),
            )
            .await
        }
        Some(Command::Upload { target, file }) => {
            commands::upload::run(options(Some(target))?, file).await
        }
        None => match cli.args.split_first() {
            // Positional args mode: rctl host[:port] [command...]
            Some((target, rest)) if !rest.is_empty() => {
                commands::exec::run(options(Some(target))?, &rest.join(" "), Duration::from_millis(500)).await
            }
            Some((target, _)) => commands::connect::run(options(Some(target))?).await,
            None => commands::connect::run(options(None)?).await,
        },
    }
}

/// CLI flags first, then the config file, then the server's dev certificate
/// in `~/.rctl/cert.pem` if one exists on this machine.
fn resolve_trust(cli: &Cli, cfg: &config::Config) -> Result<Trust> {
    if cli.insecure || cfg.default.insecure {
        warn!("server certificate will not be verified");
        return Ok(Trust::Insecure);
    }
    if let Some(ca) = &cli.ca_cert {
        return Ok(Trust::CaFile(config::expand_tilde(ca)));
    }
    if !cfg.default.ca_cert.is_empty() {
        return Ok(Trust::CaFile(config::expand_tilde(&cfg.default.ca_cert)));
    }
    let dev_cert = config::rctl_dir().join("cert.pem");
    if dev_cert.exists() {
        return Ok(Trust::CaFile(dev_cert));
    }
    anyhow::bail!("no certificate to trust: pass --ca-cert <pem> or --insecure")
}
