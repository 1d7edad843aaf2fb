//! CLI subcommand implementations.

pub mod connect;
pub mod exec;
pub mod upload;

use anyhow::{Context, Result};
use dialoguer::{Confirm, Input, Password};
use rctl_client::{AuthOutcome, SessionDriver, TlsSessionDriver, TlsSettings};
use rctl_core::Event;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Everything needed to reach and log in to a server.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// `host:port`.
    pub addr: String,
    pub tls: TlsSettings,
    /// Login to use instead of prompting.
    pub login: Option<String>,
    /// Password to use instead of prompting (from `RCTL_PASSWORD`).
    pub password: Option<String>,
}

/// Connect and log in, prompting for credentials until accepted or the
/// user gives up.
pub async fn open_session(opts: &ConnectOptions) -> Result<TlsSessionDriver> {
    info!(addr = %opts.addr, "connecting");
    let driver = SessionDriver::connect(&opts.addr, &opts.tls)
        .await
        .with_context(|| format!("failed to connect to {}", opts.addr))?;

    loop {
        let (login, password) = credentials(opts).await?;
        match driver.submit_credentials(&login, &password).await? {
            AuthOutcome::Authenticated => {
                debug!(login = %login, "authenticated");
                return Ok(driver);
            }
            AuthOutcome::Rejected(line) => {
                eprintln!("{line}");
                if opts.password.is_some() || !confirm_retry().await? {
                    driver.quit().await?;
                    anyhow::bail!("authentication failed");
                }
            }
        }
    }
}

async fn credentials(opts: &ConnectOptions) -> Result<(String, String)> {
    let login = opts.login.clone();
    let password = opts.password.clone();
    tokio::task::spawn_blocking(move || -> Result<(String, String)> {
        let login = match login {
            Some(l) => l,
            None => Input::<String>::new()
                .with_prompt("Login")
                .interact_text()
                .context("failed to read login")?,
        };
        let password = match password {
            Some(p) => p,
            None => Password::new()
                .with_prompt("Password")
                .interact()
                .context("failed to read password")?,
        };
        Ok((login, password))
    })
    .await
    .context("credential prompt panicked")?
}

async fn confirm_retry() -> Result<bool> {
    tokio::task::spawn_blocking(|| {
        Confirm::new()
            .with_prompt("Try again?")
            .default(true)
            .interact()
            .context("failed to read user input")
    })
    .await
    .context("prompt panicked")?
}

/// Print server output until the session closes.
pub async fn print_events(mut events: broadcast::Receiver<Event>) {
    loop {
        match events.recv().await {
            Ok(Event::LogLine { message, .. }) => println!("{message}"),
            Ok(Event::ClientDisconnected { .. }) => {
                eprintln!("rctl: connection closed");
                break;
            }
            Ok(Event::ClientConnected { .. }) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                eprintln!("rctl: {n} output lines dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
