//! `rctl upload host file`: send one file and wait for the server's receipt.

use anyhow::{Context, Result};
use rctl_core::protocol::{FILE_RECEIVED, FILE_REJECTED};
use rctl_core::Event;
use std::path::Path;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::info;

use super::{open_session, ConnectOptions};

const CONFIRM_TIMEOUT: Duration = Duration::from_secs(60);

/// Upload `path` and print the confirmation.
pub async fn run(opts: ConnectOptions, path: &Path) -> Result<()> {
    let driver = open_session(&opts).await?;
    let mut events = driver.subscribe();

    let sent = driver
        .send_file(path)
        .await
        .with_context(|| format!("failed to upload {}", path.display()))?;
    info!(file = %path.display(), bytes = sent, "payload sent");

    let confirmation = tokio::time::timeout(CONFIRM_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(Event::LogLine { message, .. })
                    if message == FILE_RECEIVED || message.starts_with(FILE_REJECTED) =>
                {
                    return Some(message);
                }
                Ok(Event::ClientDisconnected { .. }) | Err(RecvError::Closed) => return None,
                _ => {}
            }
        }
    })
    .await;

    driver.disconnect().await;

    match confirmation {
        Ok(Some(line)) if line == FILE_RECEIVED => {
            println!("{line} ({sent} bytes)");
            Ok(())
        }
        Ok(Some(line)) => anyhow::bail!("{line}"),
        Ok(None) => anyhow::bail!("connection closed before the server confirmed the upload"),
        Err(_) => anyhow::bail!("no confirmation from the server within {}s", CONFIRM_TIMEOUT.as_secs()),
    }
}
