//! `rctl exec host command...`: one-off remote command execution.
//!
//! The protocol does not mark where a response ends, so output is printed
//! until the server has been quiet for `settle` after the first line.

use anyhow::{Context, Result};
use rctl_core::Event;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use super::{open_session, ConnectOptions};

/// Execute a remote command and print its output.
pub async fn run(opts: ConnectOptions, command: &str, settle: Duration) -> Result<()> {
    let driver = open_session(&opts).await?;
    let mut events = driver.subscribe();
    driver
        .send_command(command)
        .await
        .with_context(|| format!("failed to send '{command}'"))?;
    debug!(command = %command, "sent");

    let mut seen_output = false;
    loop {
        let next = if seen_output {
            match tokio::time::timeout(settle, events.recv()).await {
                Ok(r) => r,
                Err(_) => break,
            }
        } else {
            // The first line takes as long as the command runs.
            events.recv().await
        };

        match next {
            Ok(Event::LogLine { message, .. }) => {
                println!("{message}");
                seen_output = true;
            }
            Ok(Event::ClientDisconnected { .. }) | Err(RecvError::Closed) => break,
            Ok(Event::ClientConnected { .. }) | Err(RecvError::Lagged(_)) => {}
        }
    }

    driver.disconnect().await;
    Ok(())
}
