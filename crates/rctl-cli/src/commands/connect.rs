//! `rctl connect host`: interactive session.
//!
//! Every input line is sent as a command; output is printed as it arrives.
//! `:upload <path>` sends a file in the background, `:quit` leaves.

use anyhow::Result;
use rctl_core::RctlError;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::{open_session, print_events, ConnectOptions};

/// One line typed at the prompt.
#[derive(Debug, PartialEq, Eq)]
enum Line<'a> {
    Quit,
    Upload(&'a str),
    Command(&'a str),
}

impl<'a> Line<'a> {
    fn parse(input: &'a str) -> Self {
        let trimmed = input.trim();
        if trimmed == ":quit" || trimmed == ":exit" {
            return Line::Quit;
        }
        match trimmed.strip_prefix(":upload") {
            Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => {
                Line::Upload(rest.trim())
            }
            _ => Line::Command(input),
        }
    }
}

/// Run an interactive session until stdin ends, `:quit`, or the server hangs up.
pub async fn run(opts: ConnectOptions) -> Result<()> {
    let driver = Arc::new(open_session(&opts).await?);
    eprintln!(
        "Connected to {}. Type commands, ':upload <path>' to send a file, ':quit' to leave.",
        driver.remote()
    );

    let mut printer = tokio::spawn(print_events(driver.subscribe()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = &mut printer => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };

        match Line::parse(&line) {
            Line::Quit => break,
            Line::Upload("") => eprintln!("rctl: usage: :upload <path>"),
            Line::Upload(path) => {
                let driver = driver.clone();
                let path = path.to_string();
                tokio::spawn(async move {
                    match driver.send_file(&path).await {
                        Ok(_) | Err(RctlError::Cancelled) => {}
                        Err(e) => eprintln!("rctl: upload of {path} failed: {e}"),
                    }
                });
            }
            Line::Command(text) => match driver.send_command(text).await {
                Ok(()) | Err(RctlError::EmptyCommand) => {}
                Err(RctlError::TransferInProgress) => {
                    eprintln!("rctl: upload in progress, command not sent")
                }
                Err(e) if e.is_fatal() => {
                    eprintln!("rctl: {e}");
                    break;
                }
                Err(e) => eprintln!("rctl: {e}"),
            },
        }
    }

    driver.disconnect().await;
    printer.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_lines() {
        assert_eq!(Line::parse(":quit"), Line::Quit);
        assert_eq!(Line::parse("  :exit "), Line::Quit);
        assert_eq!(Line::parse(":upload /tmp/a.txt"), Line::Upload("/tmp/a.txt"));
        assert_eq!(Line::parse(":upload"), Line::Upload(""));
        assert_eq!(Line::parse(":uploads"), Line::Command(":uploads"));
        assert_eq!(Line::parse("ls -la"), Line::Command("ls -la"));
        assert_eq!(Line::parse("   "), Line::Command("   "));
    }
}
