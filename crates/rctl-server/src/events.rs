//! Operator-facing event bus and the append-only event log.
//!
//! Every [`Event::LogLine`] published here is also emitted through
//! `tracing`. Subscribers (the terminal printer, the event log writer,
//! tests) each get their own `broadcast` receiver; a slow subscriber lags
//! rather than blocking sessions.

use chrono::{DateTime, Local};
use rctl_core::Event;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const DEFAULT_CAPACITY: usize = 1024;

/// Fan-out of server events to any number of observers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publish a log line.
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{message}");
        self.publish(Event::log(message));
    }

    pub fn publish(&self, event: Event) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

/// Format one log entry as `[YYYY-MM-DD HH:MM:SS] message` in local time.
pub fn format_entry(at: std::time::SystemTime, message: &str) -> String {
    let at: DateTime<Local> = at.into();
    format!("[{}] {message}", at.format("%Y-%m-%d %H:%M:%S"))
}

/// Appends every log line received on `events` to `path`.
///
/// Best effort: failures are reported through `tracing` and the writer keeps
/// going. The task ends once every bus sender is dropped.
pub fn spawn_event_log(path: PathBuf, mut events: broadcast::Receiver<Event>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(Event::LogLine { at, message }) => {
                    let mut line = format_entry(at, &message);
                    line.push('\n');
                    if let Err(e) = append_line(&path, &line).await {
                        error!(path = %path.display(), error = %e, "failed to write event log");
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event log fell behind, entries dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_format() {
        let line = format_entry(std::time::SystemTime::now(), "Server started");
        // "[YYYY-MM-DD HH:MM:SS] "
        assert_eq!(line.as_bytes()[0], b'[');
        assert_eq!(line.as_bytes()[20], b']');
        assert!(line.ends_with("] Server started"));
    }

    #[tokio::test]
    async fn subscribers_see_log_lines() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.log("hello");
        match rx.recv().await.unwrap() {
            Event::LogLine { message, .. } => assert_eq!(message, "hello"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn event_log_appends_only_log_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server_log.txt");
        std::fs::write(&path, "existing\n").unwrap();

        let bus = EventBus::default();
        let writer = spawn_event_log(path.clone(), bus.subscribe());
        bus.log("first");
        bus.publish(Event::ClientConnected {
            address: "127.0.0.1:1".into(),
        });
        bus.log("second");
        drop(bus);
        writer.await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "existing");
        assert!(lines[1].ends_with("] first"));
        assert!(lines[2].ends_with("] second"));
    }

    #[tokio::test]
    async fn unwritable_log_does_not_stop_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("log.txt");
        let bus = EventBus::default();
        let writer = spawn_event_log(path, bus.subscribe());
        bus.log("lost");
        drop(bus);
        writer.await.unwrap();
    }
}
