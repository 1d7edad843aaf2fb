//! Session lifecycle and the events surfaced to observers.

use std::fmt;
use std::time::SystemTime;

/// Lifecycle of one session, seen from either end.
///
/// Transitions only move forward: `Unauthenticated → Authenticated → Closed`
/// or `Unauthenticated → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Closed,
}

impl SessionState {
    pub fn is_open(&self) -> bool {
        !matches!(self, SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Authenticated => "authenticated",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Something an observer (UI, log sink) may want to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A human-readable line: server log entry or server output on the client.
    LogLine { at: SystemTime, message: String },
    ClientConnected { address: String },
    ClientDisconnected { address: String },
}

impl Event {
    pub fn log(message: impl Into<String>) -> Self {
        Event::LogLine {
            at: SystemTime::now(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_is_terminal() {
        assert!(SessionState::Unauthenticated.is_open());
        assert!(SessionState::Authenticated.is_open());
        assert!(!SessionState::Closed.is_open());
        assert_eq!(SessionState::Authenticated.to_string(), "authenticated");
    }

    #[test]
    fn log_event_carries_message() {
        match Event::log("hello") {
            Event::LogLine { message, .. } => assert_eq!(message, "hello"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
