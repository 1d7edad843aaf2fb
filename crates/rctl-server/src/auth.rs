//! Credential check for the login handshake.
//!
//! A single login/password pair comes from configuration and is compared
//! verbatim. There is no hashing, lockout or attempt counting; the login
//! loop retries for as long as the peer keeps trying.

use std::fmt;

pub const DEFAULT_LOGIN: &str = "bouba";
pub const DEFAULT_PASSWORD: &str = "passer";

/// A login/password pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub login: String,
    pub password: String,
}

impl Credential {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }

    /// Whether this is the well-known out-of-the-box pair.
    pub fn is_default(&self) -> bool {
        self.login == DEFAULT_LOGIN && self.password == DEFAULT_PASSWORD
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Validates login attempts against the configured credential.
#[derive(Debug, Clone)]
pub struct AuthenticationService {
    expected: Credential,
}

impl AuthenticationService {
    pub fn new(expected: Credential) -> Self {
        Self { expected }
    }

    /// Exact, case-sensitive match of both parts. No side effects.
    pub fn authenticate(&self, login: &str, password: &str) -> bool {
        login == self.expected.login && password == self.expected.password
    }
}
