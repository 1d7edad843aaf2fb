//! Client configuration at `~/.rctl/config.toml`.
//!
//! Provides default host, port and TLS trust settings.
//! CLI flags always override config file values.

use anyhow::{Context, Result};
use rctl_core::DEFAULT_PORT;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Default connection settings.
    #[serde(default)]
    pub default: DefaultConfig,
}

/// Default connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultConfig {
    /// Default remote host (empty = none).
    #[serde(default)]
    pub host: String,

    /// Default server port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// PEM certificate the server must present (empty = none).
    #[serde(default)]
    pub ca_cert: String,

    /// Skip certificate verification.
    #[serde(default)]
    pub insecure: bool,
}

impl Default for DefaultConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            ca_cert: String::new(),
            insecure: false,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Config {
    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_tilde(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}

/// `~/.rctl`, where the server also writes its development certificate.
pub fn rctl_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_default().join(".rctl")
}

/// Parse a `host[:port]` string into `host:port`, filling in `default_port`.
///
/// IPv6 literals must be bracketed when a port is given: `[::1]:12345`.
pub fn parse_target(target: &str, default_port: u16) -> Result<String> {
    if target.is_empty() {
        anyhow::bail!("empty host");
    }

    if let Some(rest) = target.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .with_context(|| format!("unterminated '[' in target '{target}'"))?;
        if host.is_empty() {
            anyhow::bail!("empty host in target '{target}'");
        }
        let port = match tail.strip_prefix(':') {
            Some(p) => parse_port(p, target)?,
            None if tail.is_empty() => default_port,
            None => anyhow::bail!("unexpected '{tail}' after host in target '{target}'"),
        };
        return Ok(format!("[{host}]:{port}"));
    }

    match target.matches(':').count() {
        0 => Ok(format!("{target}:{default_port}")),
        1 => {
            let (host, port) = target.split_once(':').unwrap_or((target, ""));
            if host.is_empty() {
                anyhow::bail!("empty host in target '{target}'");
            }
            Ok(format!("{host}:{}", parse_port(port, target)?))
        }
        // Bare IPv6 literal.
        _ => Ok(format!("[{target}]:{default_port}")),
    }
}

fn parse_port(port: &str, target: &str) -> Result<u16> {
    port.parse::<u16>()
        .with_context(|| format!("invalid port '{port}' in target '{target}'"))
}
