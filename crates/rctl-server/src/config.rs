//! Server configuration: TOML file + CLI overrides.

use crate::auth::Credential;
use rctl_core::protocol::DEFAULT_PORT;
use rctl_core::{FileNamePolicy, RctlError, RctlResult, DEFAULT_MAX_LINE};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub exec: ExecSection,
    #[serde(default)]
    pub transfer: TransferSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_cert_path")]
    pub cert: String,
    #[serde(default = "default_key_path")]
    pub key: String,
    /// Seconds without a complete inbound line before the session is dropped.
    #[serde(default)]
    pub idle_timeout: u64,
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            cert: default_cert_path(),
            key: default_key_path(),
            idle_timeout: 0,
            max_line_length: default_max_line_length(),
        }
    }
}

/// `[auth]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSection {
    #[serde(default = "default_login")]
    pub login: String,
    #[serde(default = "default_password")]
    pub password: String,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            login: default_login(),
            password: default_password(),
        }
    }
}

/// `[exec]` section of the config TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecSection {
    /// Seconds a command may run; 0 waits forever.
    #[serde(default)]
    pub timeout: u64,
}

/// `[transfer]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferSection {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,
    #[serde(default)]
    pub file_names: FileNamePolicy,
    /// Empty string disables the event log.
    #[serde(default = "default_event_log")]
    pub event_log: String,
}

impl Default for TransferSection {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            file_names: FileNamePolicy::default(),
            event_log: default_event_log(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_cert_path() -> String {
    "~/.rctl/cert.pem".to_string()
}
fn default_key_path() -> String {
    "~/.rctl/key.pem".to_string()
}
fn default_max_line_length() -> usize {
    DEFAULT_MAX_LINE
}
fn default_login() -> String {
    crate::auth::DEFAULT_LOGIN.to_string()
}
fn default_password() -> String {
    crate::auth::DEFAULT_PASSWORD.to_string()
}
fn default_upload_dir() -> String {
    ".".to_string()
}
fn default_event_log() -> String {
    "server_log.txt".to_string()
}

/// CLI values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub cert: Option<String>,
    pub key: Option<String>,
    pub upload_dir: Option<String>,
}

/// Resolved server configuration (all paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub idle_timeout: Option<Duration>,
    pub max_line_length: usize,
    pub credential: Credential,
    pub exec_timeout: Option<Duration>,
    pub upload_dir: PathBuf,
    pub file_names: FileNamePolicy,
    pub event_log: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::resolve(ConfigFile::default(), Overrides::default())
    }
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    ///
    /// A missing file is not an error; defaults are used.
    pub fn load(config_path: Option<&Path>, overrides: Overrides) -> RctlResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    Self::parse(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Ok(Self::resolve(file_config, overrides))
    }

    pub fn parse(content: &str) -> RctlResult<ConfigFile> {
        toml::from_str::<ConfigFile>(content)
            .map_err(|e| RctlError::Config(format!("config parse error: {e}")))
    }

    pub fn resolve(file: ConfigFile, overrides: Overrides) -> Self {
        let cert_str = overrides.cert.unwrap_or(file.server.cert);
        let key_str = overrides.key.unwrap_or(file.server.key);
        let upload_str = overrides.upload_dir.unwrap_or(file.transfer.upload_dir);

        Self {
            bind: overrides.bind.unwrap_or(file.server.bind),
            port: overrides.port.unwrap_or(file.server.port),
            cert_path: expand_tilde_str(&cert_str),
            key_path: expand_tilde_str(&key_str),
            idle_timeout: seconds(file.server.idle_timeout),
            max_line_length: file.server.max_line_length,
            credential: Credential::new(file.auth.login, file.auth.password),
            exec_timeout: seconds(file.exec.timeout),
            upload_dir: expand_tilde_str(&upload_str),
            file_names: file.transfer.file_names,
            event_log: (!file.transfer.event_log.is_empty())
                .then(|| expand_tilde_str(&file.transfer.event_log)),
        }
    }

    /// `bind:port` suitable for `TcpListener::bind`.
    pub fn listen_addr(&self) -> String {
        if self.bind.contains(':') && !self.bind.starts_with('[') {
            format!("[{}]:{}", self.bind, self.port)
        } else {
            format!("{}:{}", self.bind, self.port)
        }
    }
}

fn seconds(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

/// Expand `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
