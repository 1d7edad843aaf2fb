use thiserror::Error;

/// Errors produced by the rctl protocol layer.
#[derive(Debug, Error)]
pub enum RctlError {
    #[error("tls error: {0}")]
    Tls(String),

    #[error("connection closed: {0}")]
    Closed(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("invalid declared size: {0:?}")]
    InvalidSize(String),

    #[error("incomplete transfer: received {received} of {expected} bytes")]
    Incomplete { expected: u64, received: u64 },

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("session is not authenticated")]
    NotAuthenticated,

    #[error("command is empty")]
    EmptyCommand,

    #[error("a file transfer is already in progress")]
    TransferInProgress,

    #[error("operation cancelled")]
    Cancelled,

    #[error("timeout")]
    Timeout,

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl RctlError {
    /// Whether this error ends the session it occurred in.
    ///
    /// Local guards (not authenticated, empty command, busy transfer) are
    /// reported to the caller and leave the session usable.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            RctlError::NotAuthenticated | RctlError::EmptyCommand | RctlError::TransferInProgress
        )
    }
}

impl From<tokio::time::error::Elapsed> for RctlError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        RctlError::Timeout
    }
}

pub type RctlResult<T> = Result<T, RctlError>;
