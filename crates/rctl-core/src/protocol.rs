//! Wire vocabulary of the rctl line protocol.
//!
//! Every exchange is a UTF-8 text line terminated by `\n`, except the raw
//! file payload that follows a size line during an upload.
//!
//! ```text
//! S→C  LOGIN_PROMPT
//! C→S  <login> | quit
//! S→C  PASSWORD_PROMPT
//! C→S  <password>
//! S→C  AUTH_SUCCESS | AUTH_FAILURE        (failure loops back to LOGIN_PROMPT)
//! C→S  <command> | upload:<path>
//! S→C  <output>  | SEND_FILE_NAME ... FILE_RECEIVED
//! ```

/// Port the server listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 12345;

/// Reference chunk size for file payloads. Not part of the wire contract.
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Receiver asks the sender for the bare file name.
pub const SEND_FILE_NAME: &str = "SEND_FILE_NAME";
/// Receiver asks the sender for the decimal byte count.
pub const SEND_FILE_SIZE: &str = "SEND_FILE_SIZE";

/// Prefix that switches the session into file-receive mode for one transfer.
pub const UPLOAD_PREFIX: &str = "upload:";

/// Login value that abandons the handshake (compared case-insensitively).
pub const QUIT: &str = "quit";

pub const LOGIN_PROMPT: &str = "Enter your login (or 'quit' to exit):";
pub const PASSWORD_PROMPT: &str = "Enter your password:";
pub const ABANDONED: &str = "Connection abandoned.";

/// Substring the client looks for in the handshake result line.
pub const AUTH_SUCCESS_MARKER: &str = "Authentication successful";
pub const AUTH_SUCCESS: &str = "Authentication successful. You are connected.";
pub const AUTH_FAILURE: &str = "Authentication failed. Please try again.";

pub const FILE_RECEIVED: &str = "File received and saved.";
pub const FILE_REJECTED: &str = "File rejected:";

/// Tag placed in front of every standard-error line of a command response.
pub const STDERR_TAG: &str = "ERROR: ";

/// A classified request line from an authenticated client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request<'a> {
    /// `upload:<path>`; the path is informational, the name is negotiated
    /// by the transfer handshake.
    Upload { path: &'a str },
    /// Anything else, executed verbatim by the host shell.
    Command(&'a str),
}

impl<'a> Request<'a> {
    pub fn classify(line: &'a str) -> Self {
        match line.strip_prefix(UPLOAD_PREFIX) {
            Some(path) => Request::Upload { path },
            None => Request::Command(line),
        }
    }
}

/// Whether a login line asks to abandon the handshake.
pub fn is_quit(line: &str) -> bool {
    line.eq_ignore_ascii_case(QUIT)
}

/// Whether a line is one of the reserved file-transfer control tokens.
pub fn is_control_token(line: &str) -> bool {
    ControlToken::parse(line).is_some()
}

/// Whether a handshake result line reports success.
pub fn is_auth_success(line: &str) -> bool {
    line.contains(AUTH_SUCCESS_MARKER)
}

/// The two reserved file-transfer handshake lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlToken {
    SendFileName,
    SendFileSize,
}

impl ControlToken {
    pub fn parse(line: &str) -> Option<Self> {
        match line {
            SEND_FILE_NAME => Some(ControlToken::SendFileName),
            SEND_FILE_SIZE => Some(ControlToken::SendFileSize),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ControlToken::SendFileName => SEND_FILE_NAME,
            ControlToken::SendFileSize => SEND_FILE_SIZE,
        }
    }
}
