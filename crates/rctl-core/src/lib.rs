//! rctl-core: Shared protocol library for rctl.
//!
//! Provides the line codec, the wire vocabulary, the file transfer
//! sub-protocol, and the session/event types used by both ends.

pub mod codec;
pub mod error;
pub mod events;
pub mod protocol;
pub mod transfer;

// Re-export commonly used items at crate root.
pub use codec::{write_line, LineReader, DEFAULT_MAX_LINE};
pub use error::{RctlError, RctlResult};
pub use events::{Event, SessionState};
pub use protocol::{ControlToken, Request, DEFAULT_PORT};
pub use transfer::{FileNamePolicy, FileReceiver, FileSender, FileTransferRequest, ReceivedFile};
