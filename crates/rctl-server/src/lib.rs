//! rctl-server: authenticated remote command execution and file upload over TLS.
//!
//! The binary wires these pieces together; the library is what the client
//! integration tests drive.

pub mod auth;
pub mod config;
pub mod events;
pub mod executor;
pub mod registry;
pub mod server;
pub mod session;
pub mod tls;

pub use auth::{AuthenticationService, Credential};
pub use config::{Overrides, ServerConfig};
pub use events::EventBus;
pub use executor::{CommandExecutor, ExecOutput};
pub use registry::ClientRegistry;
pub use server::Listener;
pub use session::{ServerContext, SessionHandler};
