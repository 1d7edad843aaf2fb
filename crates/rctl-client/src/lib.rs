//! rctl-client: Rust client library for rctl.
//!
//! Connects over TLS, performs the login handshake, then sends commands and
//! uploads files. Server output arrives asynchronously on an event stream.
//!
//! # Quick Start
//!
//! ```no_run
//! use rctl_client::{AuthOutcome, SessionDriver, TlsSettings, Trust};
//!
//! # async fn example() -> rctl_core::RctlResult<()> {
//! let settings = TlsSettings::new(Trust::CaFile("server-cert.pem".into()));
//! let driver = SessionDriver::connect("127.0.0.1:12345", &settings).await?;
//! let mut events = driver.subscribe();
//!
//! if driver.submit_credentials("bouba", "passer").await? == AuthOutcome::Authenticated {
//!     driver.send_command("uname -a").await?;
//!     driver.send_file("notes.txt").await?;
//! }
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! driver.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod driver;
pub mod tls;

// Re-export primary public types.
pub use driver::{AuthOutcome, SessionDriver, TlsSessionDriver};
pub use tls::{TlsSettings, Trust};
