//! Client-side session driver.
//!
//! Drives the login handshake, then hands the inbound half to a background
//! reader that publishes server output as [`Event::LogLine`]s and forwards
//! the file-transfer control tokens to an in-flight upload.

use crate::tls::{self, TlsSettings};
use rctl_core::protocol::{is_auth_success, QUIT};
use rctl_core::transfer::FileSender;
use rctl_core::{write_line, ControlToken, Event, LineReader, RctlError, RctlResult, SessionState};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 1024;
const TOKEN_CAPACITY: usize = 4;

/// Outcome of one login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated,
    /// The server's failure line; it will prompt again.
    Rejected(String),
}

/// A driver over a TLS connection.
pub type TlsSessionDriver = SessionDriver<TlsStream<TcpStream>>;

/// State shared with the background reader.
struct Shared {
    remote: String,
    state: Mutex<SessionState>,
    events: broadcast::Sender<Event>,
    cancel: CancellationToken,
    transferring: AtomicBool,
}

impl Shared {
    fn log(&self, message: impl Into<String>) {
        let message = message.into();
        debug!(remote = %self.remote, "{message}");
        let _ = self.events.send(Event::log(message));
    }

    /// Move to `Closed` once; later calls are no-ops.
    async fn close(&self, notice: &str) {
        let was_authenticated = {
            let mut state = self.state.lock().await;
            if *state == SessionState::Closed {
                return;
            }
            let was = *state == SessionState::Authenticated;
            *state = SessionState::Closed;
            was
        };
        self.cancel.cancel();
        self.log(notice);
        if was_authenticated {
            let _ = self.events.send(Event::ClientDisconnected {
                address: self.remote.clone(),
            });
        }
    }
}

/// Clears the transfer flag when the upload ends, however it ends.
struct TransferGuard<'a>(&'a AtomicBool);

impl Drop for TransferGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One client session: handshake, commands, uploads, disconnect.
///
/// All operations take `&self`, so the driver can be shared (e.g. in an
/// `Arc`) between the input loop and whoever calls [`disconnect`](Self::disconnect).
pub struct SessionDriver<S> {
    shared: Arc<Shared>,
    /// Inbound half, held here until the handshake succeeds.
    handshake_reader: Mutex<Option<LineReader<ReadHalf<S>>>>,
    writer: Mutex<WriteHalf<S>>,
    tokens: Mutex<mpsc::Receiver<ControlToken>>,
    token_tx: mpsc::Sender<ControlToken>,
}

impl SessionDriver<TlsStream<TcpStream>> {
    /// Open a TLS connection to `addr` (`host:port`).
    pub async fn connect(addr: &str, settings: &TlsSettings) -> RctlResult<Self> {
        let config = tls::client_config(&settings.trust)?;
        let server_name = tls::server_name(settings, addr)?;

        let tcp = TcpStream::connect(addr).await?;
        let _ = tcp.set_nodelay(true);
        let remote = tcp
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| addr.to_string());

        let stream = TlsConnector::from(Arc::new(config))
            .connect(server_name, tcp)
            .await
            .map_err(|e| RctlError::Tls(format!("handshake with {addr} failed: {e}")))?;

        info!(remote = %remote, "connected");
        Ok(Self::from_stream(stream, remote))
    }
}

impl<S> SessionDriver<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wrap an already-established stream.
    pub fn from_stream(stream: S, remote: impl Into<String>) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (token_tx, token_rx) = mpsc::channel(TOKEN_CAPACITY);

        Self {
            shared: Arc::new(Shared {
                remote: remote.into(),
                state: Mutex::new(SessionState::Unauthenticated),
                events,
                cancel: CancellationToken::new(),
                transferring: AtomicBool::new(false),
            }),
            // Command output is relayed verbatim and has no length cap.
            handshake_reader: Mutex::new(Some(LineReader::new(read_half).with_max_line(usize::MAX))),
            writer: Mutex::new(write_half),
            tokens: Mutex::new(token_rx),
            token_tx,
        }
    }

    pub fn remote(&self) -> &str {
        &self.shared.remote
    }

    pub async fn state(&self) -> SessionState {
        *self.shared.state.lock().await
    }

    /// Server output, handshake lines and connect/disconnect notices.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.events.subscribe()
    }

    /// One login attempt: read the login prompt, send `login`, read the
    /// password prompt, send `password`, read the result.
    ///
    /// On rejection the session stays unauthenticated and the next call
    /// answers the server's fresh login prompt.
    pub async fn submit_credentials(&self, login: &str, password: &str) -> RctlResult<AuthOutcome> {
        if login.contains('\n') || password.contains('\n') {
            return Err(RctlError::Other("credentials must be single-line".into()));
        }
        self.ensure_state(SessionState::Unauthenticated).await?;

        let mut guard = self.handshake_reader.lock().await;
        let reader = guard
            .as_mut()
            .ok_or_else(|| RctlError::Closed("handshake reader already released".into()))?;

        let result = self.exchange(reader, login, password).await;
        let line = match result {
            Ok(line) => line,
            Err(e) => {
                self.shared.close(&format!("Connection lost during login: {e}")).await;
                return Err(e);
            }
        };

        if !is_auth_success(&line) {
            self.shared.log("Login rejected, try again.");
            return Ok(AuthOutcome::Rejected(line));
        }

        *self.shared.state.lock().await = SessionState::Authenticated;
        let _ = self.shared.events.send(Event::ClientConnected {
            address: self.shared.remote.clone(),
        });
        if let Some(reader) = guard.take() {
            tokio::spawn(read_loop(reader, self.shared.clone(), self.token_tx.clone()));
        }
        Ok(AuthOutcome::Authenticated)
    }

    async fn exchange(
        &self,
        reader: &mut LineReader<ReadHalf<S>>,
        login: &str,
        password: &str,
    ) -> RctlResult<String> {
        self.expect_line(reader).await?;
        self.send_line(login).await?;
        self.expect_line(reader).await?;
        self.send_line(password).await?;
        self.expect_line(reader).await
    }

    /// Abandon the handshake: answer the login prompt with `quit`.
    pub async fn quit(&self) -> RctlResult<()> {
        self.ensure_state(SessionState::Unauthenticated).await?;
        let mut guard = self.handshake_reader.lock().await;
        if let Some(reader) = guard.as_mut() {
            let exchanged = async {
                self.expect_line(reader).await?;
                self.send_line(QUIT).await?;
                self.expect_line(reader).await
            }
            .await;
            if let Err(e) = exchanged {
                debug!(error = %e, "server went away while quitting");
            }
        }
        guard.take();
        drop(guard);
        self.disconnect().await;
        Ok(())
    }

    /// Send one command line. The response arrives on the event stream.
    pub async fn send_command(&self, text: &str) -> RctlResult<()> {
        self.ensure_state(SessionState::Authenticated).await?;
        if text.trim().is_empty() {
            return Err(RctlError::EmptyCommand);
        }
        if self.shared.transferring.load(Ordering::Acquire) {
            return Err(RctlError::TransferInProgress);
        }
        self.send_line(text).await
    }

    /// Upload a local file.
    ///
    /// Holds the outbound half for the whole transfer; commands and other
    /// uploads are rejected with [`RctlError::TransferInProgress`] until it
    /// ends. A concurrent [`disconnect`](Self::disconnect) stops the payload
    /// between chunks and yields [`RctlError::Cancelled`].
    pub async fn send_file(&self, path: impl AsRef<Path>) -> RctlResult<u64> {
        self.ensure_state(SessionState::Authenticated).await?;
        if self
            .shared
            .transferring
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RctlError::TransferInProgress);
        }
        let _transfer = TransferGuard(&self.shared.transferring);

        let sender = FileSender::open(path.as_ref()).await?;
        let name = sender.name().to_string();
        let size = sender.size();

        let mut writer = self.writer.lock().await;
        let mut tokens = self.tokens.lock().await;
        // Tokens left over from an aborted transfer must not satisfy this one.
        while tokens.try_recv().is_ok() {}

        self.shared
            .log(format!("Uploading {name} ({size} bytes)..."));
        let request = sender.request_line();
        let result = async {
            write_line(&mut *writer, &request).await?;
            sender
                .send(&mut *writer, &mut *tokens, Some(&self.shared.cancel))
                .await
        }
        .await;
        drop(tokens);
        drop(writer);

        match result {
            Ok(sent) => {
                self.shared.log(format!("Upload of {name} sent ({sent} bytes)."));
                Ok(sent)
            }
            Err(RctlError::Cancelled) => {
                self.shared
                    .log(format!("Upload of {name} interrupted by disconnect."));
                Err(RctlError::Cancelled)
            }
            Err(e) => {
                self.shared
                    .close(&format!("Upload of {name} failed: {e}"))
                    .await;
                Err(e)
            }
        }
    }

    /// Close the session. Safe to call at any time, any number of times.
    pub async fn disconnect(&self) {
        // Cancel first so an upload holding the writer lets go of it.
        self.shared.cancel.cancel();
        self.shared.close("Disconnected.").await;
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    async fn ensure_state(&self, wanted: SessionState) -> RctlResult<()> {
        let state = *self.shared.state.lock().await;
        match (state, wanted) {
            (s, w) if s == w => Ok(()),
            (SessionState::Closed, _) => Err(RctlError::Closed("session is closed".into())),
            (_, SessionState::Authenticated) => Err(RctlError::NotAuthenticated),
            _ => Err(RctlError::Other(format!("session is already {state}"))),
        }
    }

    async fn expect_line(&self, reader: &mut LineReader<ReadHalf<S>>) -> RctlResult<String> {
        let line = tokio::select! {
            r = reader.read_line() => r?,
            _ = self.shared.cancel.cancelled() => return Err(RctlError::Cancelled),
        };
        let line = line.ok_or_else(|| RctlError::Closed("server closed the connection".into()))?;
        self.shared.log(line.clone());
        Ok(line)
    }

    async fn send_line(&self, line: &str) -> RctlResult<()> {
        let mut writer = self.writer.lock().await;
        if let Err(e) = write_line(&mut *writer, line).await {
            drop(writer);
            self.shared.close(&format!("Write failed: {e}")).await;
            return Err(e);
        }
        Ok(())
    }
}

/// Background reader: runs from authentication until the stream ends or
/// the session is cancelled.
async fn read_loop<R>(mut reader: LineReader<R>, shared: Arc<Shared>, tokens: mpsc::Sender<ControlToken>)
where
    R: AsyncRead + Unpin,
{
    let notice = loop {
        let next = tokio::select! {
            r = reader.read_line() => r,
            _ = shared.cancel.cancelled() => break "Disconnected.".to_string(),
        };
        match next {
            Ok(Some(line)) => match ControlToken::parse(&line) {
                Some(token) if shared.transferring.load(Ordering::Acquire) => {
                    if tokens.send(token).await.is_err() {
                        break "Disconnected.".to_string();
                    }
                }
                Some(token) => warn!(token = token.as_str(), "control token outside of an upload"),
                None => shared.log(line),
            },
            Ok(None) => break "Server closed the connection.".to_string(),
            Err(e) => break format!("Read error: {e}"),
        }
    };
    shared.close(&notice).await;
}
