//! Per-connection session state machine.
//!
//! ```text
//! AwaitingLogin ─quit/EOF─▶ Closed
//!      │ login
//!      ▼
//! AwaitingPassword ─fail─▶ AwaitingLogin
//!      │ ok (registered)
//!      ▼
//! Authenticated ⇄ FileReceive
//!      │ EOF / error / cancel
//!      ▼
//!    Closed (deregistered)
//! ```

use crate::auth::AuthenticationService;
use crate::config::ServerConfig;
use crate::events::EventBus;
use crate::executor::CommandExecutor;
use crate::registry::{ClientRegistry, Registration};
use rctl_core::protocol::{
    is_quit, ABANDONED, AUTH_FAILURE, AUTH_SUCCESS, LOGIN_PROMPT, PASSWORD_PROMPT,
};
use rctl_core::{write_line, FileReceiver, LineReader, RctlError, RctlResult, Request};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Services shared by every session of one server.
#[derive(Debug)]
pub struct ServerContext {
    pub auth: AuthenticationService,
    pub executor: CommandExecutor,
    pub receiver: FileReceiver,
    pub registry: ClientRegistry,
    pub events: EventBus,
    pub max_line_length: usize,
    pub idle_timeout: Option<Duration>,
}

impl ServerContext {
    pub fn new(config: &ServerConfig, events: EventBus) -> Self {
        Self {
            auth: AuthenticationService::new(config.credential.clone()),
            executor: CommandExecutor::new(config.exec_timeout),
            receiver: FileReceiver::new(config.upload_dir.clone(), config.file_names),
            registry: ClientRegistry::new(events.clone()),
            events,
            max_line_length: config.max_line_length,
            idle_timeout: config.idle_timeout,
        }
    }
}

/// Handshake phase; the authenticated phase is the command loop.
#[derive(Debug)]
enum Phase {
    AwaitingLogin,
    AwaitingPassword { login: String },
}

/// Drives one accepted connection from the login prompt to close.
pub struct SessionHandler {
    ctx: Arc<ServerContext>,
    remote: String,
    cancel: CancellationToken,
}

impl SessionHandler {
    pub fn new(ctx: Arc<ServerContext>, remote: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            ctx,
            remote: remote.into(),
            cancel,
        }
    }

    /// Run the session to completion.
    ///
    /// The registry entry, if any, is released before this returns, whatever
    /// the exit path. Errors are reported on the event bus and returned.
    pub async fn run<S>(self, stream: S) -> RctlResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (read_half, mut writer) = tokio::io::split(stream);
        let mut reader = LineReader::new(read_half)
            .with_max_line(self.ctx.max_line_length)
            .with_idle_timeout(self.ctx.idle_timeout);

        let result = self.serve(&mut reader, &mut writer).await;

        let _ = writer.shutdown().await;

        match &result {
            Ok(()) => debug!(remote = %self.remote, "session closed"),
            Err(RctlError::Cancelled) => debug!(remote = %self.remote, "session cancelled"),
            Err(e) => {
                self.ctx
                    .events
                    .log(format!("Error with client {}: {e}", self.remote));
            }
        }
        result
    }

    /// Stop `work` at shutdown. Only for steps that leave nothing behind
    /// when dropped.
    async fn until_cancelled<T>(&self, work: impl Future<Output = RctlResult<T>>) -> RctlResult<T> {
        tokio::select! {
            r = work => r,
            _ = self.cancel.cancelled() => Err(RctlError::Cancelled),
        }
    }

    async fn serve<R, W>(&self, reader: &mut LineReader<R>, writer: &mut W) -> RctlResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let Some(registration) = self.until_cancelled(self.handshake(reader, writer)).await? else {
            return Ok(());
        };

        let result = self.command_loop(reader, writer).await;
        drop(registration);
        self.ctx
            .events
            .log(format!("Client {} disconnected.", self.remote));
        result
    }

    /// Login loop. Returns the registry guard on success, `None` when the
    /// peer quits or goes away first.
    async fn handshake<R, W>(
        &self,
        reader: &mut LineReader<R>,
        writer: &mut W,
    ) -> RctlResult<Option<Registration>>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut phase = Phase::AwaitingLogin;
        loop {
            phase = match phase {
                Phase::AwaitingLogin => {
                    write_line(writer, LOGIN_PROMPT).await?;
                    match reader.read_line().await? {
                        Some(login) if !is_quit(&login) => Phase::AwaitingPassword { login },
                        _ => {
                            // Peer may already be gone.
                            let _ = write_line(writer, ABANDONED).await;
                            self.ctx
                                .events
                                .log(format!("Client {} abandoned the connection.", self.remote));
                            return Ok(None);
                        }
                    }
                }
                Phase::AwaitingPassword { login } => {
                    write_line(writer, PASSWORD_PROMPT).await?;
                    let Some(password) = reader.read_line().await? else {
                        self.ctx.events.log(format!(
                            "Client {} closed the connection during login.",
                            self.remote
                        ));
                        return Ok(None);
                    };

                    if !self.ctx.auth.authenticate(&login, &password) {
                        write_line(writer, AUTH_FAILURE).await?;
                        self.ctx.events.log(format!(
                            "Authentication failed for {} (login {login:?}).",
                            self.remote
                        ));
                        Phase::AwaitingLogin
                    } else {
                        let registration = self.ctx.registry.register(&self.remote).ok_or_else(|| {
                            RctlError::Protocol(format!("{} is already registered", self.remote))
                        })?;
                        write_line(writer, AUTH_SUCCESS).await?;
                        self.ctx.events.log(format!(
                            "Client {} authenticated as {login}.",
                            self.remote
                        ));
                        return Ok(Some(registration));
                    }
                }
            };
        }
    }

    async fn command_loop<R, W>(&self, reader: &mut LineReader<R>, writer: &mut W) -> RctlResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        while let Some(line) = self.until_cancelled(reader.read_line()).await? {
            self.ctx
                .events
                .log(format!("Command from {}: {line}", self.remote));

            match Request::classify(&line) {
                Request::Upload { path } => self.receive_upload(path, reader, writer).await?,
                Request::Command(command) => {
                    self.until_cancelled(async {
                        let output = self.ctx.executor.execute(command).await;
                        if output.timed_out {
                            warn!(remote = %self.remote, command, "command timed out");
                        }
                        write_line(writer, &output.text).await
                    })
                    .await?;
                }
            }
        }
        Ok(())
    }

    async fn receive_upload<R, W>(
        &self,
        path: &str,
        reader: &mut LineReader<R>,
        writer: &mut W,
    ) -> RctlResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        debug!(remote = %self.remote, path, "upload requested");
        let receiver = &self.ctx.receiver;
        let request = self.until_cancelled(receiver.negotiate(reader, writer)).await?;
        self.ctx.events.log(format!(
            "Receiving file {} ({} bytes) from {}.",
            request.declared_name, request.declared_size, self.remote
        ));

        // Not wrapped: `store` observes the token itself and removes the
        // partial file before returning.
        let received = receiver
            .store(&request, reader, writer, Some(&self.cancel))
            .await?;
        self.ctx.events.log(format!(
            "File {} received from {} ({} bytes, sha256 {}) saved as {}.",
            request.declared_name,
            self.remote,
            received.bytes,
            received.sha256,
            received.path.display()
        ));
        Ok(())
    }
}
