//! Listener: accepts TLS connections and runs one session task per peer.

use crate::config::ServerConfig;
use crate::events::EventBus;
use crate::session::{ServerContext, SessionHandler};
use rctl_core::{RctlError, RctlResult};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bound listening socket plus everything sessions need.
pub struct Listener {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    ctx: Arc<ServerContext>,
    cancel: CancellationToken,
}

impl Listener {
    /// Bind to the configured address.
    pub async fn bind(
        config: &ServerConfig,
        tls_config: Arc<rustls::ServerConfig>,
        events: EventBus,
    ) -> RctlResult<Self> {
        let listener = TcpListener::bind(config.listen_addr()).await?;
        Ok(Self {
            listener,
            acceptor: TlsAcceptor::from(tls_config),
            ctx: Arc::new(ServerContext::new(config, events)),
            cancel: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> RctlResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn context(&self) -> Arc<ServerContext> {
        self.ctx.clone()
    }

    /// Cancelling this token stops accepting and tears down every session.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Accept until shut down, then wait for sessions to finish.
    pub async fn run(self) -> RctlResult<()> {
        let local = self.local_addr()?;
        self.ctx
            .events
            .log(format!("Server started, listening on {local}."));

        let mut sessions = JoinSet::new();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((tcp, remote)) => {
                            let acceptor = self.acceptor.clone();
                            let ctx = self.ctx.clone();
                            let cancel = self.cancel.child_token();
                            sessions.spawn(handle_connection(tcp, remote, acceptor, ctx, cancel));
                        }
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                        }
                    }
                }
                _ = self.cancel.cancelled() => break,
            }

            // Reap finished sessions so the set does not grow unbounded.
            while sessions.try_join_next().is_some() {}
        }

        drop(self.listener);
        info!(active = sessions.len(), "listener stopped, waiting for sessions");
        while sessions.join_next().await.is_some() {}
        self.ctx.events.log("Server stopped.");
        Ok(())
    }
}

async fn handle_connection(
    tcp: TcpStream,
    remote: SocketAddr,
    acceptor: TlsAcceptor,
    ctx: Arc<ServerContext>,
    cancel: CancellationToken,
) {
    let _ = tcp.set_nodelay(true);
    let stream = tokio::select! {
        r = acceptor.accept(tcp) => match r {
            Ok(s) => s,
            Err(e) => {
                warn!(remote = %remote, error = %e, "TLS handshake failed");
                return;
            }
        },
        _ = cancel.cancelled() => return,
    };

    ctx.events.log(format!("New connection from {remote}."));
    let handler = SessionHandler::new(ctx, remote.to_string(), cancel);
    if let Err(e) = handler.run(stream).await {
        match e {
            RctlError::Cancelled => debug!(remote = %remote, "session cancelled by shutdown"),
            e => debug!(remote = %remote, error = %e, "session ended with error"),
        }
    }
}
