//! End-to-end sessions against a real listener over loopback TLS.

use rctl_client::{AuthOutcome, SessionDriver, TlsSessionDriver, TlsSettings, Trust};
use rctl_core::protocol::FILE_RECEIVED;
use rctl_core::{Event, RctlError, SessionState};
use rctl_server::session::ServerContext;
use rctl_server::{tls, EventBus, Listener, ServerConfig};
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(10);

struct TestServer {
    addr: SocketAddr,
    ctx: Arc<ServerContext>,
    shutdown: CancellationToken,
    task: JoinHandle<rctl_core::RctlResult<()>>,
    cert_pem: String,
}

impl TestServer {
    async fn start(upload_dir: &Path) -> Self {
        let generated = tls::self_signed("rctl e2e").unwrap();
        let tls_config =
            tls::server_config_from_pem(generated.cert_pem.as_bytes(), generated.key_pem.as_bytes())
                .unwrap();

        let config = ServerConfig {
            bind: "127.0.0.1".into(),
            port: 0,
            upload_dir: upload_dir.to_path_buf(),
            event_log: None,
            ..ServerConfig::default()
        };
        let listener = Listener::bind(&config, Arc::new(tls_config), EventBus::default())
            .await
            .unwrap();

        Self {
            addr: listener.local_addr().unwrap(),
            ctx: listener.context(),
            shutdown: listener.shutdown_token(),
            task: tokio::spawn(listener.run()),
            cert_pem: generated.cert_pem,
        }
    }

    async fn connect(&self) -> TlsSessionDriver {
        let settings =
            TlsSettings::new(Trust::CaPem(self.cert_pem.clone().into_bytes())).with_server_name("localhost");
        SessionDriver::connect(&self.addr.to_string(), &settings)
            .await
            .unwrap()
    }

    async fn login(&self) -> TlsSessionDriver {
        let driver = self.connect().await;
        assert_eq!(
            driver.submit_credentials("bouba", "passer").await.unwrap(),
            AuthOutcome::Authenticated
        );
        driver
    }
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(WAIT, fut).await.expect("timed out")
}

async fn wait_for_line(events: &mut broadcast::Receiver<Event>, mut pred: impl FnMut(&str) -> bool) -> String {
    within(async {
        loop {
            if let Event::LogLine { message, .. } = events.recv().await.unwrap() {
                if pred(&message) {
                    return message;
                }
            }
        }
    })
    .await
}

#[tokio::test]
async fn login_command_upload_disconnect() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(dir.path()).await;

    let driver = server.connect().await;
    let mut events = driver.subscribe();

    match driver.submit_credentials("bouba", "guess").await.unwrap() {
        AuthOutcome::Rejected(line) => assert!(line.contains("failed"), "{line}"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(server.ctx.registry.is_empty());
    assert_eq!(
        driver.submit_credentials("bouba", "passer").await.unwrap(),
        AuthOutcome::Authenticated
    );
    assert_eq!(driver.state().await, SessionState::Authenticated);
    assert_eq!(server.ctx.registry.len(), 1);

    driver.send_command("echo hello").await.unwrap();
    wait_for_line(&mut events, |l| l.contains("hello")).await;

    let source = dir.path().join("blob.bin");
    let data: Vec<u8> = (0..200_000u32).map(|i| (i * 7 % 256) as u8).collect();
    std::fs::write(&source, &data).unwrap();
    assert_eq!(within(driver.send_file(&source)).await.unwrap(), data.len() as u64);
    wait_for_line(&mut events, |l| l == FILE_RECEIVED).await;
    assert_eq!(std::fs::read(dir.path().join("received_blob.bin")).unwrap(), data);

    driver.disconnect().await;
    eventually("deregistration", || server.ctx.registry.is_empty()).await;

    server.shutdown.cancel();
    within(server.task).await.unwrap().unwrap();
}

#[tokio::test]
async fn registry_tracks_concurrent_sessions() {
    const M: usize = 6;
    const K: usize = 2;
    let dir = tempfile::tempdir().unwrap();
    let server = Arc::new(TestServer::start(dir.path()).await);

    let mut logins = Vec::new();
    for _ in 0..M {
        let server = server.clone();
        logins.push(tokio::spawn(async move { server.login().await }));
    }
    let mut drivers = Vec::new();
    for handle in logins {
        drivers.push(within(handle).await.unwrap());
    }
    assert_eq!(server.ctx.registry.len(), M);

    let leaving: Vec<_> = drivers.drain(..K).collect();
    let mut closers = Vec::new();
    for driver in leaving {
        closers.push(tokio::spawn(async move { driver.disconnect().await }));
    }
    for handle in closers {
        handle.await.unwrap();
    }

    eventually("M-K sessions", || server.ctx.registry.len() == M - K).await;
    assert_eq!(server.ctx.registry.snapshot().len(), M - K);

    for driver in &drivers {
        driver.disconnect().await;
    }
    eventually("empty registry", || server.ctx.registry.is_empty()).await;
    server.shutdown.cancel();
}

#[tokio::test]
async fn quit_never_registers() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(dir.path()).await;
    let mut server_events = server.ctx.events.subscribe();

    let driver = server.connect().await;
    driver.quit().await.unwrap();
    assert_eq!(driver.state().await, SessionState::Closed);

    wait_for_line(&mut server_events, |l| l.contains("abandoned")).await;
    assert!(server.ctx.registry.is_empty());
    server.shutdown.cancel();
}

#[tokio::test]
async fn untrusted_certificate_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(dir.path()).await;
    let other = tls::self_signed("someone else").unwrap();

    let settings = TlsSettings::new(Trust::CaPem(other.cert_pem.into_bytes())).with_server_name("localhost");
    let err = SessionDriver::connect(&server.addr.to_string(), &settings)
        .await
        .err()
        .expect("handshake should fail");
    assert!(matches!(err, RctlError::Tls(_)), "{err}");
    server.shutdown.cancel();
}

#[tokio::test]
async fn insecure_mode_connects() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(dir.path()).await;

    let settings = TlsSettings::new(Trust::Insecure).with_server_name("localhost");
    let driver = SessionDriver::connect(&server.addr.to_string(), &settings)
        .await
        .unwrap();
    assert_eq!(
        driver.submit_credentials("bouba", "passer").await.unwrap(),
        AuthOutcome::Authenticated
    );
    driver.disconnect().await;
    server.shutdown.cancel();
}

#[tokio::test]
async fn server_shutdown_closes_client() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(dir.path()).await;
    let driver = server.login().await;
    let mut events = driver.subscribe();

    server.shutdown.cancel();
    within(server.task).await.unwrap().unwrap();

    within(async {
        loop {
            if let Event::ClientDisconnected { .. } = events.recv().await.unwrap() {
                break;
            }
        }
    })
    .await;
    assert_eq!(driver.state().await, SessionState::Closed);
    assert!(server.ctx.registry.is_empty());
}
