//! File transfer sub-protocol over an established session stream.
//!
//! ```text
//! receiver → SEND_FILE_NAME      sender → <bare file name>
//! receiver → SEND_FILE_SIZE      sender → <decimal byte count>
//! sender   → <exactly that many raw bytes, unframed>
//! receiver → FILE_RECEIVED       (only when every declared byte arrived)
//! ```
//!
//! The receiver stores into `<dest>.part` and renames on completion, so an
//! interrupted upload never leaves a file that looks complete.

use crate::codec::{write_line, LineReader};
use crate::error::{RctlError, RctlResult};
use crate::protocol::{ControlToken, CHUNK_SIZE, FILE_RECEIVED, FILE_REJECTED, UPLOAD_PREFIX};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Prefix of every stored artefact name.
pub const RECEIVED_PREFIX: &str = "received_";

/// What the sender declared before streaming the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransferRequest {
    /// Peer-controlled; see [`FileNamePolicy`].
    pub declared_name: String,
    pub declared_size: u64,
}

/// How a peer-supplied file name becomes a destination path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileNamePolicy {
    /// Replace path separators and NUL with `_`; the artefact always lands
    /// directly inside the upload directory.
    #[default]
    Sanitize,
    /// Use the name as sent. A name such as `../x` escapes the upload
    /// directory; kept for compatibility with trusted peers.
    Verbatim,
}

impl FileNamePolicy {
    pub fn destination(&self, upload_dir: &Path, declared_name: &str) -> PathBuf {
        let name = match self {
            FileNamePolicy::Sanitize => declared_name
                .chars()
                .map(|c| match c {
                    '/' | '\\' | '\0' => '_',
                    other => other,
                })
                .collect::<String>(),
            FileNamePolicy::Verbatim => declared_name.to_string(),
        };
        upload_dir.join(format!("{RECEIVED_PREFIX}{name}"))
    }
}

/// Parse the size line. Anything but a non-negative decimal integer is a
/// protocol violation.
pub fn parse_declared_size(line: &str) -> RctlResult<u64> {
    line.trim()
        .parse::<u64>()
        .map_err(|_| RctlError::InvalidSize(line.to_string()))
}

// ── Bounded payload reader ───────────────────────────────────────────

/// Result of draining a [`BoundedPayload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Copied {
    pub bytes: u64,
    /// Lowercase hex SHA-256 of the payload.
    pub sha256: String,
}

/// Reads exactly `declared` bytes from the underlying stream, or fails with
/// [`RctlError::Incomplete`] if the stream ends first.
pub struct BoundedPayload<'a, R> {
    inner: &'a mut R,
    declared: u64,
    received: u64,
}

impl<'a, R: AsyncRead + Unpin> BoundedPayload<'a, R> {
    pub fn new(inner: &'a mut R, declared: u64) -> Self {
        Self {
            inner,
            declared,
            received: 0,
        }
    }

    pub fn declared(&self) -> u64 {
        self.declared
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn remaining(&self) -> u64 {
        self.declared - self.received
    }

    /// Read the next chunk into `buf`. Returns 0 once the declared count is
    /// satisfied; never reads past it.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> RctlResult<usize> {
        let remaining = self.remaining();
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = self.inner.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(RctlError::Incomplete {
                expected: self.declared,
                received: self.received,
            });
        }
        self.received += n as u64;
        Ok(n)
    }

    /// Copy the whole payload into `sink`, checking `cancel` between chunks.
    pub async fn copy_to<W: AsyncWrite + Unpin>(
        &mut self,
        sink: &mut W,
        cancel: Option<&CancellationToken>,
    ) -> RctlResult<Copied> {
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            let n = match cancel {
                Some(token) => {
                    if token.is_cancelled() {
                        return Err(RctlError::Cancelled);
                    }
                    tokio::select! {
                        _ = token.cancelled() => return Err(RctlError::Cancelled),
                        r = self.read_chunk(&mut buf) => r?,
                    }
                }
                None => self.read_chunk(&mut buf).await?,
            };
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            sink.write_all(&buf[..n]).await?;
        }
        sink.flush().await?;

        Ok(Copied {
            bytes: self.received,
            sha256: hex::encode(hasher.finalize()),
        })
    }
}

// ── Receiver ─────────────────────────────────────────────────────────

/// A completed upload.
#[derive(Debug, Clone)]
pub struct ReceivedFile {
    pub request: FileTransferRequest,
    pub path: PathBuf,
    pub bytes: u64,
    pub sha256: String,
}

/// Receiving end of the transfer protocol (the server side).
#[derive(Debug, Clone)]
pub struct FileReceiver {
    upload_dir: PathBuf,
    policy: FileNamePolicy,
}

impl FileReceiver {
    pub fn new(upload_dir: impl Into<PathBuf>, policy: FileNamePolicy) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            policy,
        }
    }

    pub fn destination(&self, declared_name: &str) -> PathBuf {
        self.policy.destination(&self.upload_dir, declared_name)
    }

    /// Steps 1 and 2: ask for name and size.
    ///
    /// An unparsable size is answered with a rejection line before the
    /// error is returned.
    pub async fn negotiate<R, W>(
        &self,
        reader: &mut LineReader<R>,
        writer: &mut W,
    ) -> RctlResult<FileTransferRequest>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        write_line(writer, ControlToken::SendFileName.as_str()).await?;
        let declared_name = reader
            .read_line()
            .await?
            .ok_or_else(|| RctlError::Closed("peer closed before sending file name".into()))?;

        write_line(writer, ControlToken::SendFileSize.as_str()).await?;
        let size_line = reader
            .read_line()
            .await?
            .ok_or_else(|| RctlError::Closed("peer closed before sending file size".into()))?;

        let declared_size = match parse_declared_size(&size_line) {
            Ok(size) => size,
            Err(e) => {
                let _ = write_line(writer, &format!("{FILE_REJECTED} invalid size {size_line:?}")).await;
                return Err(e);
            }
        };

        Ok(FileTransferRequest {
            declared_name,
            declared_size,
        })
    }

    /// Steps 3 and 4: consume the payload into the destination and confirm.
    ///
    /// On any failure the partial file is removed and no confirmation is
    /// written.
    pub async fn store<R, W>(
        &self,
        request: &FileTransferRequest,
        reader: &mut LineReader<R>,
        writer: &mut W,
        cancel: Option<&CancellationToken>,
    ) -> RctlResult<ReceivedFile>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let dest = self.destination(&request.declared_name);
        let part = part_path(&dest);

        let copied = match self.copy_into(&part, request, reader, cancel).await {
            Ok(copied) => copied,
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&part).await {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %part.display(), error = %rm, "failed to remove partial upload");
                    }
                }
                return Err(e);
            }
        };

        tokio::fs::rename(&part, &dest).await?;
        debug!(path = %dest.display(), bytes = copied.bytes, "upload stored");

        write_line(writer, FILE_RECEIVED).await?;

        Ok(ReceivedFile {
            request: request.clone(),
            path: dest,
            bytes: copied.bytes,
            sha256: copied.sha256,
        })
    }

    async fn copy_into<R: AsyncRead + Unpin>(
        &self,
        part: &Path,
        request: &FileTransferRequest,
        reader: &mut LineReader<R>,
        cancel: Option<&CancellationToken>,
    ) -> RctlResult<Copied> {
        let mut file = tokio::fs::File::create(part).await?;
        let copied = reader
            .payload(request.declared_size)
            .copy_to(&mut file, cancel)
            .await?;
        file.sync_all().await?;
        Ok(copied)
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

// ── Sender ───────────────────────────────────────────────────────────

/// Where the sender gets the receiver's control tokens from.
///
/// The client's background reader forwards tokens over a channel; a plain
/// line reader works when the sender owns the inbound stream.
#[allow(async_fn_in_trait)]
pub trait ControlTokenSource {
    async fn next_token(&mut self) -> RctlResult<ControlToken>;
}

impl ControlTokenSource for mpsc::Receiver<ControlToken> {
    async fn next_token(&mut self) -> RctlResult<ControlToken> {
        self.recv()
            .await
            .ok_or_else(|| RctlError::Closed("control token channel closed".into()))
    }
}

impl<R: AsyncRead + Unpin> ControlTokenSource for LineReader<R> {
    async fn next_token(&mut self) -> RctlResult<ControlToken> {
        let line = self
            .read_line()
            .await?
            .ok_or_else(|| RctlError::Closed("peer closed during file transfer".into()))?;
        ControlToken::parse(&line)
            .ok_or_else(|| RctlError::Protocol(format!("expected control token, got {line:?}")))
    }
}

/// Sending end of the transfer protocol (the client side).
#[derive(Debug)]
pub struct FileSender {
    path: PathBuf,
    name: String,
    size: u64,
    file: tokio::fs::File,
}

impl FileSender {
    /// Open the local file and capture its name and size.
    pub async fn open(path: impl AsRef<Path>) -> RctlResult<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| RctlError::Other(format!("{} has no file name", path.display())))?;
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());

        Ok(Self {
            path,
            name,
            size,
            file,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// The `upload:<path>` request line that opens the transfer.
    pub fn request_line(&self) -> String {
        format!("{UPLOAD_PREFIX}{}", self.path.display())
    }

    /// Answer the name and size tokens, then stream the payload.
    ///
    /// `cancel` is checked before every chunk and aborts a blocked write.
    /// Returns the number of payload bytes written.
    pub async fn send<W, T>(
        mut self,
        writer: &mut W,
        tokens: &mut T,
        cancel: Option<&CancellationToken>,
    ) -> RctlResult<u64>
    where
        W: AsyncWrite + Unpin,
        T: ControlTokenSource,
    {
        expect_token(tokens, ControlToken::SendFileName).await?;
        write_line(writer, &self.name).await?;
        expect_token(tokens, ControlToken::SendFileSize).await?;
        write_line(writer, &self.size.to_string()).await?;

        let mut sent: u64 = 0;
        let mut buf = vec![0u8; CHUNK_SIZE];
        while sent < self.size {
            if cancel.is_some_and(|t| t.is_cancelled()) {
                return Err(RctlError::Cancelled);
            }
            let want = buf.len().min(usize::try_from(self.size - sent).unwrap_or(usize::MAX));
            let n = self.file.read(&mut buf[..want]).await?;
            if n == 0 {
                // File shrank after its size was declared.
                return Err(RctlError::Incomplete {
                    expected: self.size,
                    received: sent,
                });
            }
            match cancel {
                Some(token) => tokio::select! {
                    _ = token.cancelled() => return Err(RctlError::Cancelled),
                    r = writer.write_all(&buf[..n]) => r?,
                },
                None => writer.write_all(&buf[..n]).await?,
            }
            sent += n as u64;
        }
        writer.flush().await?;

        debug!(file = %self.name, bytes = sent, "upload payload sent");
        Ok(sent)
    }
}

async fn expect_token<T: ControlTokenSource>(tokens: &mut T, expected: ControlToken) -> RctlResult<()> {
    let got = tokens.next_token().await?;
    if got != expected {
        return Err(RctlError::Protocol(format!(
            "expected {}, got {}",
            expected.as_str(),
            got.as_str()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{SEND_FILE_NAME, SEND_FILE_SIZE};
    use tokio::io::{split, DuplexStream, ReadHalf, WriteHalf};

    type Half = (LineReader<ReadHalf<DuplexStream>>, WriteHalf<DuplexStream>);

    fn pipe() -> (Half, Half) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let (ar, aw) = split(a);
        let (br, bw) = split(b);
        ((LineReader::new(ar), aw), (LineReader::new(br), bw))
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    async fn round_trip(len: usize) {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("payload.bin");
        let data = pattern(len);
        std::fs::write(&src, &data).unwrap();
        let uploads = dir.path().join("uploads");
        std::fs::create_dir(&uploads).unwrap();

        let ((mut c_read, mut c_write), (mut s_read, mut s_write)) = pipe();
        let receiver = FileReceiver::new(&uploads, FileNamePolicy::Sanitize);

        let server = tokio::spawn(async move {
            let request = receiver.negotiate(&mut s_read, &mut s_write).await?;
            receiver.store(&request, &mut s_read, &mut s_write, None).await
        });

        let sender = FileSender::open(&src).await.unwrap();
        assert_eq!(sender.size(), len as u64);
        let sent = sender.send(&mut c_write, &mut c_read, None).await.unwrap();
        assert_eq!(sent, len as u64);
        assert_eq!(c_read.read_line().await.unwrap().as_deref(), Some(FILE_RECEIVED));

        let received = server.await.unwrap().unwrap();
        assert_eq!(received.request.declared_name, "payload.bin");
        assert_eq!(received.bytes, len as u64);
        assert_eq!(received.path, uploads.join("received_payload.bin"));
        assert_eq!(std::fs::read(&received.path).unwrap(), data);
        assert_eq!(received.sha256, hex::encode(Sha256::digest(&data)));
        assert!(!uploads.join("received_payload.bin.part").exists());
    }

    #[tokio::test]
    async fn round_trip_empty_file() {
        round_trip(0).await;
    }

    #[tokio::test]
    async fn round_trip_single_byte() {
        round_trip(1).await;
    }

    #[tokio::test]
    async fn round_trip_larger_than_chunk() {
        round_trip(1_000_000).await;
    }

    #[tokio::test]
    async fn severed_stream_is_incomplete_and_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let ((mut c_read, mut c_write), (mut s_read, mut s_write)) = pipe();
        let receiver = FileReceiver::new(dir.path(), FileNamePolicy::Sanitize);

        let server = tokio::spawn(async move {
            let request = receiver.negotiate(&mut s_read, &mut s_write).await?;
            receiver.store(&request, &mut s_read, &mut s_write, None).await
        });

        assert_eq!(c_read.read_line().await.unwrap().as_deref(), Some(SEND_FILE_NAME));
        write_line(&mut c_write, "cut.bin").await.unwrap();
        assert_eq!(c_read.read_line().await.unwrap().as_deref(), Some(SEND_FILE_SIZE));
        write_line(&mut c_write, "100").await.unwrap();
        c_write.write_all(&pattern(40)).await.unwrap();
        c_write.shutdown().await.unwrap();

        let err = server.await.unwrap().unwrap_err();
        match err {
            RctlError::Incomplete { expected, received } => {
                assert_eq!(expected, 100);
                assert_eq!(received, 40);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dir.path().join("received_cut.bin").exists());
        assert!(!dir.path().join("received_cut.bin.part").exists());
        // No confirmation line follows.
        assert_eq!(c_read.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn garbage_size_is_rejected() {
        for bad in ["abc", "-5", "12kb", ""] {
            let dir = tempfile::tempdir().unwrap();
            let ((mut c_read, mut c_write), (mut s_read, mut s_write)) = pipe();
            let receiver = FileReceiver::new(dir.path(), FileNamePolicy::Sanitize);

            let server = tokio::spawn(async move { receiver.negotiate(&mut s_read, &mut s_write).await });

            assert_eq!(c_read.read_line().await.unwrap().as_deref(), Some(SEND_FILE_NAME));
            write_line(&mut c_write, "f.txt").await.unwrap();
            assert_eq!(c_read.read_line().await.unwrap().as_deref(), Some(SEND_FILE_SIZE));
            write_line(&mut c_write, bad).await.unwrap();

            let err = server.await.unwrap().unwrap_err();
            assert!(matches!(err, RctlError::InvalidSize(_)), "{bad:?} gave {err}");
            let reply = c_read.read_line().await.unwrap().unwrap();
            assert!(reply.starts_with(FILE_REJECTED), "{reply}");
        }
    }

    #[test]
    fn size_parsing() {
        assert_eq!(parse_declared_size("0").unwrap(), 0);
        assert_eq!(parse_declared_size(" 1000000 ").unwrap(), 1_000_000);
        assert!(parse_declared_size("-1").is_err());
        assert!(parse_declared_size("1.5").is_err());
        assert!(parse_declared_size("99999999999999999999999").is_err());
    }

    #[test]
    fn sanitize_keeps_artifact_inside_upload_dir() {
        let dir = Path::new("/srv/uploads");
        for name in ["../../etc/passwd", "a/b.txt", "..\\win.ini", "/abs"] {
            let dest = FileNamePolicy::Sanitize.destination(dir, name);
            assert_eq!(dest.parent(), Some(dir), "{name}");
        }
        assert_eq!(
            FileNamePolicy::Sanitize.destination(dir, "../x"),
            dir.join("received_.._x")
        );
    }

    #[test]
    fn verbatim_preserves_declared_name() {
        let dir = Path::new("/srv/uploads");
        let dest = FileNamePolicy::Verbatim.destination(dir, "nested/x.txt");
        assert_eq!(dest, dir.join("received_nested").join("x.txt"));
        assert_ne!(dest.parent(), Some(dir));
    }

    #[tokio::test]
    async fn sender_rejects_unexpected_token_order() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"abc").unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        tx.send(ControlToken::SendFileSize).await.unwrap();
        let mut sink = Vec::new();
        let sender = FileSender::open(&src).await.unwrap();
        let err = sender.send(&mut sink, &mut rx, None).await.unwrap_err();
        assert!(matches!(err, RctlError::Protocol(_)));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn cancelled_sender_stops_between_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("big.bin");
        std::fs::write(&src, pattern(CHUNK_SIZE * 8)).unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        tx.send(ControlToken::SendFileName).await.unwrap();
        tx.send(ControlToken::SendFileSize).await.unwrap();

        // A tiny pipe nobody drains: the first chunk write blocks.
        let (mut near, _far) = tokio::io::duplex(CHUNK_SIZE / 2);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let sender = FileSender::open(&src).await.unwrap();
        let err = sender.send(&mut near, &mut rx, Some(&cancel)).await.unwrap_err();
        assert!(matches!(err, RctlError::Cancelled));
    }

    #[tokio::test]
    async fn request_line_carries_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("doc.txt");
        std::fs::write(&src, b"x").unwrap();
        let sender = FileSender::open(&src).await.unwrap();
        let line = sender.request_line();
        assert!(line.starts_with(UPLOAD_PREFIX));
        assert!(line.ends_with("doc.txt"));
        assert_eq!(sender.name(), "doc.txt");
    }
}
