//! Newline-delimited text codec for the rctl control stream.
//!
//! Wire format: `<utf-8 text>\n`. A trailing `\r` is tolerated and stripped.
//! Raw file payloads share the same buffered reader, so bytes that arrive
//! together with a size line are never lost.

use crate::error::{RctlError, RctlResult};
use crate::transfer::BoundedPayload;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Default upper bound for a single protocol line (64 KiB).
pub const DEFAULT_MAX_LINE: usize = 64 * 1024;

/// Buffered line reader over the inbound half of a session stream.
#[derive(Debug)]
pub struct LineReader<R> {
    inner: BufReader<R>,
    max_line: usize,
    idle_timeout: Option<Duration>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            max_line: DEFAULT_MAX_LINE,
            idle_timeout: None,
        }
    }

    /// Reject lines longer than `max_line` bytes as a protocol violation.
    /// `usize::MAX` disables the check.
    pub fn with_max_line(mut self, max_line: usize) -> Self {
        self.max_line = max_line;
        self
    }

    /// Fail a read with [`RctlError::Timeout`] when nothing arrives in time.
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Read the next line without its terminator.
    ///
    /// Returns `None` at end of stream. A final unterminated line is
    /// returned as-is.
    pub async fn read_line(&mut self) -> RctlResult<Option<String>> {
        match self.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, self.read_line_inner()).await?,
            None => self.read_line_inner().await,
        }
    }

    async fn read_line_inner(&mut self) -> RctlResult<Option<String>> {
        let mut buf = Vec::new();
        let limit = (self.max_line as u64).saturating_add(1);
        let n = (&mut self.inner).take(limit).read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Ok(None);
        }

        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        } else if buf.len() > self.max_line {
            return Err(RctlError::Protocol(format!(
                "line exceeds {} bytes",
                self.max_line
            )));
        }

        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    /// Borrow the stream as a reader of exactly `declared` raw bytes.
    pub fn payload(&mut self, declared: u64) -> BoundedPayload<'_, BufReader<R>> {
        BoundedPayload::new(&mut self.inner, declared)
    }

    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

/// Write one line followed by `\n` and flush.
///
/// `line` may itself contain newlines (multi-line command output); they are
/// sent unchanged.
pub async fn write_line<W: AsyncWrite + Unpin + ?Sized>(writer: &mut W, line: &str) -> RctlResult<()> {
    let mut frame = Vec::with_capacity(line.len() + 1);
    frame.extend_from_slice(line.as_bytes());
    frame.push(b'\n');
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
