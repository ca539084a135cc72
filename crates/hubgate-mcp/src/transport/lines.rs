//! Newline-delimited JSON framing over a byte stream pair.
//!
//! Lines are read as raw bytes. Anything that does not parse as JSON-RPC,
//! including invalid UTF-8, is logged and skipped.

use std::pin::Pin;

use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::sync::Mutex;

use super::{MAX_FRAME_BYTES, TransportError};
use crate::protocol::JsonRpcMessage;

type Reader = BufReader<Pin<Box<dyn AsyncRead + Send>>>;
type Writer = Pin<Box<dyn AsyncWrite + Send>>;

/// One JSON-RPC message per line in each direction.
pub(super) struct LineChannel {
    reader: Mutex<Reader>,
    writer: Mutex<Writer>,
}

impl std::fmt::Debug for LineChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineChannel").finish_non_exhaustive()
    }
}

impl LineChannel {
    pub(super) fn new(
        reader: impl AsyncRead + Send + 'static,
        writer: impl AsyncWrite + Send + 'static,
    ) -> Self {
        let reader: Pin<Box<dyn AsyncRead + Send>> = Box::pin(reader);
        Self {
            reader: Mutex::new(BufReader::new(reader)),
            writer: Mutex::new(Box::pin(writer)),
        }
    }

    pub(super) async fn send(&self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .map_err(|e| closed_or_io(e, "write to server failed"))?;
        writer
            .flush()
            .await
            .map_err(|e| closed_or_io(e, "flush to server failed"))
    }

    /// Read until a line parses as a JSON-RPC message.
    ///
    /// Blank lines, lines that are not JSON-RPC (servers sometimes log to
    /// stdout) and lines over [`MAX_FRAME_BYTES`] are skipped.
    pub(super) async fn receive(&self) -> Result<JsonRpcMessage, TransportError> {
        let mut reader = self.reader.lock().await;
        let mut line = Vec::new();
        loop {
            line.clear();
            match read_frame(&mut *reader, &mut line, MAX_FRAME_BYTES).await? {
                Frame::Eof => {
                    return Err(TransportError::Closed("server closed its output".into()));
                }
                Frame::Oversized(bytes) => {
                    tracing::warn!(bytes, limit = MAX_FRAME_BYTES, "dropping oversized line from server");
                    continue;
                }
                Frame::Line => {}
            }
            let trimmed = line.trim_ascii();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_slice::<JsonRpcMessage>(trimmed) {
                Ok(message) => return Ok(message),
                Err(e) => {
                    tracing::debug!(
                        error = %e,
                        line = %String::from_utf8_lossy(trimmed),
                        "skipping non JSON-RPC line"
                    );
                }
            }
        }
    }

    pub(super) async fn shutdown_writer(&self) {
        let _ = self.writer.lock().await.shutdown().await;
    }
}

/// Outcome of [`read_frame`].
#[derive(Debug, PartialEq, Eq)]
pub(super) enum Frame {
    /// `buf` holds one line, with its newline unless the stream ended first.
    Line,
    /// A line longer than the limit was read and thrown away.
    Oversized(usize),
    Eof,
}

/// Read one newline-terminated line into `buf`, buffering at most `max`
/// bytes of it.
pub(super) async fn read_frame<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max: usize,
) -> std::io::Result<Frame>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let limit = u64::try_from(max).unwrap_or(u64::MAX).saturating_add(1);
    let read = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
    if read == 0 {
        return Ok(Frame::Eof);
    }
    if buf.last() == Some(&b'\n') || buf.len() <= max {
        return Ok(Frame::Line);
    }

    // Discard the rest of the line in bounded pieces.
    let mut discarded = buf.len();
    loop {
        buf.clear();
        let read = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
        discarded += read;
        if read == 0 || buf.last() == Some(&b'\n') {
            break;
        }
    }
    buf.clear();
    Ok(Frame::Oversized(discarded))
}

fn closed_or_io(err: std::io::Error, context: &str) -> TransportError {
    match err.kind() {
        std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset => {
            TransportError::Closed(format!("{context}: {err}"))
        }
        _ => TransportError::Io(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::JsonRpcRequest;
    use tokio::io::{AsyncReadExt, duplex};

    #[tokio::test]
    async fn skips_noise_and_reads_messages() {
        let (client, mut server) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(client);
        let channel = LineChannel::new(read_half, write_half);

        server
            .write_all(b"\nstarting up...\n{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n")
            .await
            .unwrap();

        let message = channel.receive().await.unwrap();
        assert!(matches!(message, JsonRpcMessage::Response(_)));
    }

    #[tokio::test]
    async fn skips_invalid_utf8_lines() {
        let (client, mut server) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(client);
        let channel = LineChannel::new(read_half, write_half);

        server
            .write_all(b"log \xff\xfe noise\n{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n")
            .await
            .unwrap();

        let message = channel.receive().await.unwrap();
        assert!(matches!(message, JsonRpcMessage::Response(_)));
    }

    #[tokio::test]
    async fn oversized_line_is_dropped_and_reading_resumes() {
        let mut input: Vec<u8> = vec![b'x'; 100];
        input.extend_from_slice(b"\nshort\ntail");
        let mut reader = BufReader::with_capacity(8, input.as_slice());
        let mut buf = Vec::new();

        let frame = read_frame(&mut reader, &mut buf, 16).await.unwrap();
        assert_eq!(frame, Frame::Oversized(101));
        assert!(buf.is_empty());

        assert_eq!(read_frame(&mut reader, &mut buf, 16).await.unwrap(), Frame::Line);
        assert_eq!(buf, b"short\n");

        buf.clear();
        assert_eq!(read_frame(&mut reader, &mut buf, 16).await.unwrap(), Frame::Line);
        assert_eq!(buf, b"tail");

        buf.clear();
        assert_eq!(read_frame(&mut reader, &mut buf, 16).await.unwrap(), Frame::Eof);
    }

    #[tokio::test]
    async fn line_at_limit_is_kept() {
        let input = b"0123456789abcdef\n";
        let mut reader = BufReader::new(&input[..]);
        let mut buf = Vec::new();
        assert_eq!(read_frame(&mut reader, &mut buf, 16).await.unwrap(), Frame::Line);
        assert_eq!(buf.len(), 17);
    }

    #[tokio::test]
    async fn eof_is_closed() {
        let (client, server) = duplex(64);
        let (read_half, write_half) = tokio::io::split(client);
        let channel = LineChannel::new(read_half, write_half);
        drop(server);

        let err = channel.receive().await.unwrap_err();
        assert!(matches!(err, TransportError::Closed(_)));
    }

    #[tokio::test]
    async fn send_writes_one_line() {
        let (client, mut server) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(client);
        let channel = LineChannel::new(read_half, write_half);

        channel
            .send(&JsonRpcRequest::new(1u64, "ping", None).into())
            .await
            .unwrap();

        let mut buf = vec![0u8; 64];
        let n = server.read(&mut buf).await.unwrap();
        let text = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(text.ends_with('\n'));
        assert_eq!(text.matches('\n').count(), 1);
    }
}
