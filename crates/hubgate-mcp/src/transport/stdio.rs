//! Subprocess transport: newline-delimited JSON over the child's stdin/stdout.
//!
//! A watcher task owns the `Child`. It reaps the process when it exits on its
//! own, or terminates it when the transport is closed. `kill_on_drop` covers
//! the case where the runtime tears the watcher down first.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::lines::{Frame, LineChannel, read_frame};
use super::{MAX_FRAME_BYTES, TransportError};
use super::shutdown::shutdown_child;
use crate::protocol::JsonRpcMessage;

#[derive(Debug)]
pub struct StdioTransport {
    server_id: String,
    channel: LineChannel,
    pid: Option<u32>,
    exited: CancellationToken,
    shutdown_tx: std::sync::Mutex<Option<oneshot::Sender<()>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Launch `command` and wire its pipes.
    pub fn spawn(
        server_id: &str,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
        grace: Duration,
    ) -> Result<Self, TransportError> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransportError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Closed("missing stdin pipe".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Closed("missing stdout pipe".into()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(server_id.to_string(), stderr));
        }

        let pid = child.id();
        let exited = CancellationToken::new();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let watcher = tokio::spawn(watch_child(
            server_id.to_string(),
            child,
            shutdown_rx,
            exited.clone(),
            grace,
        ));

        tracing::debug!(server_id, command, ?pid, "spawned stdio server");

        Ok(Self {
            server_id: server_id.to_string(),
            channel: LineChannel::new(stdout, stdin),
            pid,
            exited,
            shutdown_tx: std::sync::Mutex::new(Some(shutdown_tx)),
            watcher: Mutex::new(Some(watcher)),
        })
    }

    pub const fn process_id(&self) -> Option<u32> {
        self.pid
    }

    pub async fn send(&self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        if self.exited.is_cancelled() {
            return Err(TransportError::Closed(format!(
                "server process {} has exited",
                self.server_id
            )));
        }
        self.channel.send(message).await
    }

    pub async fn receive(&self) -> Result<JsonRpcMessage, TransportError> {
        // Buffered output is drained before the exit is reported.
        tokio::select! {
            biased;
            message = self.channel.receive() => message,
            () = self.exited.cancelled() => Err(TransportError::Closed(format!(
                "server process {} has exited",
                self.server_id
            ))),
        }
    }

    pub async fn close(&self) {
        let sender = self
            .shutdown_tx
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
        self.channel.shutdown_writer().await;
        let watcher = self.watcher.lock().await.take();
        if let Some(watcher) = watcher {
            let _ = watcher.await;
        }
    }
}

/// Log the child's stderr until EOF.
///
/// The pipe must stay open for the child's whole life: closing the read end
/// would kill the server with SIGPIPE on its next write.
async fn drain_stderr(server_id: String, stderr: impl AsyncRead + Unpin) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match read_frame(&mut reader, &mut buf, MAX_FRAME_BYTES).await {
            Ok(Frame::Eof) => break,
            Ok(Frame::Line) => {
                let line = String::from_utf8_lossy(&buf);
                tracing::debug!(server_id = %server_id, "stderr: {}", line.trim_end());
            }
            Ok(Frame::Oversized(bytes)) => {
                tracing::debug!(server_id = %server_id, bytes, "stderr: oversized line dropped");
            }
            Err(e) => {
                tracing::debug!(server_id = %server_id, error = %e, "stderr read failed");
                break;
            }
        }
    }
}

async fn watch_child(
    server_id: String,
    mut child: Child,
    shutdown_rx: oneshot::Receiver<()>,
    exited: CancellationToken,
    grace: Duration,
) {
    // A dropped sender counts as a shutdown request too.
    let requested = tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) => tracing::info!(server_id = %server_id, %status, "server process exited"),
                Err(e) => tracing::warn!(server_id = %server_id, error = %e, "failed to wait on server process"),
            }
            false
        }
        _ = shutdown_rx => true,
    };

    if requested {
        match shutdown_child(child, grace).await {
            Ok(status) => tracing::debug!(server_id = %server_id, %status, "server process stopped"),
            Err(e) => tracing::warn!(server_id = %server_id, error = %e, "failed to stop server process"),
        }
    }
    exited.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncWriteExt, duplex};

    #[tokio::test]
    async fn stderr_drain_survives_invalid_utf8() {
        // A small pipe blocks the writer as soon as the drain stops reading.
        let (mut child_side, drain_side) = duplex(32);
        let drain = tokio::spawn(drain_stderr("s1".into(), drain_side));

        let writes = async {
            child_side.write_all(b"bad \xff\xfe bytes\n").await.unwrap();
            for i in 0..200 {
                child_side
                    .write_all(format!("line {i}\n").as_bytes())
                    .await
                    .unwrap();
            }
        };
        tokio::time::timeout(Duration::from_secs(5), writes)
            .await
            .expect("drain stopped reading stderr");

        drop(child_side);
        tokio::time::timeout(Duration::from_secs(5), drain)
            .await
            .expect("drain did not finish at EOF")
            .unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn child_outlives_invalid_stderr() {
        let script = "printf 'bad \\377\\n' >&2; sleep 0.2; \
                      i=0; while [ $i -lt 200 ]; do echo noise $i >&2; i=$((i+1)); done; \
                      echo '{\"jsonrpc\":\"2.0\",\"method\":\"notifications/ready\"}'; sleep 5";
        let transport = StdioTransport::spawn(
            "sh",
            "sh",
            &["-c".to_string(), script.to_string()],
            &BTreeMap::new(),
            Duration::from_millis(100),
        )
        .unwrap();

        let message = tokio::time::timeout(Duration::from_secs(5), transport.receive())
            .await
            .expect("no message from child")
            .unwrap();
        assert!(matches!(message, JsonRpcMessage::Notification(_)));
        transport.close().await;
    }
}
