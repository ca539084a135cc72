//! In-process transport wired to an [`EchoServer`] over a duplex pipe.

use tokio_util::sync::CancellationToken;

use super::TransportError;
use super::lines::LineChannel;
use crate::echo::EchoServer;
use crate::protocol::JsonRpcMessage;

const PIPE_CAPACITY: usize = 64 * 1024;

#[derive(Debug)]
pub struct MemoryTransport {
    channel: LineChannel,
    kill: CancellationToken,
}

impl MemoryTransport {
    /// Start `server` on a background task and connect to it.
    ///
    /// Cancelling `kill` drops the server end, which the client observes as
    /// the remote closing.
    pub fn connect(server: EchoServer, kill: CancellationToken) -> Self {
        let (client, remote) = tokio::io::duplex(PIPE_CAPACITY);
        let (remote_read, remote_write) = tokio::io::split(remote);
        let token = kill.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                result = server.serve(remote_read, remote_write) => {
                    if let Err(e) = result {
                        tracing::debug!(error = %e, "in-memory server stopped");
                    }
                }
            }
        });

        let (read_half, write_half) = tokio::io::split(client);
        Self {
            channel: LineChannel::new(read_half, write_half),
            kill,
        }
    }

    pub async fn send(&self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        if self.kill.is_cancelled() {
            return Err(TransportError::Closed("in-memory server stopped".into()));
        }
        self.channel.send(message).await
    }

    pub async fn receive(&self) -> Result<JsonRpcMessage, TransportError> {
        tokio::select! {
            biased;
            message = self.channel.receive() => message,
            () = self.kill.cancelled() => Err(TransportError::Closed("in-memory server stopped".into())),
        }
    }

    pub fn close(&self) {
        self.kill.cancel();
    }
}
