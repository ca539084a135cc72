//! Test support: a transport factory backed by in-process echo servers.
//!
//! Available under `cfg(test)` and the `test-utils` feature.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use hubgate_core::ServerRegistration;
use tokio_util::sync::CancellationToken;

use crate::echo::EchoServer;
use crate::transport::{MemoryTransport, Transport, TransportError, TransportFactory};

struct Live {
    server: EchoServer,
    kill: CancellationToken,
}

/// Opens a fresh [`EchoServer`] instance per `open` and counts attempts.
///
/// Instances share the template's counters, so `server().stats()` sees every
/// handshake across reconnects.
pub struct EchoTransportFactory {
    template: EchoServer,
    opens: AtomicUsize,
    fail_next: AtomicUsize,
    live: Mutex<Vec<Live>>,
}

impl std::fmt::Debug for EchoTransportFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EchoTransportFactory")
            .field("opens", &self.opens())
            .finish_non_exhaustive()
    }
}

impl EchoTransportFactory {
    pub fn new(template: EchoServer) -> Self {
        Self {
            template,
            opens: AtomicUsize::new(0),
            fail_next: AtomicUsize::new(0),
            live: Mutex::new(Vec::new()),
        }
    }

    pub const fn server(&self) -> &EchoServer {
        &self.template
    }

    /// Open attempts so far, including failed ones.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Make the next `n` opens fail with a connect error.
    pub fn fail_next_opens(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Drop the server end of every open transport.
    pub fn kill_all(&self) {
        for live in self.live_servers().iter() {
            live.kill.cancel();
        }
    }

    /// Stop every currently open server from answering.
    pub fn stall_all(&self) {
        for live in self.live_servers().iter() {
            live.server.set_stalled(true);
        }
    }

    fn live_servers(&self) -> std::sync::MutexGuard<'_, Vec<Live>> {
        self.live
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl TransportFactory for EchoTransportFactory {
    async fn open(&self, registration: &ServerRegistration) -> Result<Transport, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        let should_fail = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(TransportError::Connect {
                url: format!("memory://{}", registration.id),
                reason: "injected failure".into(),
            });
        }

        let server = self.template.instance();
        let kill = CancellationToken::new();
        {
            let mut live = self.live_servers();
            live.retain(|l| !l.kill.is_cancelled());
            live.push(Live {
                server: server.clone(),
                kill: kill.clone(),
            });
        }
        Ok(Transport::Memory(MemoryTransport::connect(server, kill)))
    }
}
