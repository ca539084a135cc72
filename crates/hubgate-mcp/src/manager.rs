//! Session table and lifecycle.
//!
//! The connection manager is the only owner of live sessions. It creates them
//! lazily with single-flight semantics per server id, evicts idle ones,
//! probes the rest, and drives reconnection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures_util::future::join_all;
use hubgate_core::{
    CapabilitySnapshot, GatewayConfig, GatewayError, GatewayEvent, GatewayEventEmitter,
    GatewayHealth, NoopEmitter, RegistrationStatus, RegistryStore, ServerRegistration,
    SessionState, SessionStatus,
};
use tokio::sync::{OnceCell, RwLock};

use crate::handshake::{self, HandshakeInfo};
use crate::session::Session;
use crate::transport::TransportFactory;

type Creation = Arc<OnceCell<Result<Arc<Session>, GatewayError>>>;

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions removed for being idle.
    pub evicted: Vec<String>,
    /// Number of liveness probes issued.
    pub probed: usize,
    /// Degraded sessions replaced by a fresh handshake.
    pub reconnected: Vec<String>,
    /// Sessions removed after reconnection failed.
    pub invalidated: Vec<String>,
}

impl SweepReport {
    pub fn is_quiet(&self) -> bool {
        self.evicted.is_empty() && self.reconnected.is_empty() && self.invalidated.is_empty()
    }
}

pub struct ConnectionManager {
    registry: Arc<dyn RegistryStore>,
    factory: Arc<dyn TransportFactory>,
    emitter: Arc<dyn GatewayEventEmitter>,
    config: GatewayConfig,
    /// Live sessions indexed by server id
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    /// In-flight creations, one per server id
    inflight: Mutex<HashMap<String, Creation>>,
    /// Last creation failure per server id, for status reporting
    failures: Mutex<HashMap<String, String>>,
    shutting_down: AtomicBool,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub fn new(
        registry: Arc<dyn RegistryStore>,
        factory: Arc<dyn TransportFactory>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            registry,
            factory,
            emitter: Arc::new(NoopEmitter::new()),
            config,
            sessions: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Route lifecycle events to `emitter`.
    #[must_use]
    pub fn with_emitter(mut self, emitter: Arc<dyn GatewayEventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    pub const fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<dyn RegistryStore> {
        &self.registry
    }

    /// Return the Ready session for `server_id`, creating it if needed.
    ///
    /// Concurrent callers for the same id share one creation attempt and all
    /// receive its outcome.
    ///
    /// # Errors
    ///
    /// - `ServerNotRegistered` if the registry has no such server
    /// - `Transport` / `Handshake` if opening or negotiating fails
    /// - `CapacityExhausted` if the session cap is reached and nothing is evictable
    pub async fn acquire(&self, server_id: &str) -> Result<Arc<Session>, GatewayError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(GatewayError::closed("gateway is shutting down"));
        }

        // Fast path: already connected
        if let Some(session) = self.session(server_id).await {
            if session.is_ready() {
                return Ok(session);
            }
        }

        // A settled cell may still be parked here; its result is stale.
        let creation = {
            let mut inflight = lock(&self.inflight);
            let slot = inflight.entry(server_id.to_string()).or_default();
            if slot.initialized() {
                *slot = Creation::default();
            }
            Arc::clone(slot)
        };

        let result = creation
            .get_or_init(|| self.create_session(server_id))
            .await
            .clone();

        {
            let mut inflight = lock(&self.inflight);
            if inflight
                .get(server_id)
                .is_some_and(|current| Arc::ptr_eq(current, &creation))
            {
                inflight.remove(server_id);
            }
        }

        result
    }

    async fn create_session(&self, server_id: &str) -> Result<Arc<Session>, GatewayError> {
        let existing = self.session(server_id).await;
        if let Some(session) = &existing {
            if session.is_ready() {
                return Ok(Arc::clone(session));
            }
        }

        let registration = self.registry.get_registration(server_id).await?;

        // A Degraded or Closed session is replaced; its in-flight requests fail.
        if let Some(old) = existing {
            self.remove_session(server_id, &old, "replaced by a new session")
                .await;
        }

        self.ensure_capacity().await?;

        let started = Instant::now();
        let session = match self.open_session(&registration).await {
            Ok(session) => session,
            Err(e) => {
                lock(&self.failures).insert(server_id.to_string(), e.to_string());
                tracing::warn!(
                    server_id = %server_id,
                    transport = %registration.kind(),
                    error = %e,
                    "failed to open session"
                );
                return Err(e);
            }
        };

        self.sessions
            .write()
            .await
            .insert(server_id.to_string(), Arc::clone(&session));
        lock(&self.failures).remove(server_id);

        if self.shutting_down.load(Ordering::SeqCst) {
            self.remove_session(server_id, &session, "gateway is shutting down")
                .await;
            return Err(GatewayError::closed("gateway is shutting down"));
        }

        let Some(info) = session.handshake() else {
            return Err(GatewayError::handshake("session has no handshake result"));
        };

        tracing::info!(
            server_id = %server_id,
            transport = %session.kind(),
            protocol_version = %info.protocol_version,
            tools = info.capabilities.tools.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "session opened"
        );

        self.emitter.emit(GatewayEvent::session_opened(
            server_id,
            session.kind(),
            info.protocol_version.clone(),
        ));
        self.emitter.emit(GatewayEvent::capabilities_discovered(
            server_id,
            info.capabilities.clone(),
        ));
        if let Err(e) = self
            .registry
            .record_capabilities(server_id, &info.capabilities)
            .await
        {
            tracing::warn!(server_id = %server_id, error = %e, "failed to cache capabilities");
        }

        Ok(session)
    }

    /// Open a transport and run the handshake. The session is closed again
    /// on failure.
    async fn open_session(
        &self,
        registration: &ServerRegistration,
    ) -> Result<Arc<Session>, GatewayError> {
        let transport = self.factory.open(registration).await?;
        let session = Session::new(&registration.id, transport, &self.config);
        match handshake::run(&session, self.config.handshake_timeout).await {
            Ok(info) => {
                session.mark_ready(info);
                Ok(session)
            }
            Err(e) => {
                session.close("handshake failed").await;
                Err(e)
            }
        }
    }

    /// Evict least-recently-used sessions until there is room for one more.
    async fn ensure_capacity(&self) -> Result<(), GatewayError> {
        let max = self.config.max_sessions;
        loop {
            let victim = {
                let sessions = self.sessions.read().await;
                if sessions.len() < max {
                    return Ok(());
                }
                sessions
                    .values()
                    .filter(|s| s.is_evictable())
                    .min_by_key(|s| s.last_activity())
                    .cloned()
            };
            let Some(victim) = victim else {
                return Err(GatewayError::CapacityExhausted(max));
            };
            tracing::info!(server_id = %victim.server_id(), max, "evicting session to make room");
            self.remove_session(victim.server_id(), &victim, "evicted to make room")
                .await;
        }
    }

    /// Remove `session` if it is still the one registered under `server_id`,
    /// then close it.
    async fn remove_session(&self, server_id: &str, session: &Arc<Session>, reason: &str) -> bool {
        let removed = {
            let mut sessions = self.sessions.write().await;
            if sessions
                .get(server_id)
                .is_some_and(|current| Arc::ptr_eq(current, session))
            {
                sessions.remove(server_id);
                true
            } else {
                false
            }
        };
        session.close(reason).await;
        if removed {
            self.emitter
                .emit(GatewayEvent::session_closed(server_id, reason));
        }
        removed
    }

    /// Close and remove the session for `server_id`, if any.
    ///
    /// Outstanding requests fail with `ConnectionClosed`.
    pub async fn invalidate(&self, server_id: &str, reason: &str) -> bool {
        let Some(session) = self.sessions.write().await.remove(server_id) else {
            return false;
        };
        session.close(reason).await;
        self.emitter
            .emit(GatewayEvent::session_closed(server_id, reason));
        tracing::info!(server_id = %server_id, reason, "session invalidated");
        true
    }

    /// Live session for `server_id` without creating one.
    pub async fn session(&self, server_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(server_id).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Current state for one server. Never creates a session.
    pub async fn status(&self, server_id: &str) -> SessionStatus {
        match self.session(server_id).await {
            Some(session) => session.status(),
            None => SessionStatus::closed(server_id, lock(&self.failures).get(server_id).cloned()),
        }
    }

    /// Aggregate over all live sessions. Never creates a session.
    pub async fn health(&self) -> GatewayHealth {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        GatewayHealth::from_statuses(sessions.iter().map(|s| s.status()))
    }

    /// One maintenance pass: evict idle sessions, probe the rest, reconnect
    /// failed ones once, invalidate what cannot be recovered.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();

        let mut to_probe = Vec::new();
        let mut to_reconnect = Vec::new();

        for session in sessions {
            let server_id = session.server_id().to_string();
            match session.state() {
                SessionState::Closed => {
                    self.remove_session(&server_id, &session, "session closed")
                        .await;
                }
                _ if session.is_idle(self.config.idle_timeout) => {
                    if self
                        .remove_session(&server_id, &session, "idle timeout")
                        .await
                    {
                        tracing::info!(server_id = %server_id, "idle session evicted");
                        report.evicted.push(server_id);
                    }
                }
                SessionState::Degraded => {
                    let reason = session.error().unwrap_or_else(|| "degraded".to_string());
                    self.emitter
                        .emit(GatewayEvent::session_degraded(&server_id, reason));
                    to_reconnect.push(session);
                }
                SessionState::Ready | SessionState::Connecting => to_probe.push(session),
            }
        }

        let timeout = self.config.probe_timeout;
        let probes = join_all(to_probe.into_iter().map(|session| async move {
            let result = session.probe(timeout).await;
            (session, result)
        }))
        .await;
        report.probed = probes.len();

        for (session, result) in probes {
            let Err(e) = result else { continue };
            let reason = format!("liveness probe failed: {e}");
            tracing::warn!(server_id = %session.server_id(), error = %e, "liveness probe failed");
            if session.mark_degraded(reason.clone()) {
                self.emitter
                    .emit(GatewayEvent::session_degraded(session.server_id(), reason));
            }
            to_reconnect.push(session);
        }

        for session in to_reconnect {
            let server_id = session.server_id().to_string();
            if self.reconnect(&server_id).await {
                report.reconnected.push(server_id);
            } else {
                report.invalidated.push(server_id);
            }
        }

        if !report.is_quiet() {
            tracing::info!(
                evicted = report.evicted.len(),
                probed = report.probed,
                reconnected = report.reconnected.len(),
                invalidated = report.invalidated.len(),
                "sweep finished"
            );
        }
        report
    }

    /// One re-handshake attempt; invalidates on failure.
    async fn reconnect(&self, server_id: &str) -> bool {
        match self.acquire(server_id).await {
            Ok(_) => {
                tracing::info!(server_id = %server_id, "session reconnected");
                self.emitter
                    .emit(GatewayEvent::session_reconnected(server_id));
                true
            }
            Err(e) => {
                tracing::warn!(server_id = %server_id, error = %e, "reconnection failed");
                self.invalidate(server_id, &format!("reconnection failed: {e}"))
                    .await;
                false
            }
        }
    }

    /// Close every session and refuse new ones. Returns how many were closed.
    pub async fn shutdown(&self) -> usize {
        self.shutting_down.store(true, Ordering::SeqCst);
        let drained: Vec<(String, Arc<Session>)> = self.sessions.write().await.drain().collect();
        let count = drained.len();

        join_all(drained.iter().map(|(_, session)| session.close("gateway shutdown"))).await;
        for (server_id, _) in &drained {
            self.emitter
                .emit(GatewayEvent::session_closed(server_id, "gateway shutdown"));
        }

        tracing::info!(count, "connection manager shut down");
        count
    }

    /// Handshake against a registration with a throwaway session.
    ///
    /// Used when registering or verifying a server; the live session table is
    /// not touched.
    pub async fn discover(
        &self,
        registration: &ServerRegistration,
    ) -> Result<HandshakeInfo, GatewayError> {
        let session = self.open_session(registration).await?;
        let info = session.handshake();
        session.close("discovery complete").await;
        info.map(|info| (*info).clone())
            .ok_or_else(|| GatewayError::handshake("session has no handshake result"))
    }

    /// Re-discover a registered server and record the outcome in the registry.
    pub async fn verify(&self, server_id: &str) -> Result<CapabilitySnapshot, GatewayError> {
        let registration = self.registry.get_registration(server_id).await?;
        match self.discover(&registration).await {
            Ok(info) => {
                self.registry
                    .record_capabilities(server_id, &info.capabilities)
                    .await?;
                self.registry
                    .update_status(server_id, RegistrationStatus::Active)
                    .await?;
                self.emitter.emit(GatewayEvent::capabilities_discovered(
                    server_id,
                    info.capabilities.clone(),
                ));
                Ok(info.capabilities)
            }
            Err(e) => {
                if let Err(store) = self
                    .registry
                    .update_status(server_id, RegistrationStatus::Error)
                    .await
                {
                    tracing::warn!(server_id = %server_id, error = %store, "failed to record verification status");
                }
                Err(e)
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::echo::EchoServer;
    use crate::testing::EchoTransportFactory;
    use async_trait::async_trait;
    use hubgate_core::{
        InMemoryRegistry, NewServerRegistration, RegistryError, RegistryFilter, TransportConfig,
    };
    use mockall::mock;
    use std::time::Duration;

    fn registration(id: &str) -> ServerRegistration {
        NewServerRegistration::new(TransportConfig::stdio("echo", vec![])).into_registration(id)
    }

    fn registry(ids: &[&str]) -> Arc<InMemoryRegistry> {
        Arc::new(InMemoryRegistry::with_registrations(
            ids.iter().map(|id| registration(id)).collect(),
        ))
    }

    fn manager(
        ids: &[&str],
        factory: &Arc<EchoTransportFactory>,
        config: GatewayConfig,
    ) -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(
            registry(ids),
            Arc::clone(factory) as Arc<dyn TransportFactory>,
            config,
        ))
    }

    #[tokio::test]
    async fn unknown_server_is_not_registered() {
        let factory = Arc::new(EchoTransportFactory::new(EchoServer::new()));
        let manager = manager(&[], &factory, GatewayConfig::default());
        let err = manager.acquire("missing").await.unwrap_err();
        assert!(matches!(err, GatewayError::ServerNotRegistered(_)));
        assert_eq!(factory.opens(), 0);
    }

    #[tokio::test]
    async fn concurrent_acquire_runs_one_handshake() {
        let server = EchoServer::new();
        let factory = Arc::new(EchoTransportFactory::new(server.clone()));
        let manager = manager(&["a"], &factory, GatewayConfig::default());

        let calls = (0..16).map(|_| {
            let manager = Arc::clone(&manager);
            async move { manager.acquire("a").await }
        });
        let sessions = join_all(calls).await;

        let first = sessions[0].as_ref().unwrap();
        for session in &sessions {
            assert!(Arc::ptr_eq(first, session.as_ref().unwrap()));
        }
        assert_eq!(factory.opens(), 1);
        assert_eq!(server.stats().initializations(), 1);
        assert_eq!(manager.session_count().await, 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_a_failure() {
        let factory = Arc::new(EchoTransportFactory::new(EchoServer::new()));
        factory.fail_next_opens(1);
        let manager = manager(&["a"], &factory, GatewayConfig::default());

        let calls = (0..8).map(|_| {
            let manager = Arc::clone(&manager);
            async move { manager.acquire("a").await }
        });
        let results = join_all(calls).await;
        assert!(results
            .iter()
            .all(|r| matches!(r, Err(GatewayError::Transport(_)))));
        assert_eq!(factory.opens(), 1);

        let status = manager.status("a").await;
        assert_eq!(status.state, SessionState::Closed);
        assert!(status.error.is_some());

        // The next demand retries from scratch.
        manager.acquire("a").await.unwrap();
        assert_eq!(factory.opens(), 2);
    }

    #[tokio::test]
    async fn failed_handshake_is_not_cached() {
        let factory = Arc::new(EchoTransportFactory::new(
            EchoServer::new().with_protocol_version("1999-01-01"),
        ));
        let manager = manager(&["a"], &factory, GatewayConfig::default());
        let err = manager.acquire("a").await.unwrap_err();
        assert!(matches!(err, GatewayError::Handshake(_)));
        assert_eq!(manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn status_and_health_never_create_sessions() {
        let factory = Arc::new(EchoTransportFactory::new(EchoServer::new()));
        let manager = manager(&["a"], &factory, GatewayConfig::default());

        assert_eq!(manager.status("a").await.state, SessionState::Closed);
        assert_eq!(manager.health().await.total, 0);
        assert_eq!(factory.opens(), 0);

        manager.acquire("a").await.unwrap();
        let health = manager.health().await;
        assert_eq!((health.total, health.active, health.failed), (1, 1, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_evicted_after_threshold_only() {
        let idle = Duration::from_secs(300);
        let factory = Arc::new(EchoTransportFactory::new(EchoServer::new()));
        let manager = manager(
            &["a"],
            &factory,
            GatewayConfig::default().with_idle_timeout(idle),
        );
        manager.acquire("a").await.unwrap();

        tokio::time::advance(idle - Duration::from_secs(1)).await;
        let report = manager.sweep().await;
        assert!(report.evicted.is_empty());
        assert!(manager.session("a").await.is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        let report = manager.sweep().await;
        assert_eq!(report.evicted, vec!["a".to_string()]);
        assert!(manager.session("a").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn subscribed_sessions_are_not_idle() {
        let idle = Duration::from_secs(60);
        let factory = Arc::new(EchoTransportFactory::new(EchoServer::new()));
        let manager = manager(
            &["a"],
            &factory,
            GatewayConfig::default().with_idle_timeout(idle),
        );
        let session = manager.acquire("a").await.unwrap();
        let _subscription = session.subscribe();

        tokio::time::advance(idle * 2).await;
        assert!(manager.sweep().await.evicted.is_empty());
    }

    #[tokio::test]
    async fn probe_failure_reconnects_once() {
        let factory = Arc::new(EchoTransportFactory::new(EchoServer::new()));
        let config = GatewayConfig::default().with_probe_timeout(Duration::from_millis(50));
        let manager = manager(&["a"], &factory, config);
        let first = manager.acquire("a").await.unwrap();

        factory.stall_all();
        let report = manager.sweep().await;

        assert_eq!(report.reconnected, vec!["a".to_string()]);
        assert_eq!(factory.opens(), 2);
        assert_eq!(first.state(), SessionState::Closed);
        let current = manager.session("a").await.unwrap();
        assert!(current.is_ready());
        assert!(!Arc::ptr_eq(&first, &current));
    }

    #[tokio::test]
    async fn failed_reconnect_invalidates() {
        let factory = Arc::new(EchoTransportFactory::new(EchoServer::new()));
        let config = GatewayConfig::default().with_probe_timeout(Duration::from_millis(50));
        let manager = manager(&["a"], &factory, config);
        manager.acquire("a").await.unwrap();

        factory.stall_all();
        factory.fail_next_opens(1);
        let report = manager.sweep().await;

        assert_eq!(report.invalidated, vec!["a".to_string()]);
        assert_eq!(factory.opens(), 2);
        assert!(manager.session("a").await.is_none());
    }

    #[tokio::test]
    async fn lost_transport_is_replaced_on_acquire() {
        let factory = Arc::new(EchoTransportFactory::new(EchoServer::new()));
        let manager = manager(&["a"], &factory, GatewayConfig::default());
        let first = manager.acquire("a").await.unwrap();

        factory.kill_all();
        tokio::time::timeout(Duration::from_secs(1), async {
            while first.state() != SessionState::Degraded {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let second = manager.acquire("a").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_used() {
        let factory = Arc::new(EchoTransportFactory::new(EchoServer::new()));
        let manager = manager(
            &["a", "b", "c"],
            &factory,
            GatewayConfig::default().with_max_sessions(2),
        );
        manager.acquire("a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        manager.acquire("b").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        manager.acquire("c").await.unwrap();

        assert!(manager.session("a").await.is_none());
        assert!(manager.session("b").await.is_some());
        assert!(manager.session("c").await.is_some());
    }

    #[tokio::test]
    async fn capacity_exhausted_when_nothing_evictable() {
        let factory = Arc::new(EchoTransportFactory::new(EchoServer::new()));
        let manager = manager(
            &["a", "b"],
            &factory,
            GatewayConfig::default().with_max_sessions(1),
        );
        let session = manager.acquire("a").await.unwrap();
        let _subscription = session.subscribe();

        let err = manager.acquire("b").await.unwrap_err();
        assert!(matches!(err, GatewayError::CapacityExhausted(1)));
    }

    #[tokio::test]
    async fn invalidate_and_shutdown_close_sessions() {
        let factory = Arc::new(EchoTransportFactory::new(EchoServer::new()));
        let manager = manager(&["a", "b"], &factory, GatewayConfig::default());
        let a = manager.acquire("a").await.unwrap();
        let b = manager.acquire("b").await.unwrap();

        assert!(manager.invalidate("a", "deleted").await);
        assert!(!manager.invalidate("a", "deleted").await);
        assert_eq!(a.state(), SessionState::Closed);

        assert_eq!(manager.shutdown().await, 1);
        assert_eq!(b.state(), SessionState::Closed);
        assert!(matches!(
            manager.acquire("a").await,
            Err(GatewayError::ConnectionClosed(_))
        ));
    }

    mock! {
        Registry {}

        #[async_trait]
        impl RegistryStore for Registry {
            async fn insert(
                &self,
                registration: NewServerRegistration,
            ) -> Result<ServerRegistration, RegistryError>;
            async fn get_registration(&self, id: &str) -> Result<ServerRegistration, RegistryError>;
            async fn list(&self, filter: RegistryFilter) -> Result<Vec<ServerRegistration>, RegistryError>;
            async fn delete(&self, id: &str) -> Result<(), RegistryError>;
            async fn record_capabilities(
                &self,
                id: &str,
                capabilities: &CapabilitySnapshot,
            ) -> Result<(), RegistryError>;
            async fn update_status(
                &self,
                id: &str,
                status: RegistrationStatus,
            ) -> Result<(), RegistryError>;
        }
    }

    #[tokio::test]
    async fn handshake_records_capabilities_and_tolerates_store_errors() {
        let mut registry = MockRegistry::new();
        registry
            .expect_get_registration()
            .returning(|id| Ok(registration(id)));
        registry
            .expect_record_capabilities()
            .withf(|id, caps| id == "a" && caps.tool("echo").is_some())
            .times(1)
            .returning(|_, _| Err(RegistryError::Internal("disk full".into())));

        let factory = Arc::new(EchoTransportFactory::new(EchoServer::new()));
        let manager = ConnectionManager::new(
            Arc::new(registry),
            factory as Arc<dyn TransportFactory>,
            GatewayConfig::default(),
        );
        assert!(manager.acquire("a").await.unwrap().is_ready());
    }

    #[tokio::test]
    async fn verify_updates_status() {
        let mut registry = MockRegistry::new();
        registry
            .expect_get_registration()
            .returning(|id| Ok(registration(id)));
        registry
            .expect_record_capabilities()
            .times(1)
            .returning(|_, _| Ok(()));
        registry
            .expect_update_status()
            .withf(|id, status| id == "a" && *status == RegistrationStatus::Active)
            .times(1)
            .returning(|_, _| Ok(()));

        let factory = Arc::new(EchoTransportFactory::new(EchoServer::new()));
        let manager = ConnectionManager::new(
            Arc::new(registry),
            Arc::clone(&factory) as Arc<dyn TransportFactory>,
            GatewayConfig::default(),
        );
        let snapshot = manager.verify("a").await.unwrap();
        assert_eq!(snapshot.resources.len(), 2);
        assert_eq!(manager.session_count().await, 0);
    }

    #[derive(Clone, Default)]
    struct RecordingEmitter(Arc<Mutex<Vec<GatewayEvent>>>);

    impl RecordingEmitter {
        fn events(&self) -> Vec<GatewayEvent> {
            self.0.lock().unwrap().clone()
        }
    }

    impl GatewayEventEmitter for RecordingEmitter {
        fn emit(&self, event: GatewayEvent) {
            self.0.lock().unwrap().push(event);
        }

        fn clone_box(&self) -> Box<dyn GatewayEventEmitter> {
            Box::new(self.clone())
        }
    }

    #[tokio::test]
    async fn failed_listing_publishes_nothing() {
        let mut registry = MockRegistry::new();
        registry
            .expect_get_registration()
            .returning(|id| Ok(registration(id)));
        registry.expect_record_capabilities().times(0);

        let emitter = Arc::new(RecordingEmitter::default());
        let factory = Arc::new(EchoTransportFactory::new(
            EchoServer::new().with_failing_list("resources"),
        ));
        let manager = ConnectionManager::new(
            Arc::new(registry),
            Arc::clone(&factory) as Arc<dyn TransportFactory>,
            GatewayConfig::default(),
        )
        .with_emitter(Arc::clone(&emitter) as Arc<dyn GatewayEventEmitter>);

        let err = manager.acquire("a").await.unwrap_err();
        assert!(matches!(err, GatewayError::Handshake(_)));
        assert_eq!(manager.session_count().await, 0);
        assert!(manager.session("a").await.is_none());
        assert!(emitter.events().is_empty());
        assert_eq!(factory.server().stats().initializations(), 1);
    }

    #[tokio::test]
    async fn settled_creation_is_not_reused() {
        let factory = Arc::new(EchoTransportFactory::new(EchoServer::new()));
        let manager = manager(&["a"], &factory, GatewayConfig::default());

        // A finished failure still parked in the in-flight table.
        let stale: Creation = Arc::default();
        assert!(
            stale
                .set(Err(GatewayError::transport("earlier attempt")))
                .is_ok()
        );
        lock(&manager.inflight).insert("a".to_string(), stale);

        assert!(manager.acquire("a").await.unwrap().is_ready());
        assert_eq!(factory.opens(), 1);
        assert!(lock(&manager.inflight).is_empty());
    }
}
