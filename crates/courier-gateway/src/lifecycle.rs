//! Client lifecycle orchestration.
//!
//! The [`LifecycleManager`] is the only writer of the session registry. It
//! creates clients, consumes their event streams, reconciles durable state,
//! and funnels every teardown path (explicit disconnect, idle eviction,
//! memory pressure, driver death, exhausted auth retries) through one
//! idempotent primitive.

use std::sync::Arc;
use std::time::Duration;

use courier_core::{AccountId, GatewayError, SessionState};
use courier_store::{AssistantRepo, SessionRepo, StoreConn, StorePool};
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::activity;
use crate::assistant::{self, AssistantClient, AssistantQuery};
use crate::config::GatewayConfig;
use crate::driver::{
    ChatMessage, ClientEvent, DriverConfig, DriverError, DriverFactory, IncomingMessage,
    OutgoingMedia, OutgoingSummary,
};
use crate::metric;
use crate::phone;
use crate::qr;
use crate::reconcile::{self, SessionValidity};
use crate::registry::{SessionHandle, SessionRegistry};

/// Receives the rendered QR data URL, at most once per pairing episode.
pub type QrCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Result of an initialize/reconnect request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitOutcome {
    /// A new client was created and started.
    Started,
    /// A live client already existed; nothing was done.
    AlreadyConnected,
}

/// Result of a teardown request. Tearing down an absent session is not an
/// error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeardownOutcome {
    Removed,
    NotFound,
}

/// Answer to a status query.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub state: SessionState,
    pub is_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub can_reconnect: bool,
}

/// Orchestrates every managed client session.
pub struct LifecycleManager {
    registry: SessionRegistry,
    pool: StorePool,
    factory: Arc<dyn DriverFactory>,
    assistant: Option<AssistantClient>,
    config: GatewayConfig,
}

impl LifecycleManager {
    #[must_use]
    pub fn new(
        pool: StorePool,
        factory: Arc<dyn DriverFactory>,
        assistant: Option<AssistantClient>,
        config: GatewayConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry: SessionRegistry::new(),
            pool,
            factory,
            assistant,
            config,
        })
    }

    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub(crate) fn conn(&self) -> Result<StoreConn, GatewayError> {
        self.pool
            .get()
            .map_err(|e| GatewayError::Store(e.to_string()))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Session creation
    // ─────────────────────────────────────────────────────────────────────

    /// Compare the local artifact against the durable record.
    pub async fn check_session(&self, id: &AccountId) -> Result<SessionValidity, GatewayError> {
        let conn = self.conn()?;
        reconcile::check_session_validity(&conn, &self.config.artifact_root, id)
    }

    /// Start (or replace) the client for `id`.
    ///
    /// Concurrent initializes for the same id serialize on the admission
    /// lock; the loser observes the winner's entry and replaces it. The cap
    /// is checked at admission only.
    pub async fn initialize(
        self: &Arc<Self>,
        id: &AccountId,
        on_qr: Option<QrCallback>,
    ) -> Result<InitOutcome, GatewayError> {
        let admission = self.registry.admission_lock(id);
        let _guard = admission.lock().await;

        if !self.registry.contains(id).await
            && self.registry.count().await >= self.config.max_concurrent_clients
        {
            return Err(GatewayError::ConnectionLimit {
                max: self.config.max_concurrent_clients,
            });
        }

        // Replace any existing live entry: tear the old one down fully
        // before creating its successor.
        if let Some(existing) = self.registry.remove(id).await {
            info!(account = %id.joined(), "replacing existing live client");
            existing.timers().cancel();
            existing.driver().destroy().await;
        }

        let artifact_dir = reconcile::artifact_dir(&self.config.artifact_root, id);
        std::fs::create_dir_all(&artifact_dir)?;

        let resuming = {
            let conn = self.conn()?;
            SessionRepo::exists(&conn, id).map_err(GatewayError::from)?
        };

        let driver = self.factory.build(
            id,
            &DriverConfig {
                artifact_dir,
                headless: self.config.headless,
            },
        );
        let events = driver.take_events().ok_or_else(|| GatewayError::InitializationFailed {
            cause: "driver event stream already consumed".into(),
        })?;

        let session = SessionHandle::new(id.clone(), driver.clone());
        if resuming {
            let _ = session.set_state(SessionState::Connecting);
        }
        let _ = self.registry.insert(id.clone(), session.clone()).await;
        self.spawn_event_loop(session.clone(), events, on_qr);

        match driver.start().await {
            Ok(()) => {
                gauge!(metric::SESSIONS_LIVE).set(self.registry.count().await as f64);
                info!(account = %id.joined(), resuming, "client started");
                Ok(InitOutcome::Started)
            }
            Err(err) => {
                // Roll back the partial entry.
                let _ = self.registry.remove_if_same(id, &session).await;
                session.timers().cancel();
                driver.destroy().await;
                gauge!(metric::SESSIONS_LIVE).set(self.registry.count().await as f64);
                Err(GatewayError::InitializationFailed {
                    cause: err.to_string(),
                })
            }
        }
    }

    /// Resume a previously-paired session.
    pub async fn reconnect(
        self: &Arc<Self>,
        id: &AccountId,
        on_qr: Option<QrCallback>,
    ) -> Result<InitOutcome, GatewayError> {
        if let Some(session) = self.registry.get(id).await {
            if session.state().is_live() {
                session.touch();
                return Ok(InitOutcome::AlreadyConnected);
            }
        }
        let record_exists = {
            let conn = self.conn()?;
            SessionRepo::exists(&conn, id).map_err(GatewayError::from)?
        };
        if !record_exists {
            return Err(GatewayError::SessionNotFound {
                account: id.joined(),
            });
        }
        self.initialize(id, on_qr).await
    }

    /// Re-initialize every durable active session, typically at startup.
    /// Returns how many came back.
    pub async fn reconnect_all(self: &Arc<Self>) -> usize {
        let rows = match self.conn().and_then(|conn| {
            SessionRepo::list_active(&conn).map_err(GatewayError::from)
        }) {
            Ok(rows) => rows,
            Err(err) => {
                error!(error = %err, "could not list sessions for startup reconnect");
                return 0;
            }
        };

        let mut reconnected = 0;
        for row in rows {
            let id = AccountId::new(row.account_type, row.username);
            match self.initialize(&id, None).await {
                Ok(_) => reconnected += 1,
                Err(err) => {
                    warn!(account = %id.joined(), error = %err, "startup reconnect failed");
                }
            }
        }
        info!(reconnected, "startup reconnect finished");
        reconnected
    }

    // ─────────────────────────────────────────────────────────────────────
    // Teardown
    // ─────────────────────────────────────────────────────────────────────

    /// Stop the live client but keep the durable record and artifact, so the
    /// account resumes later without re-pairing. Used by idle and memory
    /// eviction.
    pub async fn disconnect_preserving_session(
        &self,
        id: &AccountId,
    ) -> Result<TeardownOutcome, GatewayError> {
        self.teardown(id, false).await
    }

    /// Explicit user-initiated disconnect: stop the client and delete both
    /// the durable record and the local artifact.
    pub async fn disconnect_and_wipe(&self, id: &AccountId) -> Result<TeardownOutcome, GatewayError> {
        self.teardown(id, true).await
    }

    async fn teardown(&self, id: &AccountId, wipe: bool) -> Result<TeardownOutcome, GatewayError> {
        let Some(session) = self.registry.remove(id).await else {
            if wipe {
                // No live client, but durable material may remain (for
                // instance after an idle eviction).
                let had_artifact = reconcile::wipe_artifact(&self.config.artifact_root, id)?;
                let conn = self.conn()?;
                let had_record = SessionRepo::delete(&conn, id).map_err(GatewayError::from)?;
                if had_artifact || had_record {
                    info!(account = %id.joined(), "wiped offline session");
                    return Ok(TeardownOutcome::Removed);
                }
            }
            return Ok(TeardownOutcome::NotFound);
        };

        session.timers().cancel();
        let _ = session.set_state(if wipe {
            SessionState::Disconnected
        } else {
            SessionState::AutoDisconnected
        });
        session.driver().destroy().await;

        if wipe {
            reconcile::wipe_artifact(&self.config.artifact_root, id)?;
            let conn = self.conn()?;
            let _ = SessionRepo::delete(&conn, id).map_err(GatewayError::from)?;
        }

        gauge!(metric::SESSIONS_LIVE).set(self.registry.count().await as f64);
        info!(account = %id.joined(), wipe, "session torn down");
        Ok(TeardownOutcome::Removed)
    }

    /// Disconnect every live session, preserving durable state. Called at
    /// process shutdown.
    pub async fn shutdown(&self) {
        let sessions = self.registry.list().await;
        info!(count = sessions.len(), "disconnecting all sessions");
        for (id, _) in sessions {
            if let Err(err) = self.disconnect_preserving_session(&id).await {
                warn!(account = %id.joined(), error = %err, "shutdown teardown failed");
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queries and dispatch
    // ─────────────────────────────────────────────────────────────────────

    /// Current connection state. Every status check counts as activity.
    pub async fn check_connection(&self, id: &AccountId) -> Result<ConnectionStatus, GatewayError> {
        if let Some(session) = self.registry.get(id).await {
            session.touch();
            let state = match session.driver().probe_state().await {
                Ok(state) => state,
                Err(err) => {
                    debug!(account = %id.joined(), error = %err, "state probe failed, using cached state");
                    session.state()
                }
            };
            return Ok(ConnectionStatus {
                state,
                is_connected: state == SessionState::Connected,
                phone_number: session.phone_number(),
                can_reconnect: false,
            });
        }

        let conn = self.conn()?;
        if let Some(row) = SessionRepo::find(&conn, id).map_err(GatewayError::from)? {
            return Ok(ConnectionStatus {
                state: SessionState::AutoDisconnected,
                is_connected: false,
                phone_number: Some(row.phone_number),
                can_reconnect: true,
            });
        }
        Ok(ConnectionStatus {
            state: SessionState::Disconnected,
            is_connected: false,
            phone_number: None,
            can_reconnect: false,
        })
    }

    async fn ready_session(&self, id: &AccountId) -> Result<Arc<SessionHandle>, GatewayError> {
        let session = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| GatewayError::NotReady {
                account: id.joined(),
            })?;
        if session.state() != SessionState::Connected {
            return Err(GatewayError::NotReady {
                account: id.joined(),
            });
        }
        session.touch();
        Ok(session)
    }

    async fn timed<T>(
        &self,
        operation: &str,
        bound: Duration,
        fut: impl Future<Output = Result<T, DriverError>>,
    ) -> Result<T, GatewayError> {
        match tokio::time::timeout(bound, fut).await {
            Ok(result) => result.map_err(GatewayError::from),
            Err(_) => Err(GatewayError::Timeout {
                operation: operation.into(),
                seconds: bound.as_secs(),
            }),
        }
    }

    /// Send one text message.
    pub async fn send_message(
        &self,
        id: &AccountId,
        recipient: &str,
        body: &str,
    ) -> Result<(), GatewayError> {
        if !phone::is_valid_number(recipient) {
            return Err(GatewayError::Validation(format!(
                "invalid recipient number: {recipient}"
            )));
        }
        let session = self.ready_session(id).await?;
        self.timed(
            "send message",
            self.config.send_timeout,
            session.driver().send_message(recipient, body),
        )
        .await?;
        counter!(metric::MESSAGES_SENT).increment(1);
        Ok(())
    }

    /// Send a media message; the bound covers the download.
    pub async fn send_media(
        &self,
        id: &AccountId,
        recipient: &str,
        media: &OutgoingMedia,
    ) -> Result<(), GatewayError> {
        if !phone::is_valid_number(recipient) {
            return Err(GatewayError::Validation(format!(
                "invalid recipient number: {recipient}"
            )));
        }
        if media.url.is_empty() {
            return Err(GatewayError::Validation("media url is required".into()));
        }
        let session = self.ready_session(id).await?;
        self.timed(
            "send media",
            self.config.media_timeout,
            session.driver().send_media(recipient, media),
        )
        .await?;
        counter!(metric::MESSAGES_SENT).increment(1);
        Ok(())
    }

    pub async fn send_to_group(
        &self,
        id: &AccountId,
        group_id: &str,
        body: &str,
    ) -> Result<(), GatewayError> {
        if group_id.is_empty() {
            return Err(GatewayError::Validation("group id is required".into()));
        }
        let session = self.ready_session(id).await?;
        self.timed(
            "send to group",
            self.config.send_timeout,
            session.driver().send_to_group(group_id, body),
        )
        .await?;
        counter!(metric::MESSAGES_SENT).increment(1);
        Ok(())
    }

    /// Create a group; returns the new group id.
    pub async fn create_group(
        &self,
        id: &AccountId,
        name: &str,
        participants: &[String],
    ) -> Result<String, GatewayError> {
        if name.trim().is_empty() {
            return Err(GatewayError::Validation("group name is required".into()));
        }
        if participants.len() < 2 {
            return Err(GatewayError::Validation(
                "group creation requires at least 2 participants".into(),
            ));
        }
        validate_participants(participants)?;
        let session = self.ready_session(id).await?;
        self.timed(
            "create group",
            self.config.group_timeout,
            session.driver().create_group(name, participants),
        )
        .await
    }

    pub async fn invite_to_group(
        &self,
        id: &AccountId,
        group_id: &str,
        participants: &[String],
    ) -> Result<(), GatewayError> {
        if group_id.is_empty() {
            return Err(GatewayError::Validation("group id is required".into()));
        }
        if participants.is_empty() {
            return Err(GatewayError::Validation(
                "at least one participant is required".into(),
            ));
        }
        validate_participants(participants)?;
        let session = self.ready_session(id).await?;
        self.timed(
            "group invite",
            self.config.group_timeout,
            session.driver().add_participants(group_id, participants),
        )
        .await
    }

    /// Recent messages exchanged with one contact.
    pub async fn chat_history(
        &self,
        id: &AccountId,
        contact: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, GatewayError> {
        if !phone::is_valid_number(contact) {
            return Err(GatewayError::Validation(format!(
                "invalid contact number: {contact}"
            )));
        }
        let session = self.ready_session(id).await?;
        self.timed(
            "chat history",
            self.config.send_timeout,
            session.driver().chat_history(contact, limit),
        )
        .await
    }

    /// Outgoing messages from the last `days_ago` days that got no reply.
    pub async fn unreplied_messages(
        &self,
        id: &AccountId,
        days_ago: u32,
    ) -> Result<Vec<OutgoingSummary>, GatewayError> {
        let session = self.ready_session(id).await?;
        let outgoing = self
            .timed(
                "unreplied messages",
                self.config.send_timeout,
                session.driver().recent_outgoing(days_ago),
            )
            .await?;
        Ok(outgoing.into_iter().filter(|m| !m.replied).collect())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Event handling
    // ─────────────────────────────────────────────────────────────────────

    fn spawn_event_loop(
        self: &Arc<Self>,
        session: Arc<SessionHandle>,
        mut events: mpsc::UnboundedReceiver<ClientEvent>,
        on_qr: Option<QrCallback>,
    ) {
        let manager = Arc::clone(self);
        let _ = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = session.timers().cancelled() => break,
                    event = events.recv() => match event {
                        None => break,
                        Some(event) => {
                            manager.handle_event(&session, event, on_qr.as_ref()).await;
                        }
                    }
                }
            }
            debug!(account = %session.id().joined(), "event loop ended");
        });
    }

    async fn handle_event(
        self: &Arc<Self>,
        session: &Arc<SessionHandle>,
        event: ClientEvent,
        on_qr: Option<&QrCallback>,
    ) {
        match event {
            ClientEvent::Qr(payload) => {
                let _ = session.set_state(SessionState::AwaitingQr);
                if session.claim_qr_emission() {
                    match qr::qr_data_url(&payload) {
                        Ok(url) => {
                            info!(account = %session.id().joined(), "pairing qr emitted");
                            if let Some(callback) = on_qr {
                                callback(url);
                            }
                        }
                        Err(err) => {
                            error!(account = %session.id().joined(), error = %err, "qr render failed");
                        }
                    }
                } else {
                    debug!(account = %session.id().joined(), "suppressed duplicate qr");
                }
            }
            ClientEvent::Authenticated => {
                let _ = session.set_state(SessionState::Authenticating);
            }
            ClientEvent::Ready { phone_number } => {
                session.set_phone_number(&phone_number);
                let _ = session.set_state(SessionState::Connected);
                session.touch();
                match self.conn() {
                    Ok(conn) => {
                        if let Err(err) =
                            SessionRepo::upsert_active(&conn, session.id(), &phone_number)
                        {
                            error!(account = %session.id().joined(), error = %err, "session record upsert failed");
                        }
                    }
                    Err(err) => {
                        error!(account = %session.id().joined(), error = %err, "store unavailable for session record");
                    }
                }
                activity::start(self, session);
                counter!(metric::SESSIONS_INITIALIZED).increment(1);
                info!(account = %session.id().joined(), phone = %phone_number, "client connected");
            }
            ClientEvent::Message(message) => {
                session.touch();
                self.handle_incoming(session, message).await;
            }
            ClientEvent::Disconnected { reason } => {
                self.handle_disconnected(session, &reason).await;
            }
            ClientEvent::AuthFailure { message } => {
                self.handle_auth_failure(session, &message).await;
            }
        }
    }

    /// Auto-reply path for one inbound message.
    async fn handle_incoming(&self, session: &Arc<SessionHandle>, message: IncomingMessage) {
        let Some(assistant_client) = &self.assistant else {
            return;
        };
        let Some(own_number) = session.phone_number() else {
            return;
        };
        let active = self
            .conn()
            .ok()
            .and_then(|conn| AssistantRepo::find_active(&conn, &own_number).ok().flatten());
        if active.is_none() {
            return;
        }

        let contact_numbers = message
            .vcard
            .as_deref()
            .map(assistant::vcard_numbers)
            .unwrap_or_default();
        let reply = match assistant_client
            .respond(&AssistantQuery {
                sender: &message.sender,
                message: &message.body,
                contact_numbers,
            })
            .await
        {
            Ok(reply) => reply,
            Err(err) => {
                warn!(
                    account = %session.id().joined(),
                    error = %err,
                    "assistant call failed, sending fallback"
                );
                counter!(metric::ASSISTANT_FALLBACKS).increment(1);
                assistant::fallback_for(&err).to_string()
            }
        };
        if let Err(err) = session.driver().send_message(&message.sender, &reply).await {
            warn!(account = %session.id().joined(), error = %err, "auto-reply send failed");
        }
    }

    /// Terminal driver disconnect: delete the record under a bound, then
    /// clean up. Only the registered instance acts, so cleanup racing an
    /// explicit disconnect stays idempotent.
    async fn handle_disconnected(&self, session: &Arc<SessionHandle>, reason: &str) {
        let id = session.id().clone();
        warn!(account = %id.joined(), reason, "client disconnected");

        if !self.registry.remove_if_same(&id, session).await {
            debug!(account = %id.joined(), "disconnect cleanup already handled");
            return;
        }
        session.timers().cancel();
        let _ = session.set_state(SessionState::Disconnected);

        // A slow store must not block client cleanup.
        let delete = {
            let pool = self.pool.clone();
            let id = id.clone();
            tokio::task::spawn_blocking(move || -> Result<bool, GatewayError> {
                let conn = pool.get().map_err(|e| GatewayError::Store(e.to_string()))?;
                SessionRepo::delete(&conn, &id).map_err(GatewayError::from)
            })
        };
        match tokio::time::timeout(self.config.record_delete_timeout, delete).await {
            Ok(Ok(Ok(_))) => {}
            Ok(Ok(Err(err))) => {
                error!(account = %id.joined(), error = %err, "session record delete failed");
            }
            Ok(Err(err)) => {
                error!(account = %id.joined(), error = %err, "session record delete panicked");
            }
            Err(_) => {
                warn!(account = %id.joined(), "session record delete timed out, continuing cleanup");
            }
        }

        session.driver().destroy().await;
        gauge!(metric::SESSIONS_LIVE).set(self.registry.count().await as f64);
    }

    /// Bounded auth retries, then a full wipe.
    async fn handle_auth_failure(&self, session: &Arc<SessionHandle>, detail: &str) {
        let id = session.id().clone();
        let policy = self.config.auth_retry;
        warn!(account = %id.joined(), detail, "authentication failure");

        for attempt in 1..=policy.max_attempts {
            let Some(delay) = policy.delay_for(attempt) else {
                break;
            };
            tokio::time::sleep(delay).await;
            if session.timers().is_cancelled() {
                return;
            }
            info!(account = %id.joined(), attempt, "retrying authentication");
            // A restart may legitimately produce a fresh QR.
            session.reset_qr_emission();
            match session.driver().start().await {
                Ok(()) => {
                    info!(account = %id.joined(), attempt, "driver restarted");
                    return;
                }
                Err(err) => {
                    warn!(account = %id.joined(), attempt, error = %err, "auth retry failed");
                }
            }
        }

        error!(
            account = %id.joined(),
            attempts = policy.max_attempts,
            "authentication retries exhausted, wiping session"
        );
        if self.registry.remove_if_same(&id, session).await {
            session.timers().cancel();
            let _ = session.set_state(SessionState::Error);
            session.driver().destroy().await;
        }
        if let Err(err) = reconcile::wipe_artifact(&self.config.artifact_root, &id) {
            error!(account = %id.joined(), error = %err, "artifact wipe failed");
        }
        match self.conn() {
            Ok(conn) => {
                if let Err(err) = SessionRepo::delete(&conn, &id) {
                    error!(account = %id.joined(), error = %err, "session record delete failed");
                }
            }
            Err(err) => {
                error!(account = %id.joined(), error = %err, "store unavailable during auth cleanup");
            }
        }
        gauge!(metric::SESSIONS_LIVE).set(self.registry.count().await as f64);
    }
}

fn validate_participants(participants: &[String]) -> Result<(), GatewayError> {
    for number in participants {
        if !phone::is_valid_number(number) {
            return Err(GatewayError::Validation(format!(
                "invalid participant number: {number}"
            )));
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::{MockDriver, MockDriverFactory, StartScript};
    use assert_matches::assert_matches;
    use courier_store::open_memory_pool;

    async fn wait_for_state(
        manager: &Arc<LifecycleManager>,
        id: &AccountId,
        state: SessionState,
    ) {
        for _ in 0..200 {
            if let Some(session) = manager.registry().get(id).await {
                if session.state() == state {
                    return;
                }
            }
            tokio::task::yield_now().await;
        }
        panic!("session never reached {state:?}");
    }

    fn test_manager(
        factory: Arc<MockDriverFactory>,
        artifact_root: &std::path::Path,
    ) -> Arc<LifecycleManager> {
        let config = GatewayConfig {
            artifact_root: artifact_root.to_path_buf(),
            ..GatewayConfig::default()
        };
        LifecycleManager::new(open_memory_pool().unwrap(), factory, None, config)
    }

    #[tokio::test]
    async fn initialize_emits_one_qr_and_connects() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MockDriverFactory::new();
        let id = AccountId::new("wa", "alice");
        let driver = MockDriver::new();
        driver.script_start(StartScript::pairing("qr-payload", "5215512345678"));
        factory.preload(&id, driver.clone());

        let manager = test_manager(factory, dir.path());
        let qr_seen = Arc::new(parking_lot::Mutex::new(Vec::<String>::new()));
        let sink = qr_seen.clone();
        let callback: QrCallback = Arc::new(move |url| sink.lock().push(url));

        let outcome = manager.initialize(&id, Some(callback)).await.unwrap();
        assert_eq!(outcome, InitOutcome::Started);
        wait_for_state(&manager, &id, SessionState::Connected).await;

        // A later duplicate QR event is suppressed.
        driver.emit(ClientEvent::Qr("qr-payload-again".into()));
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        let urls = qr_seen.lock().clone();
        assert_eq!(urls.len(), 1);
        assert!(urls[0].starts_with("data:image/svg+xml;base64,"));

        let session = manager.registry().get(&id).await.unwrap();
        assert_eq!(session.phone_number().as_deref(), Some("5215512345678"));

        // Durable record created with the phone identity.
        let status = manager.check_connection(&id).await.unwrap();
        assert!(status.is_connected);
    }

    #[tokio::test]
    async fn initialize_failure_rolls_back_partial_state() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MockDriverFactory::new();
        let id = AccountId::new("wa", "bob");
        let driver = MockDriver::new();
        driver.script_start(StartScript::err("browser refused to launch"));
        factory.preload(&id, driver.clone());

        let manager = test_manager(factory, dir.path());
        let err = manager.initialize(&id, None).await.unwrap_err();
        assert_eq!(err.code(), "initialization_failed");
        assert!(manager.registry().get(&id).await.is_none());
        assert_eq!(driver.destroy_count(), 1);
    }

    #[tokio::test]
    async fn connection_cap_rejects_new_ids_only() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MockDriverFactory::new();
        let config = GatewayConfig {
            artifact_root: dir.path().to_path_buf(),
            max_concurrent_clients: 1,
            ..GatewayConfig::default()
        };
        let manager =
            LifecycleManager::new(open_memory_pool().unwrap(), factory, None, config);

        let first = AccountId::new("wa", "alice");
        manager.initialize(&first, None).await.unwrap();

        let second = AccountId::new("wa", "bob");
        let err = manager.initialize(&second, None).await.unwrap_err();
        assert_matches!(err, GatewayError::ConnectionLimit { max: 1 });

        // Re-initializing an id already present is allowed at the cap.
        manager.initialize(&first, None).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_initializes_leave_one_live_client() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MockDriverFactory::new();
        let id = AccountId::new("wa", "alice");
        let manager = test_manager(factory.clone(), dir.path());

        let a = {
            let manager = manager.clone();
            let id = id.clone();
            tokio::spawn(async move { manager.initialize(&id, None).await })
        };
        let b = {
            let manager = manager.clone();
            let id = id.clone();
            tokio::spawn(async move { manager.initialize(&id, None).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(manager.registry().count().await, 1);
        // The replaced driver was destroyed, not leaked.
        let built = factory.built_for(&id);
        assert_eq!(built.len(), 2);
        let destroys: usize = built.iter().map(|d| d.destroy_count()).sum();
        assert_eq!(destroys, 1);
    }

    #[tokio::test]
    async fn dispatch_requires_connected_client() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MockDriverFactory::new();
        let id = AccountId::new("wa", "alice");
        let manager = test_manager(factory, dir.path());

        let err = manager.send_message(&id, "14155550100", "hi").await.unwrap_err();
        assert_eq!(err.code(), "not_connected");

        // Live but not yet ready also rejects.
        manager.initialize(&id, None).await.unwrap();
        let err = manager.send_message(&id, "14155550100", "hi").await.unwrap_err();
        assert_eq!(err.code(), "not_connected");
    }

    #[tokio::test]
    async fn send_validates_recipient_before_touching_the_driver() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MockDriverFactory::new();
        let id = AccountId::new("wa", "alice");
        let manager = test_manager(factory, dir.path());

        let err = manager.send_message(&id, "+bad+", "hi").await.unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_send_times_out_distinctly() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MockDriverFactory::new();
        let id = AccountId::new("wa", "alice");
        let driver = MockDriver::new();
        driver.script_start(StartScript::pairing("qr", "5215512345678"));
        factory.preload(&id, driver.clone());

        let manager = test_manager(factory, dir.path());
        manager.initialize(&id, None).await.unwrap();
        wait_for_state(&manager, &id, SessionState::Connected).await;

        driver.delay_sends(Duration::from_secs(30));
        let err = manager.send_message(&id, "14155550100", "hi").await.unwrap_err();
        assert_matches!(err, GatewayError::Timeout { seconds: 10, .. });
    }

    #[tokio::test]
    async fn group_creation_validates_participants() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MockDriverFactory::new();
        let id = AccountId::new("wa", "alice");
        let driver = MockDriver::new();
        driver.script_start(StartScript::pairing("qr", "5215512345678"));
        factory.preload(&id, driver);

        let manager = test_manager(factory, dir.path());
        manager.initialize(&id, None).await.unwrap();
        wait_for_state(&manager, &id, SessionState::Connected).await;

        let err = manager
            .create_group(&id, "team", &["14155550100".into()])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation_error");

        let err = manager
            .create_group(&id, "team", &["14155550100".into(), "0bad".into()])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation_error");

        let group_id = manager
            .create_group(&id, "team", &["14155550100".into(), "14155550101".into()])
            .await
            .unwrap();
        assert_eq!(group_id, "group-team");
    }

    #[tokio::test]
    async fn driver_disconnect_deletes_record_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MockDriverFactory::new();
        let id = AccountId::new("wa", "alice");
        let driver = MockDriver::new();
        driver.script_start(StartScript::pairing("qr", "5215512345678"));
        factory.preload(&id, driver.clone());

        let manager = test_manager(factory, dir.path());
        manager.initialize(&id, None).await.unwrap();
        wait_for_state(&manager, &id, SessionState::Connected).await;

        driver.emit(ClientEvent::Disconnected {
            reason: "phone offline".into(),
        });
        for _ in 0..200 {
            if manager.registry().get(&id).await.is_none() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(manager.registry().get(&id).await.is_none());

        // Record gone, so the status query reports a dead session.
        let status = manager.check_connection(&id).await.unwrap();
        assert_eq!(status.state, SessionState::Disconnected);
        assert!(!status.can_reconnect);
    }

    #[tokio::test]
    async fn explicit_disconnect_wipes_record_and_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MockDriverFactory::new();
        let id = AccountId::new("wa", "alice");
        let driver = MockDriver::new();
        driver.script_start(StartScript::pairing("qr", "5215512345678"));
        factory.preload(&id, driver);

        let manager = test_manager(factory, dir.path());
        manager.initialize(&id, None).await.unwrap();
        wait_for_state(&manager, &id, SessionState::Connected).await;
        assert!(reconcile::artifact_dir(dir.path(), &id).is_dir());

        let outcome = manager.disconnect_and_wipe(&id).await.unwrap();
        assert_eq!(outcome, TeardownOutcome::Removed);
        assert!(manager.registry().get(&id).await.is_none());
        assert!(!reconcile::artifact_dir(dir.path(), &id).exists());

        let status = manager.check_connection(&id).await.unwrap();
        assert!(!status.can_reconnect);
    }

    #[tokio::test]
    async fn teardown_of_absent_session_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(MockDriverFactory::new(), dir.path());
        let id = AccountId::new("wa", "ghost");
        assert_eq!(
            manager.disconnect_preserving_session(&id).await.unwrap(),
            TeardownOutcome::NotFound
        );
        assert_eq!(
            manager.disconnect_and_wipe(&id).await.unwrap(),
            TeardownOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn preserved_session_reports_reconnectable_and_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MockDriverFactory::new();
        let id = AccountId::new("wa", "alice");
        let first = MockDriver::new();
        first.script_start(StartScript::pairing("qr", "5215512345678"));
        factory.preload(&id, first);

        let manager = test_manager(factory.clone(), dir.path());
        manager.initialize(&id, None).await.unwrap();
        wait_for_state(&manager, &id, SessionState::Connected).await;

        manager.disconnect_preserving_session(&id).await.unwrap();
        let status = manager.check_connection(&id).await.unwrap();
        assert_eq!(status.state, SessionState::AutoDisconnected);
        assert!(status.can_reconnect);
        assert_eq!(status.phone_number.as_deref(), Some("5215512345678"));

        // Resume without a fresh QR: the scripted driver goes straight to
        // ready.
        let resumed = MockDriver::new();
        resumed.script_start(StartScript::ok(vec![ClientEvent::Ready {
            phone_number: "5215512345678".into(),
        }]));
        factory.preload(&id, resumed);
        let outcome = manager.reconnect(&id, None).await.unwrap();
        assert_eq!(outcome, InitOutcome::Started);
        wait_for_state(&manager, &id, SessionState::Connected).await;
    }

    #[tokio::test]
    async fn reconnect_without_record_is_session_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(MockDriverFactory::new(), dir.path());
        let err = manager
            .reconnect(&AccountId::new("wa", "ghost"), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "session_not_found");
    }

    #[tokio::test]
    async fn reconnect_on_live_session_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MockDriverFactory::new();
        let id = AccountId::new("wa", "alice");
        let driver = MockDriver::new();
        driver.script_start(StartScript::pairing("qr", "5215512345678"));
        factory.preload(&id, driver.clone());

        let manager = test_manager(factory, dir.path());
        manager.initialize(&id, None).await.unwrap();
        wait_for_state(&manager, &id, SessionState::Connected).await;

        let outcome = manager.reconnect(&id, None).await.unwrap();
        assert_eq!(outcome, InitOutcome::AlreadyConnected);
        assert_eq!(driver.start_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_retries_then_wipes() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MockDriverFactory::new();
        let id = AccountId::new("wa", "alice");
        let driver = MockDriver::new();
        // Initial start emits the auth failure; every retry start fails too.
        driver.script_start(StartScript::ok(vec![ClientEvent::AuthFailure {
            message: "bad credentials".into(),
        }]));
        for _ in 0..3 {
            driver.script_start(StartScript::err("still bad"));
        }
        factory.preload(&id, driver.clone());

        let manager = test_manager(factory, dir.path());
        manager.initialize(&id, None).await.unwrap();
        let artifact = reconcile::artifact_dir(dir.path(), &id);
        assert!(artifact.is_dir());

        // Backoff totals 3s + 5s + 10s; advance past it and let the retries
        // run.
        for _ in 0..40 {
            tokio::time::advance(Duration::from_secs(1)).await;
            tokio::task::yield_now().await;
        }

        assert_eq!(driver.start_count(), 4);
        assert!(manager.registry().get(&id).await.is_none());
        assert!(!artifact.exists());
    }

    #[tokio::test]
    async fn reconnect_all_restores_active_records() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MockDriverFactory::new();
        let manager = test_manager(factory.clone(), dir.path());

        for name in ["alice", "bob"] {
            let id = AccountId::new("wa", name);
            let driver = MockDriver::new();
            driver.script_start(StartScript::pairing("qr", "5215512345678"));
            factory.preload(&id, driver);
            manager.initialize(&id, None).await.unwrap();
            wait_for_state(&manager, &id, SessionState::Connected).await;
        }
        manager.shutdown().await;
        assert_eq!(manager.registry().count().await, 0);

        let restored = manager.reconnect_all().await;
        assert_eq!(restored, 2);
        assert_eq!(manager.registry().count().await, 2);
    }

    #[tokio::test]
    async fn unreplied_messages_filters_replied_turns() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MockDriverFactory::new();
        let id = AccountId::new("wa", "alice");
        let driver = MockDriver::new();
        driver.script_start(StartScript::pairing("qr", "5215512345678"));
        driver.preset_outgoing(vec![
            OutgoingSummary {
                recipient: "14155550100".into(),
                body: "ping".into(),
                timestamp: 1_700_000_000,
                replied: false,
            },
            OutgoingSummary {
                recipient: "14155550101".into(),
                body: "pong".into(),
                timestamp: 1_700_000_100,
                replied: true,
            },
        ]);
        factory.preload(&id, driver);

        let manager = test_manager(factory, dir.path());
        manager.initialize(&id, None).await.unwrap();
        wait_for_state(&manager, &id, SessionState::Connected).await;

        let unreplied = manager.unreplied_messages(&id, 7).await.unwrap();
        assert_eq!(unreplied.len(), 1);
        assert_eq!(unreplied[0].recipient, "14155550100");
    }
}
