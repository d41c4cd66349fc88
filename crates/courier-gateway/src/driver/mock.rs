//! Scriptable in-process driver for tests.
//!
//! Each `start` pops the next [`StartScript`]: its result is returned and its
//! events are pushed onto the stream, so pairing and resume flows run without
//! a real client. Every outbound call is recorded for assertions.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use courier_core::{AccountId, SessionState};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{
    ChatMessage, ClientEvent, DriverConfig, DriverError, DriverFactory, MessagingDriver,
    OutgoingMedia, OutgoingSummary,
};

/// What one `start` call does.
pub struct StartScript {
    /// Outcome of the start call itself.
    pub result: Result<(), String>,
    /// Events pushed onto the stream after a successful start.
    pub events: Vec<ClientEvent>,
}

impl StartScript {
    /// Successful start emitting the given events.
    #[must_use]
    pub fn ok(events: Vec<ClientEvent>) -> Self {
        Self {
            result: Ok(()),
            events,
        }
    }

    /// Failed start.
    #[must_use]
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            result: Err(message.into()),
            events: Vec::new(),
        }
    }

    /// The usual fresh-pairing sequence: QR, then authenticated, then ready.
    #[must_use]
    pub fn pairing(qr: &str, phone_number: &str) -> Self {
        Self::ok(vec![
            ClientEvent::Qr(qr.to_string()),
            ClientEvent::Authenticated,
            ClientEvent::Ready {
                phone_number: phone_number.to_string(),
            },
        ])
    }
}

/// One recorded outbound call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentMessage {
    pub recipient: String,
    pub body: String,
    pub media: Option<OutgoingMedia>,
    pub group: bool,
}

#[derive(Default)]
struct Behavior {
    scripts: VecDeque<StartScript>,
    fail_sends_with: Option<String>,
    send_delay: Option<Duration>,
    history: Vec<ChatMessage>,
    outgoing: Vec<OutgoingSummary>,
}

/// Scriptable driver double.
pub struct MockDriver {
    events_tx: mpsc::UnboundedSender<ClientEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<ClientEvent>>>,
    behavior: Mutex<Behavior>,
    state: Mutex<SessionState>,
    sent: Mutex<Vec<SentMessage>>,
    starts: AtomicUsize,
    destroys: AtomicUsize,
}

impl Default for MockDriver {
    fn default() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            behavior: Mutex::new(Behavior::default()),
            state: Mutex::new(SessionState::Uninitialized),
            sent: Mutex::new(Vec::new()),
            starts: AtomicUsize::new(0),
            destroys: AtomicUsize::new(0),
        }
    }
}

impl MockDriver {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the behavior of the next `start` call.
    pub fn script_start(&self, script: StartScript) {
        self.behavior.lock().scripts.push_back(script);
    }

    /// Push an event onto the stream out of band.
    pub fn emit(&self, event: ClientEvent) {
        let _ = self.events_tx.send(event);
    }

    pub fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    /// Make subsequent sends fail with the given detail.
    pub fn fail_sends(&self, detail: impl Into<String>) {
        self.behavior.lock().fail_sends_with = Some(detail.into());
    }

    /// Make subsequent sends stall for `delay` before completing.
    pub fn delay_sends(&self, delay: Duration) {
        self.behavior.lock().send_delay = Some(delay);
    }

    pub fn preset_history(&self, history: Vec<ChatMessage>) {
        self.behavior.lock().history = history;
    }

    pub fn preset_outgoing(&self, outgoing: Vec<OutgoingSummary>) {
        self.behavior.lock().outgoing = outgoing;
    }

    #[must_use]
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    #[must_use]
    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn destroy_count(&self) -> usize {
        self.destroys.load(Ordering::Relaxed)
    }

    async fn record_send(&self, entry: SentMessage) -> Result<(), DriverError> {
        let (delay, failure) = {
            let behavior = self.behavior.lock();
            (behavior.send_delay, behavior.fail_sends_with.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(detail) = failure {
            return Err(DriverError::Send(detail));
        }
        self.sent.lock().push(entry);
        Ok(())
    }
}

#[async_trait]
impl MessagingDriver for MockDriver {
    async fn start(&self) -> Result<(), DriverError> {
        let _ = self.starts.fetch_add(1, Ordering::Relaxed);
        let script = self.behavior.lock().scripts.pop_front();
        match script {
            None => Ok(()),
            Some(StartScript { result: Ok(()), events }) => {
                for event in events {
                    if let ClientEvent::Ready { .. } = &event {
                        *self.state.lock() = SessionState::Connected;
                    }
                    let _ = self.events_tx.send(event);
                }
                Ok(())
            }
            Some(StartScript { result: Err(message), .. }) => Err(DriverError::Start(message)),
        }
    }

    async fn destroy(&self) {
        let _ = self.destroys.fetch_add(1, Ordering::Relaxed);
        *self.state.lock() = SessionState::Disconnected;
    }

    async fn probe_state(&self) -> Result<SessionState, DriverError> {
        Ok(*self.state.lock())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ClientEvent>> {
        self.events_rx.lock().take()
    }

    async fn send_message(&self, recipient: &str, body: &str) -> Result<(), DriverError> {
        self.record_send(SentMessage {
            recipient: recipient.to_string(),
            body: body.to_string(),
            media: None,
            group: false,
        })
        .await
    }

    async fn send_media(&self, recipient: &str, media: &OutgoingMedia) -> Result<(), DriverError> {
        self.record_send(SentMessage {
            recipient: recipient.to_string(),
            body: media.caption.clone().unwrap_or_default(),
            media: Some(media.clone()),
            group: false,
        })
        .await
    }

    async fn send_to_group(&self, group_id: &str, body: &str) -> Result<(), DriverError> {
        self.record_send(SentMessage {
            recipient: group_id.to_string(),
            body: body.to_string(),
            media: None,
            group: true,
        })
        .await
    }

    async fn create_group(
        &self,
        name: &str,
        _participants: &[String],
    ) -> Result<String, DriverError> {
        Ok(format!("group-{name}"))
    }

    async fn add_participants(
        &self,
        _group_id: &str,
        _participants: &[String],
    ) -> Result<(), DriverError> {
        Ok(())
    }

    async fn chat_history(
        &self,
        _contact: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, DriverError> {
        let history = self.behavior.lock().history.clone();
        Ok(history.into_iter().take(limit).collect())
    }

    async fn recent_outgoing(&self, _days_ago: u32) -> Result<Vec<OutgoingSummary>, DriverError> {
        Ok(self.behavior.lock().outgoing.clone())
    }
}

/// Factory handing out preloaded mocks (or fresh defaults) and recording
/// every build.
#[derive(Default)]
pub struct MockDriverFactory {
    preloaded: Mutex<HashMap<String, VecDeque<Arc<MockDriver>>>>,
    built: Mutex<Vec<(AccountId, Arc<MockDriver>)>>,
}

impl MockDriverFactory {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a mock to be returned by the next `build` for `id`.
    pub fn preload(&self, id: &AccountId, driver: Arc<MockDriver>) {
        self.preloaded
            .lock()
            .entry(id.joined())
            .or_default()
            .push_back(driver);
    }

    /// Every driver built for `id`, in build order.
    #[must_use]
    pub fn built_for(&self, id: &AccountId) -> Vec<Arc<MockDriver>> {
        self.built
            .lock()
            .iter()
            .filter(|(built_id, _)| built_id == id)
            .map(|(_, driver)| driver.clone())
            .collect()
    }

    #[must_use]
    pub fn build_count(&self) -> usize {
        self.built.lock().len()
    }
}

impl DriverFactory for MockDriverFactory {
    fn build(&self, id: &AccountId, _config: &DriverConfig) -> Arc<dyn MessagingDriver> {
        let driver = self
            .preloaded
            .lock()
            .get_mut(&id.joined())
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(MockDriver::new);
        self.built.lock().push((id.clone(), driver.clone()));
        driver
    }
}
