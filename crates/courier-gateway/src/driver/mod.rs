//! Client driver abstraction.
//!
//! The underlying messaging client is a black box driven through
//! [`MessagingDriver`]. It emits a small closed set of [`ClientEvent`]
//! signals over a channel taken once at startup; the lifecycle manager owns
//! the consuming loop. Production uses the out-of-process [`bridge`] driver;
//! tests script the in-process [`mock`] driver.

pub mod bridge;
pub mod chrome;
pub mod mock;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use courier_core::{AccountId, SessionState};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Signals a driver emits for one client instance, in driver order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    /// Pairing payload; the account must scan it to authenticate.
    Qr(String),
    /// QR scanned, credential exchange running.
    Authenticated,
    /// Fully connected under the given phone identity.
    Ready {
        /// Phone number the account is bound to.
        phone_number: String,
    },
    /// An inbound message arrived.
    Message(IncomingMessage),
    /// The client dropped; terminal for this instance.
    Disconnected {
        /// Driver-reported reason.
        reason: String,
    },
    /// Authentication failed; the manager retries with backoff.
    AuthFailure {
        /// Driver-reported detail.
        message: String,
    },
}

/// One inbound message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    /// Sender phone number, digits with country code.
    pub sender: String,
    /// Message body (empty for pure contact-card messages).
    pub body: String,
    /// Raw vCard payload when the message is a contact card.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcard: Option<String>,
}

/// Shape of an outbound media send.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Pdf,
    Docx,
    File,
}

/// Outbound media: fetched from `url` and forwarded with optional caption.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMedia {
    pub kind: MediaKind,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

/// One message from a chat history query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// True when this session's account sent it.
    pub from_me: bool,
    pub body: String,
    /// Unix seconds.
    pub timestamp: i64,
}

/// One recent outgoing conversation turn, for unreplied-message queries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingSummary {
    pub recipient: String,
    pub body: String,
    /// Unix seconds.
    pub timestamp: i64,
    /// Whether the recipient has replied since.
    pub replied: bool,
}

/// Driver-level failures. The lifecycle manager maps these onto the gateway
/// error taxonomy.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("driver failed to start: {0}")]
    Start(String),
    #[error("client is not ready")]
    NotReady,
    #[error("send failed: {0}")]
    Send(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<DriverError> for courier_core::GatewayError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Start(cause) => Self::InitializationFailed { cause },
            DriverError::NotReady => Self::Driver("client is not ready".into()),
            DriverError::Send(m) | DriverError::Protocol(m) => Self::Driver(m),
        }
    }
}

/// Per-client driver construction parameters.
#[derive(Clone, Debug)]
pub struct DriverConfig {
    /// Durable artifact directory for this account's credentials and cache.
    pub artifact_dir: PathBuf,
    /// Run without a visible browser window.
    pub headless: bool,
}

/// One browser-automation client instance.
///
/// `start` may be called again on the same instance after an auth failure;
/// implementations tear down and relaunch internally. `take_events` yields
/// the event stream exactly once.
#[async_trait]
pub trait MessagingDriver: Send + Sync {
    async fn start(&self) -> Result<(), DriverError>;

    /// Destroy the underlying client. Idempotent.
    async fn destroy(&self);

    /// Query the live connection state from the client itself.
    async fn probe_state(&self) -> Result<SessionState, DriverError>;

    /// The event stream for this instance; `None` after the first call.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ClientEvent>>;

    async fn send_message(&self, recipient: &str, body: &str) -> Result<(), DriverError>;

    async fn send_media(&self, recipient: &str, media: &OutgoingMedia) -> Result<(), DriverError>;

    async fn send_to_group(&self, group_id: &str, body: &str) -> Result<(), DriverError>;

    /// Create a group and return its id.
    async fn create_group(
        &self,
        name: &str,
        participants: &[String],
    ) -> Result<String, DriverError>;

    async fn add_participants(
        &self,
        group_id: &str,
        participants: &[String],
    ) -> Result<(), DriverError>;

    async fn chat_history(
        &self,
        contact: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, DriverError>;

    /// Outgoing conversation turns from the last `days_ago` days.
    async fn recent_outgoing(&self, days_ago: u32) -> Result<Vec<OutgoingSummary>, DriverError>;
}

/// Builds one driver per account; injected so the server wires the bridge
/// driver and tests wire mocks.
pub trait DriverFactory: Send + Sync {
    fn build(&self, id: &AccountId, config: &DriverConfig) -> Arc<dyn MessagingDriver>;
}
