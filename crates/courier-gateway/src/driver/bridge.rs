//! Out-of-process bridge driver.
//!
//! Each account gets its own bridge subprocess wrapping the real
//! browser-automation client. The protocol is newline-delimited JSON over
//! stdin/stdout: requests carry `{"op", "id", ...}` and are answered with
//! `{"id", "ok", ...}`; unsolicited lines carry `{"event", ...}` and feed the
//! [`ClientEvent`] stream. Crashing or wedged clients stay isolated in their
//! own process.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use courier_core::{AccountId, SessionState};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::{
    ChatMessage, ClientEvent, DriverConfig, DriverError, DriverFactory, MessagingDriver,
    OutgoingMedia, OutgoingSummary, chrome,
};

type PendingMap = Arc<parking_lot::Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// Builds one [`BridgeDriver`] per account, all spawning the same bridge
/// executable.
pub struct BridgeDriverFactory {
    command: PathBuf,
}

impl BridgeDriverFactory {
    #[must_use]
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl DriverFactory for BridgeDriverFactory {
    fn build(&self, id: &AccountId, config: &DriverConfig) -> Arc<dyn MessagingDriver> {
        Arc::new(BridgeDriver::new(
            self.command.clone(),
            id.clone(),
            config.clone(),
        ))
    }
}

/// One bridge subprocess and its request/event plumbing.
pub struct BridgeDriver {
    command: PathBuf,
    id: AccountId,
    config: DriverConfig,
    seq: AtomicU64,
    destroyed: Arc<AtomicBool>,
    child: tokio::sync::Mutex<Option<Child>>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    pending: PendingMap,
    events_tx: mpsc::UnboundedSender<ClientEvent>,
    events_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<ClientEvent>>>,
}

impl BridgeDriver {
    #[must_use]
    pub fn new(command: PathBuf, id: AccountId, config: DriverConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            command,
            id,
            config,
            seq: AtomicU64::new(0),
            destroyed: Arc::new(AtomicBool::new(false)),
            child: tokio::sync::Mutex::new(None),
            stdin: tokio::sync::Mutex::new(None),
            pending: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            events_tx,
            events_rx: parking_lot::Mutex::new(Some(events_rx)),
        }
    }

    /// Send one request line and await the matching response.
    async fn request(&self, op: &str, mut body: serde_json::Map<String, Value>) -> Result<Value, DriverError> {
        let id = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let _ = body.insert("op".into(), Value::String(op.to_string()));
        let _ = body.insert("id".into(), json!(id));

        let (tx, rx) = oneshot::channel();
        let _ = self.pending.lock().insert(id, tx);

        let line = format!("{}\n", Value::Object(body));
        if let Err(err) = self.write_line(&line).await {
            let _ = self.pending.lock().remove(&id);
            return Err(err);
        }

        let resp = rx
            .await
            .map_err(|_| DriverError::Protocol("bridge closed before responding".into()))?;
        if resp.get("ok").and_then(Value::as_bool).unwrap_or(false) {
            Ok(resp)
        } else {
            let detail = resp
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("bridge error")
                .to_string();
            Err(DriverError::Send(detail))
        }
    }

    async fn write_line(&self, line: &str) -> Result<(), DriverError> {
        let mut stdin = self.stdin.lock().await;
        let stdin = stdin.as_mut().ok_or(DriverError::NotReady)?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| DriverError::Protocol(format!("bridge write failed: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| DriverError::Protocol(format!("bridge flush failed: {e}")))
    }

    fn spawn_reader(
        &self,
        stdout: tokio::process::ChildStdout,
    ) -> tokio::task::JoinHandle<()> {
        let pending = self.pending.clone();
        let events_tx = self.events_tx.clone();
        let destroyed = self.destroyed.clone();
        let account = self.id.joined();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Ok(value) = serde_json::from_str::<Value>(&line) else {
                    warn!(%account, %line, "unparseable bridge line");
                    continue;
                };
                if value.get("event").is_some() {
                    if let Some(event) = parse_event(&value) {
                        let _ = events_tx.send(event);
                    } else {
                        warn!(%account, %line, "unknown bridge event");
                    }
                } else if let Some(id) = value.get("id").and_then(Value::as_u64) {
                    if let Some(tx) = pending.lock().remove(&id) {
                        let _ = tx.send(value);
                    }
                }
            }
            // Stream ended. A deliberate destroy already told the manager;
            // anything else is the bridge dying under us.
            if !destroyed.load(Ordering::Relaxed) {
                debug!(%account, "bridge stdout closed");
                let _ = events_tx.send(ClientEvent::Disconnected {
                    reason: "bridge process exited".into(),
                });
            }
        })
    }
}

#[async_trait]
impl MessagingDriver for BridgeDriver {
    async fn start(&self) -> Result<(), DriverError> {
        let mut child_slot = self.child.lock().await;

        // Restarting after an auth failure relaunches the process.
        if let Some(mut old) = child_slot.take() {
            let _ = old.kill().await;
        }
        *self.stdin.lock().await = None;

        let mut cmd = tokio::process::Command::new(&self.command);
        let _ = cmd
            .arg("--account")
            .arg(self.id.joined())
            .arg("--session-dir")
            .arg(&self.config.artifact_dir)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);
        if self.config.headless {
            let _ = cmd.arg("--headless");
        }
        if let Some(browser) = chrome::find_chromium() {
            let _ = cmd.arg("--browser").arg(browser);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| DriverError::Start(format!("failed to spawn bridge: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DriverError::Start("bridge stdout unavailable".into()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DriverError::Start("bridge stdin unavailable".into()))?;

        let _ = self.spawn_reader(stdout);
        *self.stdin.lock().await = Some(stdin);
        *child_slot = Some(child);
        drop(child_slot);

        debug!(account = %self.id.joined(), "bridge spawned");
        self.request("init", serde_json::Map::new())
            .await
            .map_err(|e| DriverError::Start(e.to_string()))?;
        Ok(())
    }

    async fn destroy(&self) {
        self.destroyed.store(true, Ordering::Relaxed);
        // Best-effort orderly shutdown before the kill; a wedged bridge
        // must not stall teardown.
        let _ = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            self.request("shutdown", serde_json::Map::new()),
        )
        .await;
        *self.stdin.lock().await = None;
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }
    }

    async fn probe_state(&self) -> Result<SessionState, DriverError> {
        let resp = self.request("state", serde_json::Map::new()).await?;
        let state = resp
            .get("state")
            .cloned()
            .ok_or_else(|| DriverError::Protocol("state response missing state".into()))?;
        serde_json::from_value(state)
            .map_err(|e| DriverError::Protocol(format!("bad state value: {e}")))
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ClientEvent>> {
        self.events_rx.lock().take()
    }

    async fn send_message(&self, recipient: &str, body: &str) -> Result<(), DriverError> {
        let mut req = serde_json::Map::new();
        let _ = req.insert("recipient".into(), json!(recipient));
        let _ = req.insert("body".into(), json!(body));
        let _ = self.request("sendMessage", req).await?;
        Ok(())
    }

    async fn send_media(&self, recipient: &str, media: &OutgoingMedia) -> Result<(), DriverError> {
        let mut req = serde_json::Map::new();
        let _ = req.insert("recipient".into(), json!(recipient));
        let _ = req.insert(
            "media".into(),
            serde_json::to_value(media)
                .map_err(|e| DriverError::Protocol(format!("unencodable media: {e}")))?,
        );
        let _ = self.request("sendMedia", req).await?;
        Ok(())
    }

    async fn send_to_group(&self, group_id: &str, body: &str) -> Result<(), DriverError> {
        let mut req = serde_json::Map::new();
        let _ = req.insert("groupId".into(), json!(group_id));
        let _ = req.insert("body".into(), json!(body));
        let _ = self.request("sendToGroup", req).await?;
        Ok(())
    }

    async fn create_group(
        &self,
        name: &str,
        participants: &[String],
    ) -> Result<String, DriverError> {
        let mut req = serde_json::Map::new();
        let _ = req.insert("name".into(), json!(name));
        let _ = req.insert("participants".into(), json!(participants));
        let resp = self.request("createGroup", req).await?;
        resp.get("groupId")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| DriverError::Protocol("createGroup response missing groupId".into()))
    }

    async fn add_participants(
        &self,
        group_id: &str,
        participants: &[String],
    ) -> Result<(), DriverError> {
        let mut req = serde_json::Map::new();
        let _ = req.insert("groupId".into(), json!(group_id));
        let _ = req.insert("participants".into(), json!(participants));
        let _ = self.request("addParticipants", req).await?;
        Ok(())
    }

    async fn chat_history(
        &self,
        contact: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, DriverError> {
        let mut req = serde_json::Map::new();
        let _ = req.insert("contact".into(), json!(contact));
        let _ = req.insert("limit".into(), json!(limit));
        let resp = self.request("chatHistory", req).await?;
        let messages = resp
            .get("messages")
            .cloned()
            .ok_or_else(|| DriverError::Protocol("chatHistory response missing messages".into()))?;
        serde_json::from_value(messages)
            .map_err(|e| DriverError::Protocol(format!("bad chat history: {e}")))
    }

    async fn recent_outgoing(&self, days_ago: u32) -> Result<Vec<OutgoingSummary>, DriverError> {
        let mut req = serde_json::Map::new();
        let _ = req.insert("daysAgo".into(), json!(days_ago));
        let resp = self.request("recentOutgoing", req).await?;
        let messages = resp.get("messages").cloned().ok_or_else(|| {
            DriverError::Protocol("recentOutgoing response missing messages".into())
        })?;
        serde_json::from_value(messages)
            .map_err(|e| DriverError::Protocol(format!("bad outgoing summary: {e}")))
    }
}

/// Decode one unsolicited bridge line into a [`ClientEvent`].
fn parse_event(value: &Value) -> Option<ClientEvent> {
    let kind = value.get("event")?.as_str()?;
    match kind {
        "qr" => Some(ClientEvent::Qr(value.get("payload")?.as_str()?.to_string())),
        "authenticated" => Some(ClientEvent::Authenticated),
        "ready" => Some(ClientEvent::Ready {
            phone_number: value.get("phoneNumber")?.as_str()?.to_string(),
        }),
        "message" => serde_json::from_value(value.get("payload")?.clone())
            .ok()
            .map(ClientEvent::Message),
        "disconnected" => Some(ClientEvent::Disconnected {
            reason: value
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
        }),
        "auth_failure" => Some(ClientEvent::AuthFailure {
            message: value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("authentication failed")
                .to_string(),
        }),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn parse_event_decodes_the_closed_set() {
        let qr = json!({"event": "qr", "payload": "pairing-data"});
        assert_eq!(
            parse_event(&qr),
            Some(ClientEvent::Qr("pairing-data".into()))
        );

        let ready = json!({"event": "ready", "phoneNumber": "5215512345678"});
        assert_eq!(
            parse_event(&ready),
            Some(ClientEvent::Ready {
                phone_number: "5215512345678".into()
            })
        );

        let msg = json!({
            "event": "message",
            "payload": {"sender": "14155550100", "body": "hola"}
        });
        assert!(matches!(
            parse_event(&msg),
            Some(ClientEvent::Message(m)) if m.sender == "14155550100"
        ));

        let dropped = json!({"event": "disconnected"});
        assert_eq!(
            parse_event(&dropped),
            Some(ClientEvent::Disconnected {
                reason: "unknown".into()
            })
        );

        assert_eq!(parse_event(&json!({"event": "???"})), None);
        assert_eq!(parse_event(&json!({"id": 3, "ok": true})), None);
    }

    /// Fake bridge: emits one QR event, then acks every request in order.
    fn fake_bridge(dir: &tempfile::TempDir) -> PathBuf {
        let script = dir.path().join("fake-bridge.sh");
        std::fs::write(
            &script,
            concat!(
                "#!/bin/sh\n",
                "echo '{\"event\":\"qr\",\"payload\":\"pairing-data\"}'\n",
                "n=0\n",
                "while read -r line; do\n",
                "  n=$((n+1))\n",
                "  echo \"{\\\"id\\\":$n,\\\"ok\\\":true,\\\"state\\\":\\\"CONNECTED\\\"}\"\n",
                "done\n",
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[tokio::test]
    async fn round_trip_against_fake_bridge() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_bridge(&dir);
        let driver = BridgeDriver::new(
            script,
            AccountId::new("wa", "alice"),
            DriverConfig {
                artifact_dir: dir.path().join("alice-wa"),
                headless: true,
            },
        );
        let mut events = driver.take_events().unwrap();

        driver.start().await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(ClientEvent::Qr("pairing-data".into()))
        );

        driver.send_message("14155550100", "hello").await.unwrap();
        assert_eq!(driver.probe_state().await.unwrap(), SessionState::Connected);

        driver.destroy().await;
    }

    #[tokio::test]
    async fn start_fails_for_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let driver = BridgeDriver::new(
            dir.path().join("no-such-bridge"),
            AccountId::new("wa", "bob"),
            DriverConfig {
                artifact_dir: dir.path().join("bob-wa"),
                headless: true,
            },
        );
        let err = driver.start().await.unwrap_err();
        assert!(matches!(err, DriverError::Start(_)));
    }

    #[tokio::test]
    async fn events_stream_is_taken_once() {
        let dir = tempfile::tempdir().unwrap();
        let driver = BridgeDriver::new(
            dir.path().join("unused"),
            AccountId::new("wa", "carol"),
            DriverConfig {
                artifact_dir: dir.path().join("carol-wa"),
                headless: true,
            },
        );
        assert!(driver.take_events().is_some());
        assert!(driver.take_events().is_none());
    }
}
