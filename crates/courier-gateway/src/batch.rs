//! Batch message delivery.
//!
//! Items are processed sequentially with a randomized pause before every
//! send. One bad item never aborts the batch: each item records its own
//! outcome, and the whole report is persisted when the batch finishes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_core::{AccountId, GatewayError};
use courier_store::repositories::report::{ItemOutcome, ReportRepo};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::driver::{MediaKind, OutgoingMedia};
use crate::lifecycle::LifecycleManager;
use crate::phone;

/// Pause strategy between consecutive sends.
#[async_trait]
pub trait Pacer: Send + Sync {
    async fn pause(&self);
}

/// Random pause between `min` and `max`, uniform. The jitter keeps batch
/// traffic from looking machine-timed.
pub struct JitterPacer {
    min: Duration,
    max: Duration,
}

impl JitterPacer {
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }
}

impl Default for JitterPacer {
    fn default() -> Self {
        Self::new(Duration::from_secs(3), Duration::from_secs(13))
    }
}

#[async_trait]
impl Pacer for JitterPacer {
    async fn pause(&self) {
        let millis = {
            let mut rng = rand::rng();
            rng.random_range(self.min.as_millis() as u64..=self.max.as_millis() as u64)
        };
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }
}

/// No pause at all.
pub struct NoopPacer;

#[async_trait]
impl Pacer for NoopPacer {
    async fn pause(&self) {}
}

/// One submitted batch item.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    /// Recipient phone number, digits only.
    pub number: String,
    /// Message body (doubles as the media caption).
    pub message: String,
    /// Per-item media URL, overriding the batch-level one.
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

/// One per-item delivery result.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub recipient: String,
    pub success: bool,
    pub detail: String,
}

/// Aggregate result of one batch.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub report_id: String,
    pub total_success: u64,
    pub total_failed: u64,
    pub total_messages: u64,
    pub outcomes: Vec<BatchOutcome>,
}

fn media_kind_for(project_type: &str) -> Option<MediaKind> {
    match project_type {
        "text" => None,
        "pdf" => Some(MediaKind::Pdf),
        "docx" => Some(MediaKind::Docx),
        "image" => Some(MediaKind::Image),
        _ => Some(MediaKind::File),
    }
}

/// Sends batches through the lifecycle manager and persists their reports.
pub struct BatchSender {
    manager: Arc<LifecycleManager>,
    pacer: Arc<dyn Pacer>,
}

impl BatchSender {
    #[must_use]
    pub fn new(manager: Arc<LifecycleManager>) -> Self {
        Self::with_pacer(manager, Arc::new(JitterPacer::default()))
    }

    #[must_use]
    pub fn with_pacer(manager: Arc<LifecycleManager>, pacer: Arc<dyn Pacer>) -> Self {
        Self { manager, pacer }
    }

    /// Deliver every item, pausing before each send. An empty batch is
    /// rejected up front; a session that is not connected fails the whole
    /// batch before any item runs.
    pub async fn send_batch(
        &self,
        id: &AccountId,
        project_type: &str,
        items: &[BatchItem],
        default_file_url: Option<&str>,
    ) -> Result<BatchReport, GatewayError> {
        if items.is_empty() {
            return Err(GatewayError::Validation(
                "at least one message is required".into(),
            ));
        }

        let status = self.manager.check_connection(id).await?;
        if !status.is_connected {
            return Err(GatewayError::NotReady {
                account: id.joined(),
            });
        }

        info!(
            account = %id.joined(),
            project_type,
            items = items.len(),
            "starting batch"
        );

        let mut outcomes = Vec::with_capacity(items.len());
        let mut last_body = String::new();
        for item in items {
            let outcome = self
                .deliver_one(id, project_type, item, default_file_url, &mut last_body)
                .await;
            debug!(
                account = %id.joined(),
                recipient = %outcome.recipient,
                success = outcome.success,
                "batch item done"
            );
            outcomes.push(outcome);
        }

        let persisted: Vec<ItemOutcome<'_>> = outcomes
            .iter()
            .map(|o| ItemOutcome {
                recipient: &o.recipient,
                success: o.success,
                detail: &o.detail,
            })
            .collect();
        let mut conn = self.manager.conn()?;
        let row = ReportRepo::insert(&mut conn, &id.account_type, project_type, &last_body, &persisted)
            .map_err(GatewayError::from)?;

        info!(
            account = %id.joined(),
            report_id = %row.id,
            success = row.total_success,
            failed = row.total_failed,
            "batch finished"
        );
        Ok(BatchReport {
            report_id: row.id,
            total_success: row.total_success as u64,
            total_failed: row.total_failed as u64,
            total_messages: row.total_messages as u64,
            outcomes,
        })
    }

    async fn deliver_one(
        &self,
        id: &AccountId,
        project_type: &str,
        item: &BatchItem,
        default_file_url: Option<&str>,
        last_body: &mut String,
    ) -> BatchOutcome {
        if item.message.is_empty() || !phone::is_valid_number(&item.number) {
            return BatchOutcome {
                recipient: item.number.clone(),
                success: false,
                detail: "invalid number or message".into(),
            };
        }

        let media = match media_kind_for(project_type) {
            None => None,
            Some(kind) => {
                let url = item
                    .file_url
                    .as_deref()
                    .or(default_file_url)
                    .map(str::to_owned);
                let Some(url) = url else {
                    return BatchOutcome {
                        recipient: item.number.clone(),
                        success: false,
                        detail: format!("file url is required for {project_type}"),
                    };
                };
                Some(OutgoingMedia {
                    kind,
                    url,
                    file_name: item.file_name.clone(),
                    caption: Some(item.message.clone()),
                })
            }
        };

        last_body.clone_from(&item.message);
        self.pacer.pause().await;

        let result = match &media {
            Some(media) => self.manager.send_media(id, &item.number, media).await,
            None => self.manager.send_message(id, &item.number, &item.message).await,
        };
        match result {
            Ok(()) => BatchOutcome {
                recipient: item.number.clone(),
                success: true,
                detail: "sent".into(),
            },
            Err(err) => BatchOutcome {
                recipient: item.number.clone(),
                success: false,
                detail: err.to_string(),
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
