//! Assistant auto-reply calls.
//!
//! Inbound messages for accounts with an active assistant are forwarded to
//! the downstream assistant service. The call is guarded by a named circuit
//! breaker and a hard timeout; degraded or failing calls fall back to canned
//! replies instead of leaving the user without an answer.

use std::sync::Arc;
use std::time::Duration;

use courier_core::GatewayError;
use serde::{Deserialize, Serialize};

use crate::breaker::BreakerRegistry;
use crate::phone;

/// Breaker guarding the assistant service.
pub const ASSISTANT_BREAKER: &str = "assistant-api";

/// Sent when the assistant is degraded (open circuit or timeout).
pub const FALLBACK_DEGRADED: &str =
    "The assistant is taking longer than usual. Please try again in a few minutes.";

/// Sent on any other assistant failure.
pub const FALLBACK_ERROR: &str =
    "Sorry, I could not process your message right now. Please try again later.";

/// Pick the canned reply for a failed assistant call.
#[must_use]
pub fn fallback_for(err: &GatewayError) -> &'static str {
    match err {
        GatewayError::CircuitOpen { .. } | GatewayError::Timeout { .. } => FALLBACK_DEGRADED,
        _ => FALLBACK_ERROR,
    }
}

/// One forwarded inbound message.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantQuery<'a> {
    /// Sender phone number.
    pub sender: &'a str,
    /// Message body.
    pub message: &'a str,
    /// Phone numbers extracted from an attached contact card, if any.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub contact_numbers: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AssistantAnswer {
    reply: String,
}

/// HTTP client for the assistant service.
pub struct AssistantClient {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
    breakers: Arc<BreakerRegistry>,
}

impl AssistantClient {
    #[must_use]
    pub fn new(url: impl Into<String>, timeout: Duration, breakers: Arc<BreakerRegistry>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            timeout,
            breakers,
        }
    }

    /// Ask the assistant for a reply to one inbound message.
    pub async fn respond(&self, query: &AssistantQuery<'_>) -> Result<String, GatewayError> {
        let breaker = self.breakers.breaker(ASSISTANT_BREAKER);
        breaker
            .execute(async {
                let seconds = self.timeout.as_secs();
                let response =
                    tokio::time::timeout(self.timeout, self.http.post(&self.url).json(query).send())
                        .await
                        .map_err(|_| GatewayError::Timeout {
                            operation: "assistant call".into(),
                            seconds,
                        })?
                        .map_err(|e| GatewayError::Driver(format!("assistant call failed: {e}")))?
                        .error_for_status()
                        .map_err(|e| {
                            GatewayError::Driver(format!("assistant returned error: {e}"))
                        })?;
                let answer: AssistantAnswer = response.json().await.map_err(|e| {
                    GatewayError::Driver(format!("unreadable assistant reply: {e}"))
                })?;
                Ok(answer.reply)
            })
            .await
    }
}

/// Extract valid phone numbers from a raw vCard payload.
///
/// TEL lines may carry formatting (`+52 1 55 1234 5678`); everything but the
/// digits is stripped before validation. Order is preserved, duplicates
/// dropped.
#[must_use]
pub fn vcard_numbers(vcard: &str) -> Vec<String> {
    let mut numbers = Vec::new();
    for line in vcard.lines() {
        let line = line.trim();
        if !line.starts_with("TEL") {
            continue;
        }
        let Some((_, value)) = line.split_once(':') else {
            continue;
        };
        let digits: String = value.chars().filter(char::is_ascii_digit).collect();
        if phone::is_valid_number(&digits) && !numbers.contains(&digits) {
            numbers.push(digits);
        }
    }
    numbers
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
