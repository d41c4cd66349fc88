//! Account identity — the `(account_type, username)` pair.
//!
//! Every managed client session is keyed by an [`AccountId`]. Externally
//! (artifact directories, log lines, orphan scans) the id is rendered as the
//! joined string `username-account_type`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Composite identity of one managed connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountId {
    /// Logical account category (e.g. `marketing`, `support`). Never
    /// contains `-`.
    pub account_type: String,
    /// Owning user's name. May contain `-`.
    pub username: String,
}

impl AccountId {
    /// Create a new account id.
    pub fn new(account_type: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            account_type: account_type.into(),
            username: username.into(),
        }
    }

    /// The joined `username-account_type` rendering.
    #[must_use]
    pub fn joined(&self) -> String {
        format!("{}-{}", self.username, self.account_type)
    }

    /// Parse a joined `username-account_type` string.
    ///
    /// Splits on the **last** `-`: usernames may contain hyphens, account
    /// types never do. Returns `None` if there is no separator or either
    /// side is empty.
    #[must_use]
    pub fn from_joined(joined: &str) -> Option<Self> {
        let (username, account_type) = joined.rsplit_once('-')?;
        if username.is_empty() || account_type.is_empty() {
            return None;
        }
        Some(Self::new(account_type, username))
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.username, self.account_type)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
