//! Server-layer errors: binding, settings, and token verification.

use thiserror::Error;

/// Failures raised outside the gateway's own taxonomy.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("settings I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("identity token rejected: {0}")]
    Token(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

impl ServerError {
    /// Stable wire code for command error payloads.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) | Self::Json(_) => "settings_error",
            Self::Token(_) => "auth_failure",
            Self::Bind { .. } => "bind_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_errors_carry_the_auth_code() {
        let err = ServerError::Token("expired".into());
        assert_eq!(err.code(), "auth_failure");
        assert!(err.to_string().contains("expired"));
    }
}
