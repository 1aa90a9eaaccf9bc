//! Error taxonomy for mailbox sync
//!
//! Every variant here fails the current job attempt and is handed to the
//! queue's retry policy. Missing users and expired credentials are not errors;
//! they end a job as [`crate::sync::SkipReason`].

/// Failure during a sync attempt
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Network failure, undecodable response, or non-2xx status other than
    /// auth rejection and rate limiting
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Provider answered 429
    #[error("Rate limited by mail provider{}", retry_after_suffix(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    /// Provider answered 401 or 403: the credential is expired or revoked
    #[error("Mail provider rejected the credential (HTTP {status})")]
    AuthRejected { status: u16 },

    /// Malformed provider data
    #[error("Invalid message {}: {reason}", display_id(.message_id))]
    Validation {
        message_id: Option<String>,
        reason: String,
    },

    /// Persistence failure
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl SyncError {
    /// Shorthand for a validation failure on a specific message
    pub fn validation(message_id: Option<&str>, reason: impl Into<String>) -> Self {
        Self::Validation {
            message_id: message_id.map(str::to_string),
            reason: reason.into(),
        }
    }

    /// Whether retrying is unlikely to help without outside action
    /// (re-authorization). Used to flag exhausted jobs in the logs.
    pub fn is_likely_permanent(&self) -> bool {
        matches!(self, Self::AuthRejected { .. })
    }
}

fn retry_after_suffix(secs: &Option<u64>) -> String {
    match secs {
        Some(secs) => format!(" (retry after {}s)", secs),
        None => String::new(),
    }
}

fn display_id(id: &Option<String>) -> &str {
    id.as_deref().unwrap_or("<unknown>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = SyncError::RateLimited {
            retry_after_secs: Some(30),
        };
        assert_eq!(err.to_string(), "Rate limited by mail provider (retry after 30s)");

        let err = SyncError::RateLimited {
            retry_after_secs: None,
        };
        assert_eq!(err.to_string(), "Rate limited by mail provider");

        let err = SyncError::validation(Some("AAMk1"), "missing field `subject`");
        assert_eq!(err.to_string(), "Invalid message AAMk1: missing field `subject`");

        let err = SyncError::validation(None, "missing field `id`");
        assert_eq!(err.to_string(), "Invalid message <unknown>: missing field `id`");
    }

    #[test]
    fn test_only_auth_rejection_is_likely_permanent() {
        assert!(SyncError::AuthRejected { status: 401 }.is_likely_permanent());
        assert!(!SyncError::Transport("reset".into()).is_likely_permanent());
        assert!(!SyncError::RateLimited { retry_after_secs: None }.is_likely_permanent());
        assert!(!SyncError::from(anyhow::anyhow!("disk full")).is_likely_permanent());
    }
}
