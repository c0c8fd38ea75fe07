// Error taxonomy for session operations.

use thiserror::Error;

/// Everything that can go wrong between the user and the backend.
///
/// The projection store itself never fails; all fallibility is funnelled into
/// this taxonomy at the edges (validation, snapshot loader, RPC calls,
/// realtime channel) so callers can pick a recovery path per variant.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Rejected before any network call. No projection mutation happened.
    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    /// No active session exists for the given code. Not retryable.
    #[error("no active session with code {code}")]
    NotFound { code: String },

    /// Network or server failure. Safe to retry; for bids this triggers a
    /// deterministic rollback of the optimistic delta.
    #[error("backend unavailable: {0}")]
    Transient(String),

    /// The realtime channel dropped or refused the subscription. Does not
    /// block the UI; bounded by a snapshot re-fetch on reconnect.
    #[error("realtime channel: {0}")]
    Connection(String),
}

impl SessionError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        SessionError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Whether a manual retry is worth offering to the user.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Transient(_) | SessionError::Connection(_))
    }
}
