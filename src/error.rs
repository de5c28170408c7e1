//! Error taxonomy for the relay core.
//!
//! Errors from state-changing operations (create, close, confirm) propagate to
//! the caller for user-facing reporting. Best-effort bookkeeping (activity
//! timestamps, edit/delete map misses) is absorbed and logged instead.

use std::time::Duration;

use thiserror::Error;

/// Storage collaborator failures, kept separate so the registry can decide
/// which call sites surface them and which absorb them.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ticket store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("ticket record could not be encoded or decoded: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("ticket store unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced to the calling layer. Every rejected operation yields a
/// specific, distinguishable reason so callers can render an appropriate
/// message.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The actor exceeded a cooldown window. Recoverable; retry later.
    #[error("rate limited, retry in {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The requester's open-ticket cap is reached. An existing ticket must be
    /// closed first.
    #[error("open ticket limit reached ({limit})")]
    LimitExceeded { limit: usize },

    /// The relay target is not a recognized open conversation, e.g. a stale
    /// channel reference after close.
    #[error("no active ticket for this conversation")]
    NoActiveTicket,

    /// The close confirmation window elapsed before a response arrived.
    #[error("confirmation window elapsed")]
    Expired,

    /// The storage collaborator failed. Transient; the operation may be
    /// retried by the caller.
    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(#[from] StoreError),

    /// The chat platform collaborator rejected or failed a call.
    #[error("platform call failed: {0}")]
    Platform(anyhow::Error),
}

impl RelayError {
    /// Wrap a platform collaborator failure.
    pub fn platform(error: anyhow::Error) -> Self {
        Self::Platform(error)
    }

    /// Whether retrying the same operation later can succeed without the user
    /// changing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::PersistenceUnavailable(_) | Self::Platform(_)
        )
    }

    /// Whether the rejection is a policy decision rather than a failure.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::LimitExceeded { .. } | Self::Expired
        )
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
