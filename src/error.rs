//! Error types for beacon-alerts.
//!
//! All errors are strongly typed using thiserror, layered by the collaborator
//! that produced them. `AlertError` is the top-level type returned by the
//! engine, the dispatcher and the change-feed consumer.

use thiserror::Error;

use crate::ids::DocId;
use crate::notify::GatewayError;
use crate::storage::StorageError;

/// Programmer or deployment mistakes that make evaluation meaningless.
///
/// These are never retried and never skipped: the code path that hits one
/// must stop.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Alert engine has no presence history attached")]
    MissingPresenceHistory,

    #[error("Alert '{alert_id}' requires a presence history but the engine was built without one")]
    PresenceRequired {
        alert_id: DocId,
    },
}

/// Malformed input: change batches, documents, timestamps.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed change batch: {message}")]
    ChangeBatch {
        message: String,
    },

    #[error("Malformed document '{id}': {message}")]
    Document {
        id: DocId,
        message: String,
    },

    #[error("Invalid timestamp '{value}': {message}")]
    Timestamp {
        value: String,
        message: String,
    },

    #[error("Geofence action '{action}' has no display form")]
    UnknownAction {
        action: String,
    },
}

/// Top-level error type for beacon-alerts.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl AlertError {
    /// Returns true if this is a storage error.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if this is a decode error.
    #[must_use]
    pub const fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }

    /// Returns true if the error must halt the code path that produced it.
    ///
    /// Configuration errors are the only fatal class: every other error is
    /// logged and the current unit of work abandoned.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Returns true if the same call might succeed later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => matches!(e, StorageError::Connection(_)),
            Self::Gateway(e) => matches!(e, GatewayError::Unreachable(_)),
            Self::Decode(_) | Self::Configuration(_) => false,
        }
    }
}

/// Result type alias for beacon-alerts operations.
pub type AlertResult<T> = Result<T, AlertError>;
