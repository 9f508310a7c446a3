//! Error types shared across the sync layer.
//!
//! Two layers: [`GatewayError`] is what a remote call can fail with, and
//! [`SyncError`] is what a consumer-facing operation returns after any local
//! rollback has already happened. Collection-level failures during bulk load
//! and polling are not errors at all; they are reported as
//! [`PartialLoadWarning`]s and the affected collection keeps its old value.

use std::fmt;

use thiserror::Error;

use crate::model::{Collection, RecordId};

// ── Gateway errors ───────────────────────────────────────────────

/// Failure of a single remote call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The remote store could not be reached or the request did not complete.
    #[error("{table}: transport failure: {cause}")]
    Transport { table: String, cause: String },
    /// The remote store answered with a structured error.
    #[error("{table}: rejected ({status}): {cause}")]
    Rejected {
        table: String,
        status: u16,
        cause: String,
    },
}

impl GatewayError {
    pub fn transport(table: &str, cause: impl fmt::Display) -> Self {
        Self::Transport {
            table: table.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn rejected(table: &str, status: u16, cause: impl fmt::Display) -> Self {
        Self::Rejected {
            table: table.to_string(),
            status,
            cause: cause.to_string(),
        }
    }

    /// Table the failed call addressed.
    pub fn table(&self) -> &str {
        match self {
            Self::Transport { table, .. } | Self::Rejected { table, .. } => table,
        }
    }
}

// ── Operation errors ─────────────────────────────────────────────

/// Error returned by consumer-facing operations.
///
/// By the time a caller sees one of these the local state has already been
/// restored to what it was before the operation started.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// Network issue; the same operation may succeed if retried.
    #[error("{table}: could not reach the server: {cause}")]
    Transport { table: String, cause: String },

    /// The server refused the write (constraint, permission, bad payload).
    #[error("{table}: rejected by server ({status}): {cause}")]
    RemoteRejection {
        table: String,
        status: u16,
        cause: String,
    },

    /// A record could not be converted between wire and internal form.
    #[error("{collection}: malformed record: {cause}")]
    Mapping { collection: Collection, cause: String },

    /// The targeted record is not in the local store, or the server matched
    /// no row for it (missing remotely or hidden by row-level policy).
    #[error("{collection}: no record with id {id}")]
    NotFound { collection: Collection, id: RecordId },

    /// A status change the lifecycle does not allow.
    #[error("{collection} {id}: cannot move from {from} to {to}")]
    InvalidTransition {
        collection: Collection,
        id: RecordId,
        from: String,
        to: String,
    },
}

impl SyncError {
    pub(crate) fn mapping(collection: Collection, cause: impl fmt::Display) -> Self {
        Self::Mapping {
            collection,
            cause: cause.to_string(),
        }
    }

    pub(crate) fn not_found(collection: Collection, id: &RecordId) -> Self {
        Self::NotFound {
            collection,
            id: id.clone(),
        }
    }

    /// Whether the failure was a connectivity problem rather than a refusal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Short text suitable for showing to the person who triggered the write.
    pub fn user_message(&self) -> String {
        match self {
            Self::Transport { .. } => {
                "Network issue: the change was not saved. Please try again.".to_string()
            }
            Self::RemoteRejection { cause, .. } => {
                format!("The server rejected the change: {cause}")
            }
            Self::Mapping { .. } => "The record could not be read.".to_string(),
            Self::NotFound { .. } => "That record no longer exists.".to_string(),
            Self::InvalidTransition { from, to, .. } => {
                format!("A {from} item cannot be marked {to}.")
            }
        }
    }
}

impl From<GatewayError> for SyncError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Transport { table, cause } => Self::Transport { table, cause },
            GatewayError::Rejected {
                table,
                status,
                cause,
            } => Self::RemoteRejection {
                table,
                status,
                cause,
            },
        }
    }
}

// ── Load warnings ────────────────────────────────────────────────

/// A collection that could not be refreshed. The previous value was kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialLoadWarning {
    pub collection: Collection,
    pub cause: String,
}

impl fmt::Display for PartialLoadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} not loaded: {}", self.collection, self.cause)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_errors_map_to_typed_sync_errors() {
        let transport: SyncError = GatewayError::transport("bookings", "connection refused").into();
        assert!(transport.is_retryable());
        assert!(transport.user_message().contains("Network issue"));

        let rejected: SyncError =
            GatewayError::rejected("bookings", 409, "duplicate key").into();
        assert!(!rejected.is_retryable());
        assert!(rejected.user_message().contains("duplicate key"));
        assert!(matches!(
            rejected,
            SyncError::RemoteRejection { status: 409, .. }
        ));
    }

    #[test]
    fn gateway_error_reports_table() {
        assert_eq!(GatewayError::transport("messages", "timeout").table(), "messages");
        assert_eq!(GatewayError::rejected("plans", 400, "bad").table(), "plans");
    }

    #[test]
    fn warnings_render_collection_and_cause() {
        let warning = PartialLoadWarning {
            collection: Collection::Transactions,
            cause: "timeout".into(),
        };
        assert_eq!(warning.to_string(), "transactions not loaded: timeout");
    }
}
