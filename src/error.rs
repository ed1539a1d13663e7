//! Error taxonomy for the counting engine.
//!
//! Soft outcomes (already counted, unexpected product, unknown barcode) are
//! not errors — they are `ScanOutcome` variants. Everything here is a real
//! failure the operator must act on.

use thiserror::Error;

use crate::api::ApiError;
use crate::session::CountStatus;

/// Failures surfaced by count session operations.
#[derive(Debug, Error)]
pub enum CountError {
    /// Operation attempted in a state that forbids it. Raised before any
    /// network call when local state is known; after a remote rejection the
    /// caller must re-fetch session state instead of retrying blindly.
    #[error("cannot {operation} a session that is {status}")]
    InvalidState {
        operation: &'static str,
        status: CountStatus,
    },

    /// Cancelling requires a non-empty reason.
    #[error("cancellation reason is required")]
    MissingReason,

    /// Scan quantity must be a positive integer.
    #[error("scan quantity must be at least 1")]
    InvalidQuantity,

    /// Remote call failed. Check `retryable()` before offering a retry.
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl CountError {
    /// Whether retrying the same operation without a state re-sync is safe.
    pub fn retryable(&self) -> bool {
        match self {
            CountError::Api(e) => e.retryable(),
            _ => false,
        }
    }
}
