//! Error types for Campus Feed
//!
//! Two layers: [`GatewayError`] is the tagged outcome of a single remote round
//! trip, decoded once at the gateway boundary. [`FeedError`] is what view
//! adapters receive from the read and write paths.

use std::time::Duration;

use thiserror::Error;

/// Failure outcome of a remote gateway call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The addressed row does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A row with the same identity already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Network-level failure (connection refused, reset, dropped)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The call did not resolve within the configured interval
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The session is no longer valid on the platform
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The platform rejected the request as malformed
    #[error("Validation rejected: {0}")]
    ValidationRejected(String),
}

impl GatewayError {
    /// Transport failures and timeouts may succeed if retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Transport(_) | GatewayError::Timeout(_))
    }
}

/// Result type alias for gateway calls
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Error returned to view adapters by the read and write paths
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// Network failure or timeout; local state was restored or kept
    #[error("Transport failed: {0}")]
    TransportFailed(String),

    /// Session invalid; the user must authenticate again
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Input rejected locally or by the platform
    #[error("Validation rejected: {0}")]
    ValidationRejected(String),

    /// A background mutation task panicked or was aborted
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FeedError {
    /// Whether the view should offer a retry affordance
    pub fn is_retryable(&self) -> bool {
        matches!(self, FeedError::TransportFailed(_))
    }

    /// Short actionable message suitable for a toast or banner
    pub fn user_message(&self) -> &'static str {
        match self {
            FeedError::TransportFailed(_) => {
                "Couldn't reach the server. Your change was undone; try again."
            }
            FeedError::Unauthorized(_) => "Your session has expired. Please sign in again.",
            FeedError::ValidationRejected(_) => "That request was not accepted.",
            FeedError::Internal(_) => "Something went wrong. Please try again.",
        }
    }
}

impl From<GatewayError> for FeedError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Transport(msg) => FeedError::TransportFailed(msg),
            GatewayError::Timeout(after) => {
                FeedError::TransportFailed(format!("timed out after {:?}", after))
            }
            GatewayError::Unauthorized(msg) => FeedError::Unauthorized(msg),
            GatewayError::ValidationRejected(msg) => FeedError::ValidationRejected(msg),
            // Only reached where the caller did not absorb them
            GatewayError::NotFound(msg) => {
                FeedError::ValidationRejected(format!("not found: {}", msg))
            }
            GatewayError::AlreadyExists(msg) => {
                FeedError::ValidationRejected(format!("already exists: {}", msg))
            }
        }
    }
}

/// Result type alias using FeedError
pub type FeedResult<T> = Result<T, FeedError>;
