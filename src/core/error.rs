//! Failure taxonomy surfaced by the data-access layer

use reqwest::StatusCode;

/// Errors returned by the request client, the query layer and the reconciler.
///
/// Cloneable so one failed fetch can be handed to every observer of the same key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ApiError {
    /// Transport failure, no response was received.
    #[error("Network error: {0}")]
    Network(String),
    /// Non-2xx response other than an expired credential.
    #[error("HTTP error: {status}: {body}")]
    Http { status: StatusCode, body: String },
    /// The credential could not be refreshed; the session has been cleared.
    #[error("Session expired, please log in again")]
    SessionExpired,
    /// Every source of a merge group failed or produced nothing.
    #[error("No data available for {group}")]
    MergeEmpty { group: String },
    /// A 2xx response whose body could not be decoded.
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Network(e.to_string())
    }
}
