//! Error types for request dispatch and token refresh

use crate::dispatcher::ApiResponse;

/// Why a refresh attempt produced no token.
///
/// Cloned to every caller waiting on the same attempt. Every variant forces
/// a logout; `CooldownRejected` included.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("no refresh token available")]
    MissingRefreshToken,

    #[error("refresh token rejected: {0}")]
    Rejected(String),

    #[error("refresh request failed: {0}")]
    Network(String),

    #[error("refresh endpoint error: {0}")]
    Endpoint(String),

    #[error("refresh requested {elapsed_ms}ms after the previous attempt (cooldown {cooldown_ms}ms)")]
    CooldownRejected { elapsed_ms: u64, cooldown_ms: u64 },

    #[error("storing refreshed tokens failed: {0}")]
    Store(String),

    #[error("refresh attempt ended without an outcome")]
    Abandoned,
}

impl RefreshError {
    /// Metrics/log label for the attempt outcome.
    pub fn outcome_label(&self) -> &'static str {
        match self {
            RefreshError::CooldownRejected { .. } => "cooldown_rejected",
            _ => "refresh_failed",
        }
    }
}

impl From<session_store::Error> for RefreshError {
    fn from(err: session_store::Error) -> Self {
        match err {
            session_store::Error::Rejected(msg) => RefreshError::Rejected(msg),
            session_store::Error::Http(msg) => RefreshError::Network(msg),
            session_store::Error::TokenExchange(msg)
            | session_store::Error::CredentialParse(msg) => RefreshError::Endpoint(msg),
            session_store::Error::Io(msg) | session_store::Error::Watch(msg) => {
                RefreshError::Store(msg)
            }
        }
    }
}

/// How the single retry of a request failed.
#[derive(Debug, thiserror::Error)]
pub enum RetryFailure {
    #[error("still unauthorized ({})", .0.status)]
    Unauthorized(ApiResponse),

    #[error("{0}")]
    Network(String),
}

/// Errors surfaced by `Dispatcher::send`.
///
/// Non-auth HTTP error statuses are not errors: they come back as
/// `Ok(ApiResponse)` so callers can inspect status and body.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("network error: {0}")]
    Network(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The original 401, returned after the token refresh failed.
    #[error("authorization expired and token refresh failed: {source}")]
    AuthExpired {
        response: ApiResponse,
        #[source]
        source: RefreshError,
    },

    #[error("retried request failed: {0}")]
    RetryExhausted(RetryFailure),
}

impl Error {
    /// HTTP status of the response behind this error, if there was one.
    pub fn status(&self) -> Option<reqwest::StatusCode> {
        match self {
            Error::AuthExpired { response, .. }
            | Error::RetryExhausted(RetryFailure::Unauthorized(response)) => Some(response.status),
            _ => None,
        }
    }

    /// Whether the caller's session is gone and a new login is needed.
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            Error::AuthExpired { .. } | Error::RetryExhausted(RetryFailure::Unauthorized(_))
        )
    }
}

/// Result alias for dispatch operations.
pub type Result<T> = std::result::Result<T, Error>;
