//! Service-specific error types
//!
//! Proxied requests report failures through `auth_client::Error`; these
//! cover the service's own session endpoints.

use axum::http::StatusCode;
use axum::response::Response;
use thiserror::Error;

use crate::proxy::error_response;

/// Failures of `/session/login` and `/session/logout`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid email or password: {0}")]
    LoginRejected(String),

    #[error("auth endpoint unavailable: {0}")]
    Upstream(String),

    #[error("credential store error: {0}")]
    Store(String),
}

impl Error {
    /// Classify a login call failure.
    pub fn from_login(err: session_store::Error) -> Self {
        match err {
            session_store::Error::Rejected(msg) => Error::LoginRejected(msg),
            other => Error::Upstream(other.to_string()),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::LoginRejected(_) => StatusCode::UNAUTHORIZED,
            Error::Upstream(_) => StatusCode::BAD_GATEWAY,
            Error::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            Error::LoginRejected(_) => "invalid_credentials",
            Error::Upstream(_) => "upstream_error",
            Error::Store(_) => "store_error",
        }
    }

    pub fn into_response(self, request_id: &str) -> Response {
        error_response(self.status(), self.error_type(), &self.to_string(), request_id)
    }
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_login_is_unauthorized() {
        let err = Error::from_login(session_store::Error::Rejected("401".into()));
        assert!(matches!(err, Error::LoginRejected(_)));
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.error_type(), "invalid_credentials");
    }

    #[test]
    fn unreachable_backend_is_bad_gateway() {
        let err = Error::from_login(session_store::Error::Http("connection refused".into()));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn store_failure_is_internal() {
        let err = Error::Store("disk full".into());
        assert_eq!(err.into_response("req_1").status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
