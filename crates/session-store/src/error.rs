//! Error types for credential storage and auth endpoint calls

/// Errors from credential storage and auth endpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("credentials rejected: {0}")]
    Rejected(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("file watch error: {0}")]
    Watch(String),
}

/// Result alias for session store operations.
pub type Result<T> = std::result::Result<T, Error>;
