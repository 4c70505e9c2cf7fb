//! Response classification for API calls
//!
//! Only a 401 means the access token expired and is worth one refresh and
//! retry. A 403 is a real permission decision by the backend (role checks)
//! and is handed back to the caller like any other status.

use reqwest::StatusCode;

/// What the dispatcher should do with an upstream response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Access token rejected: refresh and retry once
    AuthExpired,
    /// Return to the caller unchanged
    PassThrough,
}

/// Classify a response by status code.
pub fn classify_status(status: StatusCode) -> Classification {
    match status {
        StatusCode::UNAUTHORIZED => Classification::AuthExpired,
        _ => Classification::PassThrough,
    }
}
