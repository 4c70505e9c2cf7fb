//! Authenticated HTTP client for the taskboard API
//!
//! Sends requests with the stored access token and recovers from expired
//! tokens without the caller noticing. Refreshes are single-flight per
//! process and rate limited by a cooldown; a failed refresh logs out every
//! process sharing the credential file.
//!
//! Request lifecycle:
//! 1. `Dispatcher::send` attaches the access token from `CredentialStore`
//! 2. Upstream answers 401 → `RefreshCoordinator::ensure_valid_token`
//! 3. Concurrent 401s queue behind the one in-flight refresh
//! 4. Refresh succeeds → new tokens stored, every queued request retried once
//! 5. Refresh fails → store cleared, every queued request gets `AuthExpired`

pub mod classify;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod metrics;

#[cfg(test)]
mod test_support;

pub use classify::{Classification, classify_status};
pub use coordinator::{DEFAULT_REFRESH_COOLDOWN, RefreshCoordinator, RefreshOutcome, RefreshPhase};
pub use dispatcher::{ApiRequest, ApiResponse, Dispatcher};
pub use error::{Error, RefreshError, Result, RetryFailure};
