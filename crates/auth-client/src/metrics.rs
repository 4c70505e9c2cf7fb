//! Counters for refresh and retry activity
//!
//! Emitted through the `metrics` facade; the service installs the
//! Prometheus recorder. Without a recorder these are no-ops.
//!
//! - `auth_refresh_total` (counter): label `outcome`
//! - `auth_request_retries_total` (counter)
//! - `auth_forced_logouts_total` (counter)

/// Record a finished (or refused) refresh attempt.
pub fn record_refresh(outcome: &'static str) {
    metrics::counter!("auth_refresh_total", "outcome" => outcome).increment(1);
}

/// Record a request replayed after a successful refresh.
pub fn record_retry() {
    metrics::counter!("auth_request_retries_total").increment(1);
}

/// Record a logout forced by a failed refresh.
pub fn record_forced_logout() {
    metrics::counter!("auth_forced_logouts_total").increment(1);
}
