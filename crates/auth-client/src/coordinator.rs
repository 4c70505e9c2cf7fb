//! Single-flight token refresh
//!
//! Every request that hits a 401 asks the coordinator for a valid access
//! token. At most one refresh call is in flight per process; requests that
//! arrive while it runs queue as waiters and all receive the same outcome.
//!
//! Phases:
//! - Idle → Refreshing (first caller after the cooldown, refresh token present)
//! - Refreshing → Idle (attempt finished; every waiter drained in the same step)
//!
//! The attempt runs on its own task, so a caller that gives up waiting does
//! not cancel the refresh for the others.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use session_store::CredentialStore;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::RefreshError;
use crate::metrics;

/// Minimum gap between the end of one refresh and the start of the next.
pub const DEFAULT_REFRESH_COOLDOWN: Duration = Duration::from_secs(2);

/// Outcome delivered to each waiter: the new access token or the failure.
pub type RefreshOutcome = Result<String, RefreshError>;

/// Observable phase of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPhase {
    Idle,
    Refreshing,
}

impl RefreshPhase {
    pub fn label(&self) -> &'static str {
        match self {
            RefreshPhase::Idle => "idle",
            RefreshPhase::Refreshing => "refreshing",
        }
    }
}

enum Phase {
    Idle,
    Refreshing {
        started_at: Instant,
        waiters: Vec<oneshot::Sender<RefreshOutcome>>,
    },
}

struct State {
    phase: Phase,
    last_completed: Option<Instant>,
    attempts: u64,
}

/// Serializes token refreshes for every request in the process.
///
/// Holds the waiter queue and cooldown clock behind one `parking_lot::Mutex`;
/// the lock is never held across an await.
pub struct RefreshCoordinator {
    state: Mutex<State>,
    store: Arc<CredentialStore>,
    http_client: reqwest::Client,
    base_url: String,
    cooldown: Duration,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<CredentialStore>,
        http_client: reqwest::Client,
        base_url: impl Into<String>,
        cooldown: Duration,
    ) -> Self {
        Self {
            state: Mutex::new(State {
                phase: Phase::Idle,
                last_completed: None,
                attempts: 0,
            }),
            store,
            http_client,
            base_url: base_url.into(),
            cooldown,
        }
    }

    pub fn phase(&self) -> RefreshPhase {
        match self.state.lock().phase {
            Phase::Idle => RefreshPhase::Idle,
            Phase::Refreshing { .. } => RefreshPhase::Refreshing,
        }
    }

    /// Refresh calls started since creation.
    pub fn attempts(&self) -> u64 {
        self.state.lock().attempts
    }

    /// Obtain a fresh access token, joining an in-flight refresh if any.
    ///
    /// Fails without touching the network when the previous attempt ended
    /// less than the cooldown ago, or when no refresh token is stored. A
    /// failed attempt clears the credential store before waiters are told.
    pub async fn ensure_valid_token(self: &Arc<Self>) -> RefreshOutcome {
        let rx = self.register()?;
        rx.await.unwrap_or(Err(RefreshError::Abandoned))
    }

    /// Queue the caller, starting an attempt if none is running.
    fn register(self: &Arc<Self>) -> Result<oneshot::Receiver<RefreshOutcome>, RefreshError> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock();

        if let Phase::Refreshing { waiters, .. } = &mut state.phase {
            waiters.push(tx);
            debug!(waiters = waiters.len(), "joined in-flight token refresh");
            return Ok(rx);
        }

        if let Some(last) = state.last_completed {
            let elapsed = last.elapsed();
            if elapsed < self.cooldown {
                let err = RefreshError::CooldownRejected {
                    elapsed_ms: elapsed.as_millis() as u64,
                    cooldown_ms: self.cooldown.as_millis() as u64,
                };
                warn!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    "token refresh requested inside cooldown window"
                );
                metrics::record_refresh(err.outcome_label());
                return Err(err);
            }
        }

        let Some(refresh) = self.store.refresh() else {
            debug!("no refresh token stored, cannot refresh");
            metrics::record_refresh("missing_refresh_token");
            return Err(RefreshError::MissingRefreshToken);
        };

        state.phase = Phase::Refreshing {
            started_at: Instant::now(),
            waiters: vec![tx],
        };
        state.attempts += 1;
        drop(state);

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_attempt(refresh).await });
        Ok(rx)
    }

    async fn run_attempt(&self, refresh: String) {
        let outcome = self.exchange(&refresh).await;

        if let Err(e) = &outcome {
            warn!(error = %e, "token refresh failed, clearing stored session");
            if let Err(clear_err) = self.store.clear_all().await {
                warn!(error = %clear_err, "failed to clear credentials after refresh failure");
            }
        }

        let (waiters, started_at) = {
            let mut state = self.state.lock();
            state.last_completed = Some(Instant::now());
            match std::mem::replace(&mut state.phase, Phase::Idle) {
                Phase::Refreshing {
                    started_at,
                    waiters,
                } => (waiters, Some(started_at)),
                Phase::Idle => (Vec::new(), None),
            }
        };

        let elapsed_ms = started_at.map_or(0, |t| t.elapsed().as_millis() as u64);
        match &outcome {
            Ok(_) => {
                metrics::record_refresh("success");
                info!(waiters = waiters.len(), elapsed_ms, "token refresh succeeded");
            }
            Err(e) => metrics::record_refresh(e.outcome_label()),
        }

        for waiter in waiters {
            // A waiter that stopped listening simply misses the result.
            let _ = waiter.send(outcome.clone());
        }
    }

    async fn exchange(&self, refresh: &str) -> RefreshOutcome {
        let response =
            session_store::refresh_token(&self.http_client, &self.base_url, refresh).await?;
        let access = response.access_token.clone();
        self.store
            .update_tokens(response.access_token, response.refresh_token)
            .await
            .map_err(|e| RefreshError::Store(e.to_string()))?;
        Ok(access)
    }
}
