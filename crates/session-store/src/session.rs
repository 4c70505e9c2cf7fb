//! In-memory session mirror
//!
//! Each process keeps its own view of the signed-in session, hydrated once
//! from the credential store and then kept current by `SessionEvent`s from
//! both delivery scopes. Consumers read the mirror through a
//! `tokio::sync::watch` channel and never touch the store directly.
//!
//! Status transitions:
//! - Hydrating → Authenticated (all three fields present at startup)
//! - Hydrating → Anonymous (anything missing at startup)
//! - Authenticated → LoggedOut (any field cleared, carries the login route)
//! - Anonymous/LoggedOut → Authenticated (access token and user present again)

use std::sync::Arc;

use common::Secret;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broadcast::SessionEvent;
use crate::constants::LOGIN_ROUTE;
use crate::credentials::{CredentialChange, CredentialStore, StoredCredentials, UserProfile};

/// Where the mirror stands relative to the shared credentials.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionStatus {
    /// Initial load from the store has not happened yet
    #[default]
    Hydrating,
    /// Hydrated without a complete session
    Anonymous,
    /// Access token and user available
    Authenticated,
    /// A previously authenticated session lost a credential
    LoggedOut { redirect_to: &'static str },
}

impl SessionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SessionStatus::Hydrating => "hydrating",
            SessionStatus::Anonymous => "anonymous",
            SessionStatus::Authenticated => "authenticated",
            SessionStatus::LoggedOut { .. } => "logged_out",
        }
    }
}

/// One process's view of the session.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Session {
    pub user: Option<UserProfile>,
    pub access_token: Option<Secret<String>>,
    pub refresh_token: Option<Secret<String>>,
    pub hydrated: bool,
    pub status: SessionStatus,
}

impl Session {
    /// Build the initial mirror from a store snapshot.
    ///
    /// A session only counts when all three fields are present; a partial
    /// snapshot hydrates as anonymous with every field empty.
    pub fn hydrate(snapshot: &StoredCredentials) -> Self {
        match (&snapshot.access, &snapshot.refresh, &snapshot.user) {
            (Some(access), Some(refresh), Some(user)) => Self {
                user: Some(user.clone()),
                access_token: Some(Secret::new(access.clone())),
                refresh_token: Some(Secret::new(refresh.clone())),
                hydrated: true,
                status: SessionStatus::Authenticated,
            },
            _ => Self {
                hydrated: true,
                status: SessionStatus::Anonymous,
                ..Self::default()
            },
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == SessionStatus::Authenticated
    }

    /// Fold one change into the mirror. Returns whether anything changed.
    pub fn apply(&mut self, change: &CredentialChange) -> bool {
        let before = self.clone();
        let was_authenticated = self.is_authenticated();

        match change {
            CredentialChange::Access(v) => self.access_token = v.clone(),
            CredentialChange::Refresh(v) => self.refresh_token = v.clone(),
            CredentialChange::User(v) => self.user = v.clone(),
        }

        if change.is_cleared() && was_authenticated {
            self.status = SessionStatus::LoggedOut {
                redirect_to: LOGIN_ROUTE,
            };
        } else if !change.is_cleared() && self.access_token.is_some() && self.user.is_some() {
            self.status = SessionStatus::Authenticated;
        }

        *self != before
    }

    /// Replace every field with the store's current values.
    pub fn resync(&mut self, snapshot: &StoredCredentials) -> bool {
        let mut changed = false;
        for change in snapshot.as_changes() {
            changed |= self.apply(&change);
        }
        changed
    }
}

/// Working copy that collects one write's changes before they are published.
#[derive(Debug)]
struct Pending {
    session: Session,
    dirty: bool,
}

impl Pending {
    fn new(session: Session) -> Self {
        Self {
            session,
            dirty: false,
        }
    }

    /// Apply `event`; at the end of its batch, return the session to publish
    /// if the batch changed anything.
    fn fold(&mut self, event: &SessionEvent) -> Option<Session> {
        self.dirty |= self.session.apply(&event.change);
        if event.end_of_batch && std::mem::take(&mut self.dirty) {
            Some(self.session.clone())
        } else {
            None
        }
    }

    /// Discard any half-applied batch in favour of the store's current state.
    fn resync(&mut self, snapshot: &StoredCredentials) -> Session {
        self.session.resync(snapshot);
        self.dirty = false;
        self.session.clone()
    }
}

/// Spawns and feeds a process's session mirror.
pub struct SessionMirror;

impl SessionMirror {
    /// Hydrate from `store` and keep the mirror current in a background task.
    ///
    /// Subscribes before hydrating so that no change published in between is
    /// lost; replaying such a change onto the hydrated state is harmless.
    /// Watchers see one new value per write, never a half-applied one.
    pub fn spawn(store: Arc<CredentialStore>) -> SessionHandle {
        let mut events = store.subscribe();
        let session = Session::hydrate(&store.snapshot());
        info!(status = session.status.label(), "session hydrated");

        let (tx, rx) = watch::channel(session.clone());
        let mut pending = Pending::new(session);

        let task = tokio::spawn(async move {
            loop {
                let next = match events.recv().await {
                    Ok(event) => pending.fold(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "session mirror lagged, resyncing from store");
                        Some(pending.resync(&store.snapshot()))
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(next) = next else { continue };

                let previous = tx.borrow().status.clone();
                tx.send_if_modified(|s| {
                    if *s == next {
                        return false;
                    }
                    *s = next;
                    true
                });
                log_transition(&previous, &tx.borrow().status);
            }
            debug!("session mirror stopped");
        });

        SessionHandle { rx, task }
    }
}

fn log_transition(previous: &SessionStatus, current: &SessionStatus) {
    if previous == current {
        return;
    }
    match current {
        SessionStatus::LoggedOut { redirect_to } => {
            info!(redirect_to, "session ended, redirecting to login");
        }
        SessionStatus::Authenticated => info!("session authenticated"),
        other => debug!(status = other.label(), "session status changed"),
    }
}

/// Read side of a running session mirror. Dropping it stops the mirror.
pub struct SessionHandle {
    rx: watch::Receiver<Session>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Clone of the current session.
    pub fn current(&self) -> Session {
        self.rx.borrow().clone()
    }

    /// An independent receiver for another consumer.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.rx.clone()
    }

    /// Wait for the next change and return the updated session.
    ///
    /// Returns `None` once the mirror has stopped.
    pub async fn changed(&mut self) -> Option<Session> {
        self.rx.changed().await.ok()?;
        let session = self.rx.borrow_and_update().clone();
        Some(session)
    }

    /// Wait until the mirror satisfies `pred` and return that session.
    ///
    /// Returns `None` if the mirror stopped first.
    pub async fn wait_for(&self, pred: impl FnMut(&Session) -> bool) -> Option<Session> {
        let mut rx = self.rx.clone();
        let session = rx.wait_for(pred).await.ok().map(|s| s.clone());
        session
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
