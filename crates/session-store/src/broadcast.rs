//! Session change notifications
//!
//! One "session changed" channel with two delivery scopes:
//!
//! - `Origin::Local`: published by the `CredentialStore` right after each of
//!   its own writes and delivered to every subscriber in this process,
//!   including the code that performed the write.
//! - `Origin::Remote`: another process rewrote the shared credential file.
//!   `watch_store` observes the file through `notify` and calls
//!   `CredentialStore::sync_from_disk`, which publishes the fields that
//!   actually changed. A process never receives its own writes this way.
//!
//! The changes of one write or sync go out as a batch; only the batch's last
//! event has `end_of_batch` set.

use std::path::PathBuf;
use std::sync::Arc;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::credentials::{CredentialChange, CredentialStore};
use crate::error::{Error, Result};

/// Buffered events per subscriber before it starts lagging.
const CHANNEL_CAPACITY: usize = 64;

/// Where a change originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Written by this process
    Local,
    /// Written by another process sharing the credential file
    Remote,
}

/// A single credential field change.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub change: CredentialChange,
    pub origin: Origin,
    /// No further change of the same write follows.
    pub end_of_batch: bool,
}

/// In-process fan-out of `SessionEvent`s.
#[derive(Debug, Clone)]
pub struct SessionBroadcast {
    tx: broadcast::Sender<SessionEvent>,
}

impl SessionBroadcast {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Deliver a change to every current subscriber.
    ///
    /// Returns the number of subscribers reached. Publishing with nobody
    /// listening is not an error.
    pub fn publish(&self, change: CredentialChange, origin: Origin) -> usize {
        self.send(change, origin, true)
    }

    /// Deliver the changes of one write in order, marking the last one.
    pub fn publish_batch(&self, changes: Vec<CredentialChange>, origin: Origin) -> usize {
        let last = changes.len().saturating_sub(1);
        let mut reached = 0;
        for (i, change) in changes.into_iter().enumerate() {
            reached = self.send(change, origin, i == last);
        }
        reached
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    fn send(&self, change: CredentialChange, origin: Origin, end_of_batch: bool) -> usize {
        let key = change.kind().storage_key();
        let cleared = change.is_cleared();
        let event = SessionEvent {
            change,
            origin,
            end_of_batch,
        };
        match self.tx.send(event) {
            Ok(receivers) => {
                debug!(key, cleared, ?origin, receivers, "published session change");
                receivers
            }
            Err(_) => 0,
        }
    }
}

impl Default for SessionBroadcast {
    fn default() -> Self {
        Self::new(CHANNEL_CAPACITY)
    }
}

/// Running cross-process watcher. Dropping it stops delivery.
pub struct StoreWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Drop for StoreWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start delivering other processes' writes to `store` subscribers.
///
/// Watches the credential file's directory rather than the file itself:
/// atomic writes replace the file, which would silently end a watch on the
/// old inode. Bursts of filesystem events collapse into one sync.
///
/// Must be called from within a tokio runtime.
pub fn watch_store(store: Arc<CredentialStore>) -> Result<StoreWatcher> {
    let path = store.path().to_path_buf();
    let dir = match path.parent() {
        Some(parent) if parent.as_os_str().is_empty() => PathBuf::from("."),
        Some(parent) => parent.to_path_buf(),
        None => {
            return Err(Error::Watch(
                "credential path has no parent directory".into(),
            ));
        }
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::Watch("credential path has no file name".into()))?
        .to_os_string();

    let (fs_tx, mut fs_rx) = mpsc::unbounded_channel::<()>();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Access(_)) {
                    return;
                }
                let touches_store = event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == Some(file_name.as_os_str()));
                if touches_store {
                    let _ = fs_tx.send(());
                }
            }
            Err(e) => warn!(error = %e, "credential file watch error"),
        }
    })
    .map_err(|e| Error::Watch(format!("creating watcher: {e}")))?;

    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .map_err(|e| Error::Watch(format!("watching {}: {e}", dir.display())))?;

    debug!(path = %path.display(), "watching credential file for other processes");

    let task = tokio::spawn(async move {
        while fs_rx.recv().await.is_some() {
            while fs_rx.try_recv().is_ok() {}
            if let Err(e) = store.sync_from_disk().await {
                warn!(error = %e, "failed to sync credentials from disk");
            }
        }
    });

    Ok(StoreWatcher {
        _watcher: watcher,
        task,
    })
}
