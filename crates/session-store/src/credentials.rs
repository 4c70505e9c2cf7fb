//! Credential storage for the signed-in session
//!
//! Persists the access token, refresh token and user profile as one JSON
//! object under fixed keys. Every process pointed at the same file shares the
//! session. Writes use atomic temp-file + rename so a reader in another
//! process never sees a half-written file.
//!
//! Reads are synchronous and served from an in-memory snapshot. The snapshot
//! is replaced only after a write reached disk, or when `sync_from_disk`
//! picks up another process's write. Each mutation publishes one
//! `CredentialChange` per affected field on the store's `SessionBroadcast`.
//!
//! Writes start from the file, not the snapshot. Fields another process
//! wrote since the last sync are kept and reported as `Remote` changes
//! before the write's own `Local` changes.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use common::Secret;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info};

use crate::broadcast::{Origin, SessionBroadcast, SessionEvent};
use crate::error::{Error, Result};

/// Role attached to a user profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "ADMIN")]
    Admin,
    A,
    B,
}

/// Identity of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub role: Role,
}

/// The three persisted fields. Absent keys mean "not set".
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    #[serde(rename = "tm_access", default, skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
    #[serde(rename = "tm_refresh", default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
    #[serde(rename = "tm_user", default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
}

impl StoredCredentials {
    /// One change per field, carrying this snapshot's value.
    pub fn as_changes(&self) -> Vec<CredentialChange> {
        CredentialKind::ALL
            .iter()
            .map(|kind| self.change_for(*kind))
            .collect()
    }

    /// This snapshot's value of one field, as a change notification.
    pub fn change_for(&self, kind: CredentialKind) -> CredentialChange {
        match kind {
            CredentialKind::Access => {
                CredentialChange::Access(self.access.clone().map(Secret::new))
            }
            CredentialKind::Refresh => {
                CredentialChange::Refresh(self.refresh.clone().map(Secret::new))
            }
            CredentialKind::User => CredentialChange::User(self.user.clone()),
        }
    }

    /// Changes needed to go from `previous` to `self`, in key order.
    pub fn diff(&self, previous: &StoredCredentials) -> Vec<CredentialChange> {
        let mut changes = Vec::new();
        if self.access != previous.access {
            changes.push(self.change_for(CredentialKind::Access));
        }
        if self.refresh != previous.refresh {
            changes.push(self.change_for(CredentialKind::Refresh));
        }
        if self.user != previous.user {
            changes.push(self.change_for(CredentialKind::User));
        }
        changes
    }

    pub fn is_empty(&self) -> bool {
        self.access.is_none() && self.refresh.is_none() && self.user.is_none()
    }
}

impl fmt::Debug for StoredCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredCredentials")
            .field("access", &self.access.as_ref().map(|_| "[REDACTED]"))
            .field("refresh", &self.refresh.as_ref().map(|_| "[REDACTED]"))
            .field("user", &self.user)
            .finish()
    }
}

/// Which persisted field a notification refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    Access,
    Refresh,
    User,
}

impl CredentialKind {
    pub const ALL: [CredentialKind; 3] = [
        CredentialKind::Access,
        CredentialKind::Refresh,
        CredentialKind::User,
    ];

    /// Storage key shared by every process using the same file.
    pub fn storage_key(self) -> &'static str {
        match self {
            CredentialKind::Access => crate::constants::ACCESS_KEY,
            CredentialKind::Refresh => crate::constants::REFRESH_KEY,
            CredentialKind::User => crate::constants::USER_KEY,
        }
    }
}

/// New value of one field; `None` means the field was cleared.
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialChange {
    Access(Option<Secret<String>>),
    Refresh(Option<Secret<String>>),
    User(Option<UserProfile>),
}

impl CredentialChange {
    pub fn kind(&self) -> CredentialKind {
        match self {
            CredentialChange::Access(_) => CredentialKind::Access,
            CredentialChange::Refresh(_) => CredentialKind::Refresh,
            CredentialChange::User(_) => CredentialKind::User,
        }
    }

    pub fn is_cleared(&self) -> bool {
        match self {
            CredentialChange::Access(v) | CredentialChange::Refresh(v) => v.is_none(),
            CredentialChange::User(v) => v.is_none(),
        }
    }
}

/// File-backed credential store shared across processes.
///
/// The tokio Mutex serializes writes and cross-process syncs so that the
/// snapshot, the file and the published notifications stay in the same order.
/// Reads never take it.
pub struct CredentialStore {
    path: PathBuf,
    snapshot: RwLock<StoredCredentials>,
    write_lock: Mutex<()>,
    broadcast: SessionBroadcast,
}

impl CredentialStore {
    /// Open the credential file at `path`.
    ///
    /// A missing file is created as `{}` (signed-out cold start). An
    /// unreadable or unparseable file is an error rather than an implicit
    /// logout.
    pub async fn open(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let state = read_file(&path).await?;
            info!(
                path = %path.display(),
                signed_in = state.access.is_some(),
                "loaded credential file"
            );
            state
        } else {
            info!(path = %path.display(), "credential file not found, starting signed out");
            let state = StoredCredentials::default();
            write_atomic(&path, &state).await?;
            state
        };

        Ok(Self {
            path,
            snapshot: RwLock::new(state),
            write_lock: Mutex::new(()),
            broadcast: SessionBroadcast::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current access token, if any.
    pub fn access(&self) -> Option<String> {
        self.snapshot.read().access.clone()
    }

    /// Current refresh token, if any.
    pub fn refresh(&self) -> Option<String> {
        self.snapshot.read().refresh.clone()
    }

    /// Current user profile, if any.
    pub fn user(&self) -> Option<UserProfile> {
        self.snapshot.read().user.clone()
    }

    /// All three fields as one consistent read.
    pub fn snapshot(&self) -> StoredCredentials {
        self.snapshot.read().clone()
    }

    /// Subscribe to changes of this store, from this process and others.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.broadcast.subscribe()
    }

    pub fn broadcast(&self) -> &SessionBroadcast {
        &self.broadcast
    }

    pub async fn set_access(&self, token: impl Into<String>) -> Result<()> {
        let token = token.into();
        self.commit(&[CredentialKind::Access], |c| c.access = Some(token))
            .await?;
        debug!("stored access token");
        Ok(())
    }

    pub async fn set_refresh(&self, token: impl Into<String>) -> Result<()> {
        let token = token.into();
        self.commit(&[CredentialKind::Refresh], |c| c.refresh = Some(token))
            .await?;
        debug!("stored refresh token");
        Ok(())
    }

    pub async fn set_user(&self, user: UserProfile) -> Result<()> {
        let user_id = user.id.clone();
        self.commit(&[CredentialKind::User], |c| c.user = Some(user))
            .await?;
        debug!(user_id, "stored user profile");
        Ok(())
    }

    /// Store a freshly signed-in session in a single write.
    pub async fn set_session(
        &self,
        user: UserProfile,
        access: impl Into<String>,
        refresh: impl Into<String>,
    ) -> Result<()> {
        let (access, refresh) = (access.into(), refresh.into());
        let user_id = user.id.clone();
        self.commit(&CredentialKind::ALL, |c| {
            c.access = Some(access);
            c.refresh = Some(refresh);
            c.user = Some(user);
        })
        .await?;
        info!(user_id, "session stored");
        Ok(())
    }

    /// Store the result of a token refresh in a single write.
    ///
    /// Without a rotated refresh token the existing one is kept.
    pub async fn update_tokens(&self, access: String, refresh: Option<String>) -> Result<()> {
        let rotated = refresh.is_some();
        let touched: &[CredentialKind] = if rotated {
            &[CredentialKind::Access, CredentialKind::Refresh]
        } else {
            &[CredentialKind::Access]
        };
        self.commit(touched, |c| {
            c.access = Some(access);
            if let Some(refresh) = refresh {
                c.refresh = Some(refresh);
            }
        })
        .await?;
        debug!(rotated, "stored refreshed tokens");
        Ok(())
    }

    /// Remove all three fields.
    ///
    /// Publishes a cleared notification for every field even when the store
    /// was already empty, so a repeated forced logout still reaches listeners.
    pub async fn clear_all(&self) -> Result<()> {
        self.commit(&CredentialKind::ALL, |c| *c = StoredCredentials::default())
            .await?;
        info!("credentials cleared");
        Ok(())
    }

    /// Pick up writes made by other processes.
    ///
    /// Re-reads the file, swaps the snapshot and publishes a `Remote`
    /// notification per field that differs from what this instance last saw.
    /// Returns the number of changed fields. Own writes have already updated
    /// the snapshot, so they produce no notifications here.
    pub async fn sync_from_disk(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let on_disk = self.load().await?;

        let previous = std::mem::replace(&mut *self.snapshot.write(), on_disk.clone());
        let changes = on_disk.diff(&previous);
        let count = changes.len();
        for change in &changes {
            debug!(key = change.kind().storage_key(), "credential changed in another process");
        }
        self.broadcast.publish_batch(changes, Origin::Remote);
        Ok(count)
    }

    /// Re-read the file, apply `update`, persist the result, swap it in and
    /// publish.
    ///
    /// Untouched fields that another process changed since the last sync are
    /// published as `Remote` first, then every field in `touched` as `Local`.
    /// Nothing is published and the snapshot is kept if the write fails.
    async fn commit(
        &self,
        touched: &[CredentialKind],
        update: impl FnOnce(&mut StoredCredentials),
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let on_disk = self.load().await?;
        let mut next = on_disk.clone();
        update(&mut next);

        write_atomic(&self.path, &next).await?;
        let previous = std::mem::replace(&mut *self.snapshot.write(), next.clone());

        let mut merged = on_disk.diff(&previous);
        merged.retain(|change| !touched.contains(&change.kind()));
        if !merged.is_empty() {
            debug!(fields = merged.len(), "kept credentials written by another process");
            self.broadcast.publish_batch(merged, Origin::Remote);
        }

        let local = touched.iter().map(|kind| next.change_for(*kind)).collect();
        self.broadcast.publish_batch(local, Origin::Local);
        Ok(())
    }

    /// Current file contents; a deleted file reads as signed out.
    async fn load(&self) -> Result<StoredCredentials> {
        if self.path.exists() {
            read_file(&self.path).await
        } else {
            Ok(StoredCredentials::default())
        }
    }
}

async fn read_file(path: &Path) -> Result<StoredCredentials> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
    if contents.trim().is_empty() {
        return Ok(StoredCredentials::default());
    }
    serde_json::from_str(&contents)
        .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))
}

/// Distinguishes temp files of concurrent writers in the same process.
static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Write credentials atomically with 0600 permissions (unix).
async fn write_atomic(path: &Path, data: &StoredCredentials) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp_path = dir.join(format!(".session.tmp.{}.{seq}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_user() -> UserProfile {
        UserProfile {
            id: "u-1".into(),
            email: "admin@example.com".into(),
            role: Role::Admin,
        }
    }

    async fn open_store(dir: &tempfile::TempDir) -> CredentialStore {
        CredentialStore::open(dir.path().join("session.json"))
            .await
            .unwrap()
    }

    fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn cold_start_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        assert!(!path.exists());
        let store = CredentialStore::open(path.clone()).await.unwrap();
        assert!(store.snapshot().is_empty());
        assert!(path.exists());

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.trim(), "{}");
    }

    #[tokio::test]
    async fn session_roundtrips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store
            .set_session(test_user(), "at_1", "rt_1")
            .await
            .unwrap();

        let reopened = open_store(&dir).await;
        assert_eq!(reopened.access().as_deref(), Some("at_1"));
        assert_eq!(reopened.refresh().as_deref(), Some("rt_1"));
        assert_eq!(reopened.user(), Some(test_user()));
    }

    #[tokio::test]
    async fn file_uses_fixed_storage_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store
            .set_session(test_user(), "at_1", "rt_1")
            .await
            .unwrap();

        let contents = tokio::fs::read_to_string(store.path()).await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(json["tm_access"], "at_1");
        assert_eq!(json["tm_refresh"], "rt_1");
        assert_eq!(json["tm_user"]["role"], "ADMIN");
        assert_eq!(json["tm_user"]["email"], "admin@example.com");
    }

    #[tokio::test]
    async fn unparseable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        tokio::fs::write(&path, "not json {{").await.unwrap();

        let result = CredentialStore::open(path).await;
        assert!(matches!(result, Err(Error::CredentialParse(_))));
    }

    #[tokio::test]
    async fn set_access_publishes_local_change() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let mut rx = store.subscribe();

        store.set_access("at_new").await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].origin, Origin::Local);
        assert_eq!(
            events[0].change,
            CredentialChange::Access(Some(Secret::new("at_new".to_string())))
        );
    }

    #[tokio::test]
    async fn repeated_set_still_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.set_refresh("rt_same").await.unwrap();
        let mut rx = store.subscribe();

        store.set_refresh("rt_same").await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].change.kind(), CredentialKind::Refresh);
    }

    #[tokio::test]
    async fn update_tokens_without_rotation_keeps_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store
            .set_session(test_user(), "at_old", "rt_keep")
            .await
            .unwrap();
        let mut rx = store.subscribe();

        store.update_tokens("at_new".into(), None).await.unwrap();

        assert_eq!(store.access().as_deref(), Some("at_new"));
        assert_eq!(store.refresh().as_deref(), Some("rt_keep"));
        let kinds: Vec<_> = drain(&mut rx).iter().map(|e| e.change.kind()).collect();
        assert_eq!(kinds, vec![CredentialKind::Access]);
    }

    #[tokio::test]
    async fn update_tokens_with_rotation_replaces_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store
            .set_session(test_user(), "at_old", "rt_old")
            .await
            .unwrap();

        store
            .update_tokens("at_new".into(), Some("rt_new".into()))
            .await
            .unwrap();

        assert_eq!(store.refresh().as_deref(), Some("rt_new"));
    }

    #[tokio::test]
    async fn notification_handlers_see_complete_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let mut rx = store.subscribe();

        store
            .set_session(test_user(), "at_1", "rt_1")
            .await
            .unwrap();

        // All three fields are already readable when the first event arrives.
        let first = rx.recv().await.unwrap();
        assert_eq!(first.change.kind(), CredentialKind::Access);
        let snapshot = store.snapshot();
        assert!(snapshot.access.is_some());
        assert!(snapshot.refresh.is_some());
        assert!(snapshot.user.is_some());
    }

    #[tokio::test]
    async fn clear_all_empties_store_and_notifies_each_field() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store
            .set_session(test_user(), "at_1", "rt_1")
            .await
            .unwrap();
        let mut rx = store.subscribe();

        store.clear_all().await.unwrap();

        assert!(store.access().is_none());
        assert!(store.refresh().is_none());
        assert!(store.user().is_none());
        let events = drain(&mut rx);
        let kinds: Vec<_> = events.iter().map(|e| e.change.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                CredentialKind::Access,
                CredentialKind::Refresh,
                CredentialKind::User
            ]
        );
        assert!(events.iter().all(|e| e.change.is_cleared()));
    }

    #[tokio::test]
    async fn clear_all_on_empty_store_still_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let mut rx = store.subscribe();

        store.clear_all().await.unwrap();
        store.clear_all().await.unwrap();

        assert_eq!(drain(&mut rx).len(), 6);
    }

    #[tokio::test]
    async fn write_failure_propagates_and_keeps_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.set_access("at_before").await.unwrap();
        let mut rx = store.subscribe();

        // Remove the directory so the temp file cannot be created.
        std::fs::remove_dir_all(dir.path()).unwrap();

        let result = store.set_access("at_after").await;
        assert!(matches!(result, Err(Error::Io(_))), "got: {result:?}");
        assert_eq!(store.access().as_deref(), Some("at_before"));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn sync_from_disk_publishes_remote_changes() {
        let dir = tempfile::tempdir().unwrap();
        let writer = open_store(&dir).await;
        let reader = open_store(&dir).await;
        let mut rx = reader.subscribe();

        writer
            .set_session(test_user(), "at_1", "rt_1")
            .await
            .unwrap();
        let changed = reader.sync_from_disk().await.unwrap();

        assert_eq!(changed, 3);
        assert_eq!(reader.access().as_deref(), Some("at_1"));
        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.origin == Origin::Remote));
    }

    #[tokio::test]
    async fn sync_from_disk_ignores_own_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.set_access("at_1").await.unwrap();
        let mut rx = store.subscribe();

        assert_eq!(store.sync_from_disk().await.unwrap(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn sync_from_disk_reports_only_changed_fields() {
        let dir = tempfile::tempdir().unwrap();
        let writer = open_store(&dir).await;
        writer
            .set_session(test_user(), "at_1", "rt_1")
            .await
            .unwrap();
        let reader = open_store(&dir).await;
        let mut rx = reader.subscribe();

        writer.update_tokens("at_2".into(), None).await.unwrap();
        reader.sync_from_disk().await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].change,
            CredentialChange::Access(Some(Secret::new("at_2".to_string())))
        );
    }

    #[tokio::test]
    async fn stale_writer_keeps_fields_from_other_process() {
        let dir = tempfile::tempdir().unwrap();
        let tab_a = open_store(&dir).await;
        let tab_b = open_store(&dir).await;
        let mut rx_b = tab_b.subscribe();

        tab_a
            .set_session(test_user(), "at_a", "rt_a")
            .await
            .unwrap();
        // No sync in between: tab B still holds the empty snapshot.
        tab_b.set_access("at_b").await.unwrap();

        let on_disk = read_file(tab_b.path()).await.unwrap();
        assert_eq!(on_disk.access.as_deref(), Some("at_b"));
        assert_eq!(on_disk.refresh.as_deref(), Some("rt_a"));
        assert_eq!(on_disk.user, Some(test_user()));
        assert_eq!(tab_b.snapshot(), on_disk);

        let events = drain(&mut rx_b);
        let seen: Vec<_> = events
            .iter()
            .map(|e| (e.change.kind(), e.origin, e.end_of_batch))
            .collect();
        assert_eq!(
            seen,
            vec![
                (CredentialKind::Refresh, Origin::Remote, false),
                (CredentialKind::User, Origin::Remote, true),
                (CredentialKind::Access, Origin::Local, true),
            ]
        );

        // Tab B already merged everything; a later sync finds nothing new.
        assert_eq!(tab_b.sync_from_disk().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stale_token_update_keeps_rotated_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let tab_a = open_store(&dir).await;
        tab_a
            .set_session(test_user(), "at_1", "rt_1")
            .await
            .unwrap();
        let tab_b = open_store(&dir).await;

        tab_a
            .update_tokens("at_2".into(), Some("rt_2".into()))
            .await
            .unwrap();
        tab_b.update_tokens("at_3".into(), None).await.unwrap();

        let on_disk = read_file(tab_a.path()).await.unwrap();
        assert_eq!(on_disk.access.as_deref(), Some("at_3"));
        assert_eq!(on_disk.refresh.as_deref(), Some("rt_2"));
        assert_eq!(tab_b.refresh().as_deref(), Some("rt_2"));
    }

    #[tokio::test]
    async fn stale_writer_does_not_restore_cleared_session() {
        let dir = tempfile::tempdir().unwrap();
        let tab_a = open_store(&dir).await;
        tab_a
            .set_session(test_user(), "at_1", "rt_1")
            .await
            .unwrap();
        let tab_b = open_store(&dir).await;
        let mut rx_b = tab_b.subscribe();

        tab_a.clear_all().await.unwrap();
        tab_b.set_user(test_user()).await.unwrap();

        let on_disk = read_file(tab_a.path()).await.unwrap();
        assert!(on_disk.access.is_none());
        assert!(on_disk.refresh.is_none());
        let remote: Vec<_> = drain(&mut rx_b)
            .into_iter()
            .filter(|e| e.origin == Origin::Remote)
            .collect();
        assert_eq!(remote.len(), 2);
        assert!(remote.iter().all(|e| e.change.is_cleared()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.set_access("at_1").await.unwrap();

        let metadata = tokio::fs::metadata(store.path()).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "credential file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn concurrent_writes_leave_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(open_store(&dir).await);

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.set_access(format!("at_{i}")).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let on_disk = read_file(store.path()).await.unwrap();
        assert_eq!(on_disk.access, store.access());
    }

    #[test]
    fn debug_redacts_tokens() {
        let creds = StoredCredentials {
            access: Some("at_secret".into()),
            refresh: Some("rt_secret".into()),
            user: None,
        };
        let debug = format!("{creds:?}");
        assert!(!debug.contains("at_secret"));
        assert!(!debug.contains("rt_secret"));
    }

    #[test]
    fn storage_keys_are_stable() {
        assert_eq!(CredentialKind::Access.storage_key(), "tm_access");
        assert_eq!(CredentialKind::Refresh.storage_key(), "tm_refresh");
        assert_eq!(CredentialKind::User.storage_key(), "tm_user");
    }
}
