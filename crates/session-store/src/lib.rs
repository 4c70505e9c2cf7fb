//! Shared session storage for the taskboard client
//!
//! Persists the signed-in session (access token, refresh token, user profile)
//! in one credential file shared by every process on the host, and keeps each
//! process's in-memory view of it current. Also owns the calls to the
//! backend's auth endpoints.
//!
//! Session flow:
//! 1. `token::login()` returns tokens and profile; stored with
//!    `CredentialStore::set_session()`
//! 2. Every store mutation publishes a `SessionEvent` (`Origin::Local`)
//! 3. `broadcast::watch_store()` turns other processes' writes into
//!    `Origin::Remote` events
//! 4. `SessionMirror` folds both into a `Session` observable via `watch`
//! 5. `token::refresh_token()` is called by the refresh coordinator in
//!    `auth-client`, which writes back through `update_tokens()`
//! 6. `CredentialStore::clear_all()` logs every process out

pub mod broadcast;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod session;
pub mod token;

pub use broadcast::{Origin, SessionBroadcast, SessionEvent, StoreWatcher, watch_store};
pub use constants::*;
pub use credentials::{
    CredentialChange, CredentialKind, CredentialStore, Role, StoredCredentials, UserProfile,
};
pub use error::{Error, Result};
pub use session::{Session, SessionHandle, SessionMirror, SessionStatus};
pub use token::{LoginResponse, RefreshResponse, endpoint, login, logout, refresh_token};
