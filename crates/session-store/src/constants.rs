//! Fixed names shared by every process that uses the same credential file
//!
//! The storage keys double as the JSON field names in the credential file, so
//! changing them orphans every persisted session.

/// Storage key for the short-lived access token
pub const ACCESS_KEY: &str = "tm_access";

/// Storage key for the long-lived refresh token
pub const REFRESH_KEY: &str = "tm_refresh";

/// Storage key for the serialized user profile
pub const USER_KEY: &str = "tm_user";

/// Refresh endpoint, relative to the API base URL
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Login endpoint, relative to the API base URL
pub const LOGIN_PATH: &str = "/auth/login";

/// Logout endpoint, relative to the API base URL
pub const LOGOUT_PATH: &str = "/auth/logout";

/// Where a logged-out session is sent
pub const LOGIN_ROUTE: &str = "/login";

/// Default credential file name when only a directory is configured
pub const DEFAULT_STORE_FILE: &str = "session.json";
