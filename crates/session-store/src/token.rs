//! Auth endpoint calls
//!
//! Three interactions with the backend's auth API, all JSON POSTs relative to
//! the configured base URL:
//! 1. Login (`/auth/login`): credentials in, full session out
//! 2. Refresh (`/auth/refresh`): refresh token in, new access token out
//! 3. Logout (`/auth/logout`): revokes the refresh token server side
//!
//! The backend wraps payloads in `{ success, message, data }`, but some
//! deployments answer the refresh call with a bare `{ access_token }`. Both
//! shapes are accepted.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::constants::{LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH};
use crate::credentials::UserProfile;
use crate::error::{Error, Result};

/// Response from the refresh endpoint.
///
/// `refresh_token` is present only when the backend rotates refresh tokens.
#[derive(Debug, Deserialize, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Response from the login endpoint.
#[derive(Debug, Deserialize, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: UserProfile,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> Envelope<T> {
    fn into_inner(self) -> T {
        match self {
            Envelope::Wrapped { data } => data,
            Envelope::Bare(inner) => inner,
        }
    }
}

/// Join the API base URL and an endpoint path without doubling slashes.
pub fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Exchange a refresh token for a new access token.
///
/// 401/403 means the refresh token is revoked or expired and is reported as
/// `Error::Rejected`. An empty access token is treated as malformed.
pub async fn refresh_token(
    client: &reqwest::Client,
    base_url: &str,
    refresh: &str,
) -> Result<RefreshResponse> {
    let response = client
        .post(endpoint(base_url, REFRESH_PATH))
        .json(&serde_json::json!({ "refresh_token": refresh }))
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let mut token: RefreshResponse = read_envelope(response, "token refresh").await?;
    if token.access_token.is_empty() {
        return Err(Error::TokenExchange(
            "refresh response has an empty access_token".into(),
        ));
    }
    token.refresh_token = token.refresh_token.filter(|t| !t.is_empty());
    Ok(token)
}

/// Sign in with email and password.
pub async fn login(
    client: &reqwest::Client,
    base_url: &str,
    email: &str,
    password: &str,
) -> Result<LoginResponse> {
    let response = client
        .post(endpoint(base_url, LOGIN_PATH))
        .json(&serde_json::json!({ "email": email, "password": password }))
        .send()
        .await
        .map_err(|e| Error::Http(format!("login request failed: {e}")))?;

    read_envelope(response, "login").await
}

/// Revoke a refresh token on the server.
pub async fn logout(client: &reqwest::Client, base_url: &str, refresh: &str) -> Result<()> {
    let response = client
        .post(endpoint(base_url, LOGOUT_PATH))
        .json(&serde_json::json!({ "refresh_token": refresh }))
        .send()
        .await
        .map_err(|e| Error::Http(format!("logout request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::TokenExchange(format!(
            "logout returned {status}: {body}"
        )));
    }
    Ok(())
}

async fn read_envelope<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::Rejected(format!("{what} rejected ({status}): {body}")));
        }

        return Err(Error::TokenExchange(format!(
            "{what} returned {status}: {body}"
        )));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| Error::Http(format!("reading {what} response: {e}")))?;
    serde_json::from_slice::<Envelope<T>>(&bytes)
        .map(Envelope::into_inner)
        .map_err(|e| Error::TokenExchange(format!("invalid {what} response: {e}")))
}
