//! Authenticated request dispatch
//!
//! Every API call goes through `Dispatcher::send`, which:
//! 1. Attaches `Authorization: Bearer <access>` when a token is stored
//! 2. Returns any non-401 response unchanged
//! 3. On a 401, asks the `RefreshCoordinator` for a new token and replays
//!    the request exactly once with it
//! 4. If the refresh fails, clears the credential store (every process
//!    logs out) and returns the original 401 as `Error::AuthExpired`

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use session_store::{CredentialStore, endpoint};
use tracing::{debug, info, warn};

use crate::classify::{Classification, classify_status};
use crate::coordinator::RefreshCoordinator;
use crate::error::{Error, Result, RetryFailure};
use crate::metrics;

/// An API call relative to the configured base URL.
///
/// Owns its body so the same request can be replayed after a refresh.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body.
    pub fn json<T: Serialize>(mut self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)
            .map_err(|e| Error::InvalidRequest(format!("serializing JSON body: {e}")))?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Bytes::from(body));
        Ok(self)
    }
}

/// A fully read upstream response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::InvalidRequest(format!("decoding JSON response: {e}")))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Per-call bookkeeping. A request is retried at most once.
struct PendingRequest {
    request: ApiRequest,
    retried: bool,
}

/// Sends API requests with the stored access token, refreshing on 401.
///
/// Cheap to clone; clones share the store and the coordinator.
#[derive(Clone)]
pub struct Dispatcher {
    http_client: reqwest::Client,
    base_url: Arc<str>,
    store: Arc<CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        http_client: reqwest::Client,
        base_url: impl Into<String>,
        store: Arc<CredentialStore>,
        coordinator: Arc<RefreshCoordinator>,
        timeout: Duration,
    ) -> Self {
        Self {
            http_client,
            base_url: Arc::from(base_url.into()),
            store,
            coordinator,
            timeout,
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    /// Send `request`, transparently recovering from one expired token.
    ///
    /// Any status other than 401 is returned as `Ok`, including error
    /// statuses. A 401 on the retry is not retried again.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let mut pending = PendingRequest {
            request,
            retried: false,
        };
        let mut token = self.store.access();

        loop {
            let response = match self.execute(&pending.request, token.as_deref()).await {
                Ok(response) => response,
                Err(Error::Network(msg)) if pending.retried => {
                    return Err(Error::RetryExhausted(RetryFailure::Network(msg)));
                }
                Err(e) => return Err(e),
            };

            if classify_status(response.status) == Classification::PassThrough {
                return Ok(response);
            }

            if pending.retried {
                warn!(
                    method = %pending.request.method,
                    path = %pending.request.path,
                    "request still unauthorized after token refresh"
                );
                return Err(Error::RetryExhausted(RetryFailure::Unauthorized(response)));
            }
            pending.retried = true;

            debug!(
                method = %pending.request.method,
                path = %pending.request.path,
                "access token rejected, refreshing"
            );
            match self.coordinator.ensure_valid_token().await {
                Ok(fresh) => {
                    metrics::record_retry();
                    token = Some(fresh);
                }
                Err(source) => {
                    self.force_logout(&source.to_string()).await;
                    return Err(Error::AuthExpired { response, source });
                }
            }
        }
    }

    /// Convenience for `send` followed by JSON decoding of a 2xx body.
    ///
    /// Non-success statuses surface as `Error::InvalidRequest` carrying the
    /// status and body text.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let response = self.send(request).await?;
        if !response.is_success() {
            return Err(Error::InvalidRequest(format!(
                "unexpected status {}: {}",
                response.status,
                response.text()
            )));
        }
        response.json()
    }

    async fn execute(&self, request: &ApiRequest, token: Option<&str>) -> Result<ApiResponse> {
        let mut headers = request.headers.clone();
        headers.remove(AUTHORIZATION);
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| Error::InvalidRequest(format!("access token is not a valid header: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let mut builder = self
            .http_client
            .request(
                request.method.clone(),
                endpoint(&self.base_url, &request.path),
            )
            .headers(headers)
            .timeout(self.timeout);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Network(format!("{} {}: {e}", request.method, request.path)))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("reading response body: {e}")))?;

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }

    /// Clear every stored credential; all processes see the logout.
    async fn force_logout(&self, reason: &str) {
        metrics::record_forced_logout();
        info!(reason, "forcing logout after failed token refresh");
        if let Err(e) = self.store.clear_all().await {
            warn!(error = %e, "failed to clear credentials during forced logout");
        }
    }
}
