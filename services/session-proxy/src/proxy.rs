//! HTTP proxy logic
//!
//! Receives inbound requests, strips hop-by-hop headers and any inbound
//! credentials, and forwards them through the `Dispatcher`, which attaches
//! the shared session's access token and handles refresh. Upstream responses
//! are returned verbatim, error statuses included.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use auth_client::{ApiRequest, ApiResponse, Dispatcher, Error as DispatchError, RetryFailure};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tracing::{error, instrument, warn};

use crate::metrics;

/// Headers to strip before forwarding (hop-by-hop per RFC 2616 Section 13.5.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Largest inbound body the proxy will buffer.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared state passed to the proxy handler via axum State extractor
#[derive(Clone)]
pub struct ProxyState {
    pub dispatcher: Dispatcher,
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
    pub in_flight: Arc<AtomicU64>,
}

/// Decrements the in-flight gauge when the request finishes, however it ends.
struct InFlight(Arc<AtomicU64>);

impl InFlight {
    fn enter(counter: &Arc<AtomicU64>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// JSON error body: `{"error":{"type":"...","message":"...","request_id":"req_..."}}`
pub fn error_response(
    status: StatusCode,
    error_type: &str,
    message: &str,
    request_id: &str,
) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": error_type,
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Forward an inbound request through the dispatcher.
#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %request.uri().path()))]
pub async fn proxy_request(
    state: &ProxyState,
    request: axum::http::Request<axum::body::Body>,
    request_id: String,
) -> Response {
    let started = Instant::now();
    let _in_flight = InFlight::enter(&state.in_flight);
    state.requests_total.fetch_add(1, Ordering::Relaxed);

    let method = request.method().clone();
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let headers = forwardable_headers(request.headers());

    let response = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(body) => {
            let mut api_request = ApiRequest::new(method.clone(), path);
            api_request.headers = headers;
            if !body.is_empty() {
                api_request.body = Some(body);
            }
            match state.dispatcher.send(api_request).await {
                Ok(upstream) => upstream_response(upstream, &request_id),
                Err(e) => {
                    state.errors_total.fetch_add(1, Ordering::Relaxed);
                    dispatch_error_response(&e, &request_id)
                }
            }
        }
        Err(e) => {
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            error!(error = %e, "failed to read request body");
            error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                &format!("invalid request body: {e}"),
                &request_id,
            )
        }
    };

    metrics::record_request(
        response.status().as_u16(),
        method.as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

/// Inbound headers minus hop-by-hop, `host` and credentials.
///
/// The dispatcher owns `Authorization`; a client cannot smuggle its own.
fn forwardable_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in inbound {
        if is_hop_by_hop(name.as_str())
            || name == header::HOST
            || name == header::CONTENT_LENGTH
            || name == header::AUTHORIZATION
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

fn upstream_response(upstream: ApiResponse, request_id: &str) -> Response {
    let mut response = Response::builder().status(upstream.status);
    for (name, value) in &upstream.headers {
        if !is_hop_by_hop(name.as_str()) {
            response = response.header(name, value);
        }
    }
    response
        .body(axum::body::Body::from(upstream.body))
        .unwrap_or_else(|e| {
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "proxy_error",
                &format!("response build error: {e}"),
                request_id,
            )
        })
}

/// Map a dispatcher failure onto the proxy's JSON error surface.
///
/// Anything that ended the session is a 401 `session_expired` so clients
/// know to sign in again; transport failures are 502 `upstream_error`.
fn dispatch_error_response(err: &DispatchError, request_id: &str) -> Response {
    let (status, error_type) = match err {
        DispatchError::AuthExpired { .. }
        | DispatchError::RetryExhausted(RetryFailure::Unauthorized(_)) => {
            (StatusCode::UNAUTHORIZED, "session_expired")
        }
        DispatchError::Network(_) | DispatchError::RetryExhausted(RetryFailure::Network(_)) => {
            (StatusCode::BAD_GATEWAY, "upstream_error")
        }
        DispatchError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
    };
    warn!(error = %err, error_type, "request failed");
    metrics::record_dispatch_error(error_type);
    error_response(status, error_type, &err.to_string(), request_id)
}

/// Check if a header is hop-by-hop (should be stripped before forwarding)
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}
