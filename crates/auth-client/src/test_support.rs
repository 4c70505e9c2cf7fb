//! In-process stand-in for the taskboard API

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use session_store::{CredentialStore, Role, UserProfile};
use tokio::net::TcpListener;

/// How the mock's refresh endpoint behaves.
#[derive(Clone)]
pub(crate) struct MockConfig {
    pub refresh_status: StatusCode,
    pub refresh_delay: Duration,
    pub rotated_refresh: Option<&'static str>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            refresh_status: StatusCode::OK,
            refresh_delay: Duration::from_millis(100),
            rotated_refresh: None,
        }
    }
}

#[derive(Clone)]
struct MockState {
    config: MockConfig,
    refresh_calls: Arc<AtomicUsize>,
    task_calls: Arc<AtomicUsize>,
}

/// A running mock. `base_url` ends in `/api`.
pub(crate) struct MockApi {
    pub base_url: String,
    refresh_calls: Arc<AtomicUsize>,
    task_calls: Arc<AtomicUsize>,
}

impl MockApi {
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn task_calls(&self) -> usize {
        self.task_calls.load(Ordering::SeqCst)
    }
}

/// Token the mock hands out on refresh and accepts on `/tasks`.
pub(crate) const FRESH_TOKEN: &str = "at_new";
pub(crate) const STALE_TOKEN: &str = "at_old";

pub(crate) async fn spawn_mock(config: MockConfig) -> MockApi {
    let state = MockState {
        config,
        refresh_calls: Arc::new(AtomicUsize::new(0)),
        task_calls: Arc::new(AtomicUsize::new(0)),
    };
    let app = axum::Router::new()
        .route("/api/auth/refresh", post(refresh))
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route("/api/tasks/slow", get(list_tasks_slowly))
        .route("/api/revoked", get(always_unauthorized))
        .route("/api/boom", get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockApi {
        base_url: format!("http://{addr}/api"),
        refresh_calls: state.refresh_calls,
        task_calls: state.task_calls,
    }
}

async fn refresh(State(state): State<MockState>) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(state.config.refresh_delay).await;

    if state.config.refresh_status != StatusCode::OK {
        return (
            state.config.refresh_status,
            Json(serde_json::json!({
                "success": false,
                "message": "Invalid or expired refresh token"
            })),
        )
            .into_response();
    }

    let mut data = serde_json::json!({ "access_token": FRESH_TOKEN });
    if let Some(rotated) = state.config.rotated_refresh {
        data["refresh_token"] = serde_json::Value::from(rotated);
    }
    Json(serde_json::json!({
        "success": true,
        "message": "Token refreshed",
        "data": data
    }))
    .into_response()
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(format!("Bearer {FRESH_TOKEN}").as_str())
}

async fn list_tasks(State(state): State<MockState>, headers: HeaderMap) -> Response {
    state.task_calls.fetch_add(1, Ordering::SeqCst);
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(serde_json::json!([{ "id": "t-1", "title": "Write report" }])).into_response()
}

/// Like `GET /tasks`, but answers only after the refresh delay has passed
/// several times over.
async fn list_tasks_slowly(state: State<MockState>, headers: HeaderMap) -> Response {
    tokio::time::sleep(state.config.refresh_delay * 3).await;
    list_tasks(state, headers).await
}

async fn create_task(State(state): State<MockState>, headers: HeaderMap, body: Bytes) -> Response {
    state.task_calls.fetch_add(1, Ordering::SeqCst);
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    (StatusCode::CREATED, body).into_response()
}

async fn always_unauthorized(State(state): State<MockState>) -> Response {
    state.task_calls.fetch_add(1, Ordering::SeqCst);
    StatusCode::UNAUTHORIZED.into_response()
}

pub(crate) fn test_user() -> UserProfile {
    UserProfile {
        id: "u-1".into(),
        email: "admin@example.com".into(),
        role: Role::Admin,
    }
}

/// A store holding an expired access token and a live refresh token.
pub(crate) async fn signed_in_store(dir: &tempfile::TempDir) -> Arc<CredentialStore> {
    let store = CredentialStore::open(dir.path().join("session.json"))
        .await
        .unwrap();
    store
        .set_session(test_user(), STALE_TOKEN, "rt_1")
        .await
        .unwrap();
    Arc::new(store)
}
