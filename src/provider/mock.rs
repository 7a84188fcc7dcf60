//! Local vendor stand-in for provider tests.

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
pub struct Captured {
    pub headers: HeaderMap,
    pub body: serde_json::Value,
}

#[derive(Clone)]
struct MockState {
    status: StatusCode,
    body: &'static str,
    seen: Arc<Mutex<Vec<Captured>>>,
}

async fn handler(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    state.seen.lock().unwrap().push(Captured { headers, body });
    (state.status, [(header::CONTENT_TYPE, "text/event-stream")], state.body)
}

/// Serve `body` with `status` for every POST to `path`. Returns the base URL
/// and the requests seen so far.
pub async fn serve(
    path: &'static str,
    status: StatusCode,
    body: &'static str,
) -> (String, Arc<Mutex<Vec<Captured>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let state = MockState { status, body, seen: seen.clone() };
    let app = Router::new().route(path, post(handler)).with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), seen)
}
