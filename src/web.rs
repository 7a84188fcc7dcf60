use crate::auth::{self, CredentialGate};
use crate::dispatch::{Dispatcher, ModelChoice, Session};
use crate::error::ChatError;
use anyhow::Context;
use axum::extract::{Query, Request, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, SET_COOKIE, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use uuid::Uuid;

const INDEX_HTML: &str = include_str!("../assets/index.html");
const MARKDOWN_JS: &str = include_str!("../assets/markdown.js");

const SESSION_COOKIE: &str = "duochat_session";

/// Sessions untouched for this long are dropped.
pub const DEFAULT_SESSION_IDLE: Duration = Duration::from_secs(60 * 60);

/// Static text shown by the page and the login prompt.
#[derive(Debug, Clone)]
pub struct PageInfo {
    pub title: String,
    pub description: String,
    pub auth_message: String,
}

struct SessionSlot {
    session: Arc<Session>,
    last_used: Instant,
}

#[derive(Clone)]
pub struct AppState {
    dispatcher: Arc<Dispatcher>,
    gate: Arc<dyn CredentialGate>,
    page: Arc<PageInfo>,
    sessions: Arc<Mutex<HashMap<Uuid, SessionSlot>>>,
    idle_timeout: Duration,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, gate: Arc<dyn CredentialGate>, page: PageInfo) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            gate,
            page: Arc::new(page),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            idle_timeout: DEFAULT_SESSION_IDLE,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Looks up the caller's session and marks it as used.
    async fn existing_session(&self, headers: &HeaderMap) -> Option<(Uuid, Arc<Session>)> {
        let id = session_id(headers)?;
        let mut sessions = self.sessions.lock().await;
        let slot = sessions.get_mut(&id)?;
        if slot.last_used.elapsed() > self.idle_timeout {
            sessions.remove(&id);
            tracing::info!(session = %id, "session expired");
            return None;
        }
        slot.last_used = Instant::now();
        Some((id, slot.session.clone()))
    }

    /// Returns the caller's session, creating one if needed. The flag is true
    /// for a new session whose cookie must be set.
    async fn session_for(&self, headers: &HeaderMap) -> (Uuid, Arc<Session>, bool) {
        if let Some((id, s)) = self.existing_session(headers).await {
            return (id, s, false);
        }
        self.evict_idle().await;

        let id = Uuid::new_v4();
        let session = Arc::new(self.dispatcher.new_session());
        let mut sessions = self.sessions.lock().await;
        sessions.insert(
            id,
            SessionSlot {
                session: session.clone(),
                last_used: Instant::now(),
            },
        );
        tracing::info!(session = %id, active = sessions.len(), "session started");
        (id, session, true)
    }

    /// Drops every session idle for longer than the timeout.
    async fn evict_idle(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, slot| slot.last_used.elapsed() <= self.idle_timeout);
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::info!(evicted, active = sessions.len(), "idle sessions evicted");
        }
        evicted
    }
}

fn session_id(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|kv| kv.trim().strip_prefix(SESSION_COOKIE)?.strip_prefix('='))
        .find_map(|id| Uuid::parse_str(id).ok())
}

fn session_cookie(id: Uuid) -> String {
    format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Strict")
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/assets/markdown.js", get(markdown_js))
        .route("/api/config", get(page_config))
        .route("/api/chat", post(chat))
        .route("/api/history", get(history))
        .route("/api/reset", post(reset))
        .layer(middleware::from_fn_with_state(state.clone(), require_login))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(addr = %listener.local_addr()?, "chat UI listening");

    let sweeper = state.clone();
    tokio::spawn(async move {
        let period = sweeper.idle_timeout.clamp(Duration::from_secs(1), Duration::from_secs(60));
        let mut tick = tokio::time::interval(period);
        loop {
            tick.tick().await;
            sweeper.evict_idle().await;
        }
    });

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

async fn require_login(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let creds = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(auth::parse_basic);

    match creds {
        Some((user, pass)) if state.gate.authenticate(&user, &pass) => next.run(req).await,
        other => {
            if let Some((user, _)) = other {
                tracing::warn!(%user, "login rejected");
            }
            let realm = state.page.auth_message.replace('"', "'");
            (
                StatusCode::UNAUTHORIZED,
                [(WWW_AUTHENTICATE, format!("Basic realm=\"{realm}\", charset=\"UTF-8\""))],
                state.page.auth_message.clone(),
            )
                .into_response()
        }
    }
}

fn bad_request(e: ChatError) -> Response {
    tracing::warn!(error = %e, "rejected chat request");
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": e.to_string(), "kind": e.kind() })),
    )
        .into_response()
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn markdown_js() -> impl IntoResponse {
    ([(CONTENT_TYPE, "text/javascript; charset=utf-8")], MARKDOWN_JS)
}

#[derive(Debug, Serialize)]
struct PageConfig {
    title: String,
    description: String,
    models: Vec<ModelChoice>,
    default_model: ModelChoice,
}

async fn page_config(State(state): State<AppState>) -> Json<PageConfig> {
    Json(PageConfig {
        title: state.page.title.clone(),
        description: state.page.description.clone(),
        models: state.dispatcher.choices(),
        default_model: state.dispatcher.default_choice(),
    })
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    message: String,
    #[serde(default)]
    model: Option<String>,
}

/// Streams `partial` events with the cumulative reply, at most one `error`
/// event, then `done`.
async fn chat(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<ChatBody>) -> Response {
    let choice = match state.dispatcher.select(body.model.as_deref()) {
        Ok(c) => c,
        Err(e) => return bad_request(e),
    };
    if body.message.trim().is_empty() {
        return bad_request(ChatError::EmptyMessage);
    }

    let (id, session, fresh) = state.session_for(&headers).await;
    let replies = match state.dispatcher.dispatch_choice(&session, &body.message, choice) {
        Ok(s) => s,
        Err(e) => return bad_request(e),
    };
    tracing::debug!(session = %id, model = %choice, "streaming reply");

    let events = replies
        .map(|item| match item {
            Ok(text) => Event::default().event("partial").json_data(json!({ "text": text })),
            Err(e) => Event::default()
                .event("error")
                .json_data(json!({ "text": e.display_text(), "kind": e.kind() })),
        })
        .chain(tokio_stream::once(Ok(Event::default().event("done").data("{}"))));

    let sse = Sse::new(events).keep_alive(KeepAlive::default());
    if fresh {
        ([(SET_COOKIE, session_cookie(id))], sse).into_response()
    } else {
        sse.into_response()
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    model: Option<String>,
}

async fn history(State(state): State<AppState>, headers: HeaderMap, Query(q): Query<HistoryQuery>) -> Response {
    let choice = match state.dispatcher.select(q.model.as_deref()) {
        Ok(c) => c,
        Err(e) => return bad_request(e),
    };

    let turns = match state.existing_session(&headers).await {
        Some((_, session)) => match session.track(choice) {
            Some(track) => track.lock().await.turns().to_vec(),
            None => Vec::new(),
        },
        None => Vec::new(),
    };
    Json(turns).into_response()
}

async fn reset(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(id) = session_id(&headers) {
        if state.sessions.lock().await.remove(&id).is_some() {
            tracing::info!(session = %id, "session discarded");
        }
    }
    (
        StatusCode::NO_CONTENT,
        [(SET_COOKIE, format!("{SESSION_COOKIE}=; Path=/; Max-Age=0"))],
    )
        .into_response()
}
