//! HTTP server for the browser chat widget and its JSON/SSE API

use crate::agent::{AgentEvent, TraceSink};
use crate::config::Config;
use crate::llm::LlmError;
use crate::orchestrator::{ChatOrchestrator, ChatView, CycleOutcome};
use crate::session::{ChatMessage, ChatRole, SessionError, SessionStore};
use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Response,
    },
    routing::{get, post, put},
    Json, Router,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

const INDEX_HTML: &str = include_str!("static/index.html");

/// Shared application state
pub struct AppState {
    sessions: SessionStore,
    orchestrator: ChatOrchestrator,
}

impl AppState {
    pub fn new(orchestrator: ChatOrchestrator) -> Self {
        Self {
            sessions: SessionStore::new(),
            orchestrator,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    commit: String,
}

#[derive(Debug, Serialize)]
struct SessionResponse {
    id: Uuid,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    has_credential: Option<bool>,
    /// Set when a cycle is running and `messages` is the last published snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    busy: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct CredentialRequest {
    #[serde(default)]
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct MessageRequest {
    message: String,
}

/// One item of the per-message SSE stream
#[derive(Debug, Clone)]
enum ServerEvent {
    /// The user message as recorded in the transcript
    Message { role: ChatRole, content: String },
    Trace(AgentEvent),
    Reply { content: String },
    Warning { message: String },
    Error {
        message: String,
        retryable: bool,
        needs_new_credential: bool,
    },
}

impl ServerEvent {
    /// Describe a failed cycle, classifying provider errors for the widget
    fn cycle_failed(error: &anyhow::Error) -> Self {
        let llm = error
            .chain()
            .find_map(|cause| cause.downcast_ref::<LlmError>());
        ServerEvent::Error {
            message: format!("{:#}", error),
            retryable: llm.is_some_and(LlmError::is_retryable),
            needs_new_credential: llm.is_some_and(LlmError::needs_new_credential),
        }
    }
}

impl ServerEvent {
    fn into_sse(self) -> Result<Event, axum::Error> {
        let event = Event::default();
        match self {
            ServerEvent::Message { role, content } => event
                .event("message")
                .json_data(serde_json::json!({ "role": role, "content": content })),
            ServerEvent::Trace(trace) => event.event("trace").json_data(trace),
            ServerEvent::Reply { content } => event
                .event("reply")
                .json_data(serde_json::json!({ "role": ChatRole::Assistant, "content": content })),
            ServerEvent::Warning { message } => event
                .event("warning")
                .json_data(serde_json::json!({ "message": message })),
            ServerEvent::Error {
                message,
                retryable,
                needs_new_credential,
            } => event.event("error").json_data(serde_json::json!({
                "message": message,
                "retryable": retryable,
                "needs_new_credential": needs_new_credential,
            })),
        }
    }
}

struct ChannelSink {
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl TraceSink for ChannelSink {
    fn on_event(&self, event: AgentEvent) {
        // a closed channel only means the browser went away; the cycle still completes
        let _ = self.tx.send(ServerEvent::Trace(event));
    }
}

/// Streams a cycle's output to one HTTP response
struct HttpView {
    tx: mpsc::UnboundedSender<ServerEvent>,
    sink: Arc<ChannelSink>,
}

impl HttpView {
    fn new(tx: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            sink: Arc::new(ChannelSink { tx: tx.clone() }),
            tx,
        }
    }

    fn send(&self, event: ServerEvent) {
        let _ = self.tx.send(event);
    }
}

impl ChatView for HttpView {
    fn render(&self, role: ChatRole, text: &str) {
        let content = text.to_string();
        self.send(match role {
            ChatRole::User => ServerEvent::Message { role, content },
            ChatRole::Assistant => ServerEvent::Reply { content },
        });
    }

    fn warn(&self, text: &str) {
        self.send(ServerEvent::Warning {
            message: text.to_string(),
        });
    }

    fn trace_sink(&self) -> Arc<dyn TraceSink> {
        self.sink.clone()
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

fn session_error(e: SessionError) -> Response {
    let status = match e {
        SessionError::NotFound(_) => StatusCode::NOT_FOUND,
        SessionError::Busy(_) => StatusCode::CONFLICT,
    };
    error_response(status, e.to_string())
}

/// Build the router over `state`
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/sessions", post(create_session))
        .route("/sessions/:id", get(get_session).delete(delete_session))
        .route("/sessions/:id/credential", put(set_credential))
        .route("/sessions/:id/messages", post(post_message))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server until Ctrl+C
pub async fn run_http_server(host: &str, port: u16, config: Config) -> Result<()> {
    let orchestrator = ChatOrchestrator::from_config(&config)?;
    tracing::info!(
        model = %config.llm.model,
        tools = ?orchestrator.tools().names(),
        "Chat orchestrator ready"
    );
    let state = Arc::new(AppState::new(orchestrator));
    if config.server.session_idle_secs > 0 {
        spawn_session_sweeper(
            state.clone(),
            Duration::from_secs(config.server.session_idle_secs),
        );
    }
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            }
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}

/// Periodically drop sessions whose tab went away without ending them
fn spawn_session_sweeper(state: Arc<AppState>, max_idle: Duration) {
    let period = (max_idle / 4).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let evicted = state.sessions.evict_idle(max_idle);
            if evicted > 0 {
                tracing::debug!(evicted, remaining = state.sessions.len(), "Evicted idle sessions");
            }
        }
    });
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        commit: env!("SCOUT_GIT_HASH").to_string(),
    })
}

async fn create_session(State(state): State<Arc<AppState>>) -> Response {
    let id = state.sessions.create();
    match state.sessions.try_lock(&id) {
        Ok(session) => (
            StatusCode::CREATED,
            Json(SessionResponse {
                id,
                messages: session.transcript.messages().to_vec(),
                has_credential: None,
                busy: None,
            }),
        )
            .into_response(),
        Err(e) => session_error(e),
    }
}

async fn get_session(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    match state.sessions.try_lock(&id) {
        Ok(session) => Json(SessionResponse {
            id,
            messages: session.transcript.messages().to_vec(),
            has_credential: Some(session.credential.is_present()),
            busy: Some(false),
        })
        .into_response(),
        Err(SessionError::Busy(_)) => match state.sessions.snapshot(&id) {
            Ok(snapshot) => Json(SessionResponse {
                id,
                messages: snapshot.messages,
                has_credential: Some(snapshot.has_credential),
                busy: Some(true),
            })
            .into_response(),
            Err(e) => session_error(e),
        },
        Err(e) => session_error(e),
    }
}

async fn delete_session(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    match state.sessions.remove(&id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => session_error(e),
    }
}

async fn set_credential(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<CredentialRequest>,
) -> Response {
    match state.sessions.try_lock(&id) {
        Ok(mut session) => {
            session.set_credential(req.api_key);
            state.sessions.publish(&session);
            tracing::debug!(
                session = %id,
                present = session.credential.is_present(),
                "Credential updated"
            );
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => session_error(e),
    }
}

async fn post_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<MessageRequest>,
) -> Response {
    if req.message.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Message must not be empty");
    }

    let mut session = match state.sessions.try_lock(&id) {
        Ok(session) => session,
        Err(e) => return session_error(e),
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let view = HttpView::new(tx);

    tokio::spawn(async move {
        let outcome = state
            .orchestrator
            .submit(&mut session, &req.message, &view)
            .await;
        match outcome {
            Ok(CycleOutcome::Replied(_)) | Ok(CycleOutcome::MissingCredential) => {}
            Ok(CycleOutcome::Ignored) => view.send(ServerEvent::Warning {
                message: "Message must not be empty".to_string(),
            }),
            Err(e) => {
                tracing::error!(session = %id, "Chat cycle failed: {:#}", e);
                view.send(ServerEvent::cycle_failed(&e));
            }
        }
        state.sessions.publish(&session);
        // view and session guard drop here, closing the stream and releasing the session
    });

    sse_response(rx).into_response()
}

fn sse_response(
    rx: mpsc::UnboundedReceiver<ServerEvent>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let stream = UnboundedReceiverStream::new(rx).map(ServerEvent::into_sse);
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
