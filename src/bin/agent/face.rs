//! HTTP surface: tool listing and invocation, task submission, and an SSE
//! stream of agent progress.

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::{Value, json};
use tabwright::{AgentEvent, Context, ToolDescriptor, ToolRegistry};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};

/// How many ports above the configured one are tried before giving up.
const PORT_ATTEMPTS: u16 = 10;

fn to_sse_event(event: &AgentEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(event.name()).data(data)
}

#[derive(Clone)]
pub struct AppState {
    pub cmd_tx: mpsc::Sender<String>,
    pub event_tx: broadcast::Sender<AgentEvent>,
    pub registry: ToolRegistry,
    pub context: Arc<Context>,
}

#[derive(Deserialize)]
struct TaskPayload {
    task: String,
}

/// Binds the first free port in `port..port + PORT_ATTEMPTS`.
pub async fn bind_with_fallback(port: u16) -> Result<TcpListener> {
    let last = port.saturating_add(PORT_ATTEMPTS - 1);
    for candidate in port..=last {
        match TcpListener::bind(("127.0.0.1", candidate)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => debug!(port = candidate, "bind failed: {}", e),
        }
    }
    Err(anyhow!(
        "could not bind to any port {}-{}; stop the other agent first",
        port,
        last
    ))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/tools", get(list_tools_handler))
        .route("/tools/{name}", post(call_tool_handler))
        .route("/task", post(task_handler))
        .route("/events", get(sse_handler))
        .with_state(state)
}

/// Starts serving in the background. Returns the task queue and the event
/// channel the agent loop publishes to.
pub async fn start_server(
    port: u16,
    registry: ToolRegistry,
    context: Arc<Context>,
) -> Result<(mpsc::Receiver<String>, broadcast::Sender<AgentEvent>)> {
    let (cmd_tx, cmd_rx) = mpsc::channel::<String>(1);
    let (event_tx, _) = broadcast::channel::<AgentEvent>(64);

    let state = Arc::new(AppState {
        cmd_tx,
        event_tx: event_tx.clone(),
        registry,
        context,
    });

    let listener = bind_with_fallback(port).await?;
    let addr = listener.local_addr()?;
    info!("serving on http://{}", addr);

    let app = router(state);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("server stopped: {}", e);
        }
    });

    Ok((cmd_rx, event_tx))
}

async fn list_tools_handler(State(state): State<Arc<AppState>>) -> Json<Vec<ToolDescriptor>> {
    Json(state.registry.descriptors())
}

async fn call_tool_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> Response {
    if state.registry.get(&name).is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("Tool \"{}\" not found", name)})),
        )
            .into_response();
    }

    let arguments = if body.is_empty() {
        Value::Null
    } else {
        match serde_json::from_slice(&body) {
            Ok(value) => value,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": format!("invalid JSON arguments: {}", e)})),
                )
                    .into_response();
            }
        }
    };

    debug!(tool = %name, "POST /tools");
    let output = state
        .registry
        .execute(&state.context, &name, arguments)
        .await;
    Json(output).into_response()
}

async fn task_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TaskPayload>,
) -> (StatusCode, &'static str) {
    info!("POST /task: {}", payload.task);
    match state.cmd_tx.try_send(payload.task) {
        Ok(()) => (StatusCode::ACCEPTED, "accepted"),
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("task rejected: agent busy");
            (StatusCode::CONFLICT, "agent busy")
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            (StatusCode::SERVICE_UNAVAILABLE, "agent stopped")
        }
    }
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    // Lagged receivers drop the missed events and keep streaming.
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => Some(Ok::<_, Infallible>(to_sse_event(&event))),
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
