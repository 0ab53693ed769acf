//! HTTP and WebSocket handlers for the Claude proxy
//!
//! REST endpoints report configuration status and manage running CLI
//! sessions. The WebSocket endpoint accepts commands from browser clients and
//! streams bridge events back as JSON text frames.

use crate::agent::bridge::ClaudeProxy;
use crate::agent::probe::check_claude_cli;
use crate::agent::types::{AbortReply, ClientMessage, ProxyEvent, ProxyWriter};
use crate::config::ProxyConfigStatus;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Shared state for proxy handlers
#[derive(Clone)]
pub struct AgentState {
    pub proxy: Arc<ClaudeProxy>,
    pub probe_timeout: Duration,
}

/// Create the proxy router with all REST and WebSocket endpoints
pub fn proxy_router(state: AgentState) -> Router {
    Router::new()
        .route("/api/claude-proxy/status", get(proxy_status))
        .route("/api/claude-proxy/sessions", get(list_sessions))
        .route(
            "/api/claude-proxy/sessions/:id",
            get(get_session).delete(abort_session),
        )
        .route("/ws/claude-proxy", get(ws_upgrade))
        .with_state(state)
}

// =============================================================================
// Status
// =============================================================================

/// Proxy availability as reported to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyStatus {
    pub available: bool,
    pub base_url: Option<String>,
    pub has_api_key: bool,
    pub cli_installed: bool,
    pub configured: bool,
    pub error: Option<String>,
}

impl ProxyStatus {
    pub fn new(config: ProxyConfigStatus, cli_installed: bool) -> Self {
        Self {
            available: config.configured && cli_installed,
            base_url: config.base_url,
            has_api_key: config.has_api_key,
            cli_installed,
            configured: config.configured,
            error: None,
        }
    }

    /// Status returned when the check itself failed
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            available: false,
            base_url: None,
            has_api_key: false,
            cli_installed: false,
            configured: false,
            error: Some(error.into()),
        }
    }

    /// Check configuration and probe the CLI binary
    pub async fn collect(proxy: &ClaudeProxy, probe_timeout: Duration) -> Self {
        let config = proxy.config_status();
        let cli_installed = check_claude_cli(proxy.binary(), probe_timeout).await;
        Self::new(config, cli_installed)
    }
}

async fn proxy_status(State(state): State<AgentState>) -> impl IntoResponse {
    let proxy = state.proxy.clone();
    let probe_timeout = state.probe_timeout;
    let check = tokio::spawn(async move { ProxyStatus::collect(&proxy, probe_timeout).await });

    match check.await {
        Ok(status) => (StatusCode::OK, Json(status)),
        Err(e) => {
            tracing::error!("Claude proxy status check failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ProxyStatus::failed(e.to_string())),
            )
        }
    }
}

// =============================================================================
// Sessions
// =============================================================================

/// List ids of sessions with a running CLI process
async fn list_sessions(State(state): State<AgentState>) -> impl IntoResponse {
    let mut sessions = state.proxy.active_sessions().await;
    sessions.sort();
    Json(sessions)
}

async fn get_session(State(state): State<AgentState>, Path(id): Path<String>) -> impl IntoResponse {
    let active = state.proxy.is_active(&id).await;
    Json(serde_json::json!({ "sessionId": id, "active": active }))
}

/// Abort the CLI process serving a session
async fn abort_session(
    State(state): State<AgentState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if state.proxy.abort(&id).await {
        (
            StatusCode::OK,
            Json(serde_json::json!({ "sessionId": id, "aborted": true })),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Session not found" })),
        )
    }
}

// =============================================================================
// WebSocket
// =============================================================================

/// Writer that forwards events to one WebSocket connection
pub struct WebSocketWriter {
    tx: mpsc::UnboundedSender<String>,
    session_id: Mutex<Option<String>>,
}

impl WebSocketWriter {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            tx,
            session_id: Mutex::new(None),
        }
    }

    /// Session id reported by the CLI, once known
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().ok().and_then(|id| id.clone())
    }
}

impl ProxyWriter for WebSocketWriter {
    fn send(&self, event: ProxyEvent) {
        match serde_json::to_string(&event) {
            Ok(text) => {
                if self.tx.send(text).is_err() {
                    tracing::debug!(
                        session_id = ?self.session_id(),
                        "WebSocket closed, dropping {} event",
                        event.kind()
                    );
                }
            }
            Err(e) => tracing::warn!("Failed to serialize proxy event: {}", e),
        }
    }

    fn set_session_id(&self, session_id: &str) {
        if let Ok(mut current) = self.session_id.lock() {
            *current = Some(session_id.to_string());
        }
    }
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AgentState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Handle a client WebSocket connection (JSON protocol)
async fn handle_ws(socket: WebSocket, state: AgentState) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(connection_id = %connection_id, "Claude proxy WebSocket connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Channel for bridge → client outbound messages
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let send_connection_id = connection_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(Message::Text(msg)).await.is_err() {
                tracing::debug!(
                    connection_id = %send_connection_id,
                    "Claude proxy WebSocket send failed"
                );
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => handle_client_text(&text, &state, &tx).await,
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {}
        _ = recv_task => {}
    }

    tracing::info!(connection_id = %connection_id, "Claude proxy WebSocket disconnected");
}

/// Dispatch one text frame from a client
async fn handle_client_text(text: &str, state: &AgentState, tx: &mpsc::UnboundedSender<String>) {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            let preview: String = text.chars().take(200).collect();
            tracing::warn!("Invalid client message: {} (raw: {})", e, preview);
            WebSocketWriter::new(tx.clone())
                .send(ProxyEvent::error(format!("Invalid message: {}", e)));
            return;
        }
    };

    match message {
        ClientMessage::Command { command, options } => {
            let proxy = state.proxy.clone();
            let writer = WebSocketWriter::new(tx.clone());
            tokio::spawn(async move {
                if let Err(e) = proxy.run(&command, &options, &writer).await {
                    tracing::debug!(
                        session_id = ?writer.session_id(),
                        "Claude proxy command finished with error: {}",
                        e
                    );
                }
            });
        }
        ClientMessage::Abort { session_id } => {
            let success = state.proxy.abort(&session_id).await;
            let reply = AbortReply {
                session_id,
                success,
            };
            match serde_json::to_string(&reply) {
                Ok(text) => {
                    let _ = tx.send(text);
                }
                Err(e) => tracing::warn!("Failed to serialize abort reply: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::registry::{ProcessHandle, ProcessRegistry};
    use crate::config::{CliConfig, CredentialSource, ProxyCredentials};
    use std::path::PathBuf;

    fn make_state(credentials: ProxyCredentials) -> AgentState {
        let cli = CliConfig {
            binary: PathBuf::from("/nonexistent/claude-proxy-test/claude"),
            ..Default::default()
        };
        let proxy = ClaudeProxy::new(Arc::new(ProcessRegistry::new()), &cli)
            .with_credentials(CredentialSource::Fixed(credentials));
        AgentState {
            proxy: Arc::new(proxy),
            probe_timeout: Duration::from_secs(1),
        }
    }

    fn configured() -> ProxyCredentials {
        ProxyCredentials {
            base_url: Some("http://localhost:8082".to_string()),
            api_key: Some("sk-secret".to_string()),
        }
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 1024 * 64)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[test]
    fn test_agent_state_is_clone() {
        let state = make_state(configured());
        let _cloned = state.clone();
    }

    #[tokio::test]
    async fn test_proxy_router_builds() {
        let _router = proxy_router(make_state(configured()));
    }

    #[tokio::test]
    async fn test_status_configured_without_cli() {
        let state = make_state(configured());
        let resp = proxy_status(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["configured"], true);
        assert_eq!(json["cliInstalled"], false);
        assert_eq!(json["available"], false);
        assert_eq!(json["hasApiKey"], true);
        assert_eq!(json["baseUrl"], "http://localhost:8082");
        assert!(json["error"].is_null());
        assert!(!json.to_string().contains("sk-secret"));
    }

    #[tokio::test]
    async fn test_status_not_configured() {
        let state = make_state(ProxyCredentials::default());
        let json = body_json(proxy_status(State(state)).await.into_response()).await;
        assert_eq!(json["configured"], false);
        assert_eq!(json["hasApiKey"], false);
        assert!(json["baseUrl"].is_null());
    }

    #[test]
    fn test_proxy_status_available_requires_both() {
        let config = configured().status();
        assert!(ProxyStatus::new(config.clone(), true).available);
        assert!(!ProxyStatus::new(config, false).available);
        assert!(!ProxyStatus::new(ProxyCredentials::default().status(), true).available);
    }

    #[test]
    fn test_proxy_status_failed_shape() {
        let json = serde_json::to_value(ProxyStatus::failed("probe panicked")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "available": false,
                "baseUrl": null,
                "hasApiKey": false,
                "cliInstalled": false,
                "configured": false,
                "error": "probe panicked"
            })
        );
    }

    #[tokio::test]
    async fn test_list_and_get_sessions() {
        let state = make_state(configured());
        let registry = state.proxy.registry().clone();
        registry.insert("s2", ProcessHandle::new(None)).await;
        registry.insert("s1", ProcessHandle::new(None)).await;

        let json = body_json(list_sessions(State(state.clone())).await.into_response()).await;
        assert_eq!(json, serde_json::json!(["s1", "s2"]));

        let json = body_json(
            get_session(State(state.clone()), Path("s1".to_string()))
                .await
                .into_response(),
        )
        .await;
        assert_eq!(json, serde_json::json!({"sessionId": "s1", "active": true}));

        let json = body_json(
            get_session(State(state), Path("gone".to_string()))
                .await
                .into_response(),
        )
        .await;
        assert_eq!(json["active"], false);
    }

    #[tokio::test]
    async fn test_abort_session_endpoint() {
        let state = make_state(configured());
        let handle = ProcessHandle::new(None);
        state.proxy.registry().insert("s1", handle.clone()).await;

        let resp = abort_session(State(state.clone()), Path("s1".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            body_json(resp).await,
            serde_json::json!({"sessionId": "s1", "aborted": true})
        );
        assert!(handle.is_terminating());

        let resp = abort_session(State(state), Path("s1".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_websocket_writer_serializes_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let writer = WebSocketWriter::new(tx);

        writer.send(ProxyEvent::text_delta("hi"));
        writer.set_session_id("s1");

        let text = rx.try_recv().unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["type"], "claude-response");
        assert_eq!(json["data"]["delta"]["text"], "hi");
        assert_eq!(writer.session_id().as_deref(), Some("s1"));
    }

    #[test]
    fn test_websocket_writer_closed_channel_is_silent() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let writer = WebSocketWriter::new(tx);
        writer.send(ProxyEvent::error("nobody listening"));
    }

    #[tokio::test]
    async fn test_client_abort_reply() {
        let state = make_state(configured());
        state
            .proxy
            .registry()
            .insert("s1", ProcessHandle::new(None))
            .await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        handle_client_text(r#"{"type":"abort-session","sessionId":"s1"}"#, &state, &tx).await;
        handle_client_text(r#"{"type":"abort-session","sessionId":"s1"}"#, &state, &tx).await;

        let first: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(
            first,
            serde_json::json!({"type": "session-aborted", "sessionId": "s1", "success": true})
        );
        let second: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(second["success"], false);
    }

    #[tokio::test]
    async fn test_client_invalid_frame() {
        let state = make_state(configured());
        let (tx, mut rx) = mpsc::unbounded_channel();

        handle_client_text("not json", &state, &tx).await;

        let json: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(json["type"], "error");
        assert!(json["error"].as_str().unwrap().starts_with("Invalid message"));
    }

    #[tokio::test]
    async fn test_client_command_streams_errors_back() {
        let state = make_state(ProxyCredentials::default());
        let (tx, mut rx) = mpsc::unbounded_channel();

        handle_client_text(
            r#"{"type":"claude-proxy-command","command":"hello","options":{}}"#,
            &state,
            &tx,
        )
        .await;
        drop(tx);

        let text = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["type"], "error");
        assert!(json["error"]
            .as_str()
            .unwrap()
            .starts_with("Claude Code Proxy not configured"));
    }
}
