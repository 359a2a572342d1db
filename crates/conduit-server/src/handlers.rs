//! HTTP handlers for the Conduit server.
//!
//! Exposes the WebSocket endpoint, the long-polling endpoints and a health
//! check. Both transports feed the same [`Endpoint`].

use crate::channels;
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use conduit_core::Endpoint;
use conduit_protocol::codec;
use conduit_transport::{
    run_duplex, DuplexConfig, DuplexConnection, LongPoll, PollError, TransportError,
};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The channel endpoint both transports dispatch into.
    pub endpoint: Endpoint,
    /// Long-polling sessions.
    pub longpoll: Arc<LongPoll>,
    /// Duplex adapter settings.
    pub duplex: DuplexConfig,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state with the server's channels registered.
    ///
    /// # Errors
    ///
    /// Returns an error if a channel cannot be registered.
    pub fn new(config: Config) -> Result<Self> {
        let endpoint = Endpoint::new(channels::registry()?);
        let longpoll = Arc::new(LongPoll::new(endpoint.clone(), config.longpoll()));

        Ok(Self {
            endpoint,
            longpoll,
            duplex: config.duplex(),
            config,
        })
    }
}

/// Build the HTTP router for the enabled transports.
pub fn app(state: Arc<AppState>) -> Router {
    let transport = state.config.transport.clone();
    let mut router: Router<Arc<AppState>> = Router::new().route("/health", get(health_handler));

    if transport.websocket {
        router = router.route(&transport.websocket_path, get(ws_handler));
    }

    if transport.longpoll {
        let base = transport.longpoll_path.trim_end_matches('/');
        router = router.route(base, post(longpoll_open)).route(
            &format!("{base}/:token"),
            get(longpoll_fetch)
                .post(longpoll_submit)
                .delete(longpoll_close),
        );
    }

    router.with_state(state)
}

/// Run the HTTP server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let state = Arc::new(AppState::new(config.clone())?);

    if config.transport.longpoll {
        state
            .longpoll
            .spawn_reaper(Duration::from_millis(config.longpoll.reap_interval_ms));
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Conduit server listening on {}", addr);
    if config.transport.websocket {
        info!(
            "WebSocket endpoint: ws://{}{}",
            addr, config.transport.websocket_path
        );
    }
    if config.transport.longpoll {
        info!(
            "Long-poll endpoint: http://{}{}",
            addr, config.transport.longpoll_path
        );
    }

    axum::serve(listener, app(state)).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
///
/// Messages over `limits.max_message_size` are dropped one by one. Only
/// messages beyond the codec's frame ceiling fail at the WebSocket layer.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ceiling = codec::MAX_FRAME_SIZE.max(state.config.limits.max_message_size);
    ws.max_message_size(ceiling)
        .on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Serve an upgraded WebSocket until it ends.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let mut conn = AxumConnection {
        socket,
        max_message_size: state.config.limits.max_message_size,
    };
    let reason = run_duplex(&mut conn, &state.endpoint, &state.duplex).await;

    metrics::record_disconnect_reason(reason.kind());
    metrics::set_active_topics(state.endpoint.pubsub().stats().topic_count);
}

/// An axum WebSocket as a duplex connection.
struct AxumConnection {
    socket: WebSocket,
    max_message_size: usize,
}

impl AxumConnection {
    fn within_limit(&self, size: usize) -> bool {
        if size > self.max_message_size {
            warn!(size, limit = self.max_message_size, "Dropping oversized message");
            metrics::record_error("oversized");
            return false;
        }
        true
    }
}

#[async_trait]
impl DuplexConnection for AxumConnection {
    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.socket.recv().await {
                Some(Ok(Message::Text(text))) => {
                    if self.within_limit(text.len()) {
                        metrics::record_messages(1, "inbound");
                        return Ok(Some(text));
                    }
                }
                Some(Ok(Message::Binary(data))) if !self.within_limit(data.len()) => {}
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => {
                        metrics::record_messages(1, "inbound");
                        return Ok(Some(text));
                    }
                    Err(_) => debug!("Dropping non UTF-8 binary frame"),
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket error");
                    metrics::record_error("websocket");
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
            }
        }
    }

    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.socket
            .send(Message::Text(frame))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        metrics::record_messages(1, "outbound");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.socket
            .send(Message::Close(None))
            .await
            .map_err(|e| TransportError::Other(format!("Failed to close: {}", e)))
    }
}

/// Open a long-poll session.
async fn longpoll_open(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let token = state.longpoll.open();
    metrics::set_longpoll_sessions(state.longpoll.session_count());
    Json(json!({ "token": token }))
}

/// Return every frame buffered for the session as a JSON array.
async fn longpoll_fetch(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Response {
    match state.longpoll.fetch(&token).await {
        Ok(frames) => {
            metrics::record_messages(frames.len(), "outbound");
            (
                [(header::CONTENT_TYPE, "application/json")],
                codec::encode_batch(frames.as_slice()),
            )
                .into_response()
        }
        Err(e) => poll_error(&state, e),
    }
}

/// Dispatch a JSON array of messages for the session.
async fn longpoll_submit(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    body: String,
) -> Response {
    let start = Instant::now();
    let result = state.longpoll.submit(&token, &body).await;
    metrics::record_latency(start.elapsed().as_secs_f64());

    match result {
        Ok(dispatched) => {
            metrics::record_messages(dispatched, "inbound");
            metrics::set_active_topics(state.endpoint.pubsub().stats().topic_count);
            Json(json!({ "dispatched": dispatched })).into_response()
        }
        Err(e) => poll_error(&state, e),
    }
}

/// Close the session.
async fn longpoll_close(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> StatusCode {
    if state.longpoll.close(&token).await {
        metrics::set_longpoll_sessions(state.longpoll.session_count());
        metrics::set_active_topics(state.endpoint.pubsub().stats().topic_count);
    }
    StatusCode::NO_CONTENT
}

fn poll_error(state: &AppState, e: PollError) -> Response {
    let status = match &e {
        PollError::UnknownSession(_) => StatusCode::GONE,
        PollError::Malformed(_) => StatusCode::BAD_REQUEST,
        PollError::Terminated(reason) => {
            error!(reason = %reason, "Long-poll session terminated");
            metrics::record_error("handler");
            metrics::set_longpoll_sessions(state.longpoll.session_count());
            StatusCode::GONE
        }
    };
    (status, e.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::Value;
    use std::future::IntoFuture;
    use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

    fn state() -> Arc<AppState> {
        Arc::new(AppState::new(Config::default()).unwrap())
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn open(state: &Arc<AppState>) -> String {
        let response = longpoll_open(State(state.clone())).await.into_response();
        let body = body_json(response).await;
        body["token"].as_str().unwrap().to_string()
    }

    const JOIN_LOBBY: &str =
        r#"[{"channel":"rooms","topic":"lobby","event":"join","message":{"user":"ana"}}]"#;

    #[tokio::test]
    async fn test_longpoll_session_flow() {
        let state = state();
        let token = open(&state).await;

        let response =
            longpoll_fetch(State(state.clone()), Path(token.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!([]));

        let response = longpoll_submit(
            State(state.clone()),
            Path(token.clone()),
            JOIN_LOBBY.to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["dispatched"], 1);

        let response = longpoll_fetch(State(state.clone()), Path(token.clone())).await;
        let frames = body_json(response).await;
        let frames = frames.as_array().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["event"], "join");
        assert_eq!(frames[1]["event"], "user:entered");
        assert_eq!(frames[1]["message"]["user"], "ana");

        let status = longpoll_close(State(state.clone()), Path(token.clone())).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let response = longpoll_fetch(State(state.clone()), Path(token)).await;
        assert_eq!(response.status(), StatusCode::GONE);
    }

    #[tokio::test]
    async fn test_longpoll_errors() {
        let state = state();

        let response = longpoll_fetch(State(state.clone()), Path("nope".into())).await;
        assert_eq!(response.status(), StatusCode::GONE);

        let response =
            longpoll_submit(State(state.clone()), Path("nope".into()), "[]".into()).await;
        assert_eq!(response.status(), StatusCode::GONE);

        let token = open(&state).await;
        let response =
            longpoll_submit(State(state.clone()), Path(token), "not json".into()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_websocket_and_longpoll_share_topics() {
        let state = state();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(axum::serve(listener, app(state.clone())).into_future());

        let (mut client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        let join = r#"{"channel":"rooms","topic":"lobby","event":"join","message":{"user":"ws"}}"#;
        client.send(WsMessage::Text(join.into())).await.unwrap();

        let mut events = Vec::new();
        while events.len() < 2 {
            if let WsMessage::Text(text) = client.next().await.unwrap().unwrap() {
                let message = codec::decode(&text).unwrap();
                events.push(message.event);
            }
        }
        assert_eq!(events, ["join", "user:entered"]);

        let token = open(&state).await;
        longpoll_submit(State(state.clone()), Path(token.clone()), JOIN_LOBBY.into()).await;

        let entered = loop {
            if let WsMessage::Text(text) = client.next().await.unwrap().unwrap() {
                break codec::decode(&text).unwrap();
            }
        };
        assert_eq!(entered.event, "user:entered");
        assert_eq!(entered.message["user"], "ana");

        client.close(None).await.unwrap();
        server.abort();
    }

    #[tokio::test]
    async fn test_oversized_websocket_message_is_dropped() {
        let state = state();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(axum::serve(listener, app(state.clone())).into_future());

        let (mut client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        let join = r#"{"channel":"rooms","topic":"lobby","event":"join","message":{}}"#;
        client.send(WsMessage::Text(join.into())).await.unwrap();

        let oversized = "x".repeat(state.config.limits.max_message_size + 1);
        client.send(WsMessage::Text(oversized)).await.unwrap();
        let heartbeat = codec::encode(&conduit_protocol::Message::heartbeat());
        client.send(WsMessage::Text(heartbeat)).await.unwrap();

        let echoed = loop {
            if let WsMessage::Text(text) = client.next().await.unwrap().unwrap() {
                let message = codec::decode(&text).unwrap();
                if message.is_heartbeat() {
                    break message;
                }
            }
        };
        assert_eq!(echoed, conduit_protocol::Message::heartbeat());

        let lobby = conduit_core::ChannelTopic::new("rooms", "lobby");
        assert_eq!(state.endpoint.pubsub().subscriber_count(&lobby), 1);

        client.close(None).await.unwrap();
        server.abort();
    }
}
