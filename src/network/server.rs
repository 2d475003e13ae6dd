//! WebSocket Swap Server
//!
//! Serves the WebSocket endpoint and the plain HTTP liveness check on one
//! port. Decoded client frames are routed to the session registry; outbound
//! frames reach each socket through the connection's channel.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::network::connection::{ConnectionHandle, ConnectionRegistry};
use crate::network::protocol::{ClientMessage, FrameError, ServerMessage};
use crate::network::session::{SessionConfig, SessionManager};
use crate::swap::state::SessionId;
use crate::DEFAULT_PORT;

/// Body returned by `GET /`.
pub const HEALTH_BODY: &str = "CodeSwap Server OK";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent WebSocket clients.
    pub max_connections: usize,
    /// Body of the liveness response.
    pub health_body: String,
    /// Session and round settings.
    pub session: SessionConfig,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_connections: 1000,
            health_body: HEALTH_BODY.to_string(),
            session: SessionConfig::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables (`PORT`).
    pub fn from_env() -> Self {
        Self::default().with_port_var(std::env::var("PORT").ok().as_deref())
    }

    /// Apply a raw `PORT` value. Unparseable values keep the current port.
    pub fn with_port_var(mut self, raw: Option<&str>) -> Self {
        if let Some(raw) = raw {
            match raw.trim().parse::<u16>() {
                Ok(port) => self.bind_addr.set_port(port),
                Err(_) => warn!(
                    "Ignoring invalid PORT {:?}, using {}",
                    raw,
                    self.bind_addr.port()
                ),
            }
        }
        self
    }
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(std::io::Error),

    /// Listener I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] axum::Error),

    /// Outbound frame could not be encoded.
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Connection limit reached.
    #[error("Connection limit reached")]
    ConnectionLimitReached,
}

/// Shared state handed to the HTTP handlers.
#[derive(Clone)]
struct AppState {
    sessions: Arc<SessionManager>,
    connections: Arc<ConnectionRegistry>,
    shutdown: CancellationToken,
    config: Arc<ServerConfig>,
}

/// The swap server.
pub struct SwapServer {
    /// Server configuration.
    config: Arc<ServerConfig>,
    /// Session registry.
    sessions: Arc<SessionManager>,
    /// Connected clients.
    connections: Arc<ConnectionRegistry>,
    /// Shutdown signal.
    shutdown: CancellationToken,
}

impl SwapServer {
    /// Create a new server.
    pub fn new(config: ServerConfig) -> Self {
        let sessions = Arc::new(SessionManager::new(config.session.clone()));
        Self {
            config: Arc::new(config),
            sessions,
            connections: Arc::new(ConnectionRegistry::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Build the router: `GET /` answers the liveness check, and a WebSocket
    /// handshake on any path is upgraded.
    pub fn router(&self) -> Router {
        let state = AppState {
            sessions: self.sessions.clone(),
            connections: self.connections.clone(),
            shutdown: self.shutdown.clone(),
            config: self.config.clone(),
        };

        Router::new()
            .route("/", get(root_handler).fallback(fallback_handler))
            .fallback(fallback_handler)
            .with_state(state)
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(ServerError::BindFailed)
    }

    /// Bind and serve until [`SwapServer::shutdown`] is called.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    #[instrument(skip_all)]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        info!("CodeSwap server listening on {}", listener.local_addr()?);

        let shutdown = self.shutdown.clone();
        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("Shutdown signal received");
            })
            .await;

        self.sessions.shutdown().await;
        Ok(result?)
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.connections.len().await
    }

    /// Get active session count.
    pub async fn session_count(&self) -> usize {
        self.sessions.session_count().await
    }
}

// =============================================================================
// HTTP HANDLERS
// =============================================================================

/// GET /
async fn root_handler(
    State(state): State<AppState>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match upgrade {
        Ok(ws) => upgrade_client(ws, state).await,
        Err(_) => state.config.health_body.clone().into_response(),
    }
}

/// Any other method or path: upgrade if asked to, else 404.
async fn fallback_handler(
    State(state): State<AppState>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match upgrade {
        Ok(ws) => upgrade_client(ws, state).await,
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn upgrade_client(ws: WebSocketUpgrade, state: AppState) -> Response {
    if state.connections.len().await >= state.config.max_connections {
        warn!("{}, refusing handshake", ServerError::ConnectionLimitReached);
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

// =============================================================================
// WEBSOCKET CLIENTS
// =============================================================================

/// Drive one client: sender task for outbound frames, reader loop for
/// inbound ones, teardown when either side goes away.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (connection, mut outbound) =
        ConnectionHandle::channel(state.config.session.outbound_buffer);
    let conn_id = connection.id();

    state.connections.add(connection.clone()).await;
    info!("Client {} connected", conn_id);

    // Spawn message sender task
    let sender_task = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            match send_frame(&mut ws_sender, &msg).await {
                Ok(()) => {}
                Err(ServerError::Serialize(e)) => {
                    error!("Failed to serialize message: {}", e);
                }
                Err(e) => {
                    debug!("Outbound to {} stopped: {}", conn_id, e);
                    break;
                }
            }
        }
    });

    // Handle incoming messages
    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        on_frame(&state.sessions, &connection, ClientMessage::from_json(text.as_str())).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        on_frame(&state.sessions, &connection, ClientMessage::from_bytes(&data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Client {} disconnected", conn_id);
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("{} for {}", ServerError::from(e), conn_id);
                        break;
                    }
                    _ => {}
                }
            }
            () = state.shutdown.cancelled() => {
                break;
            }
        }
    }

    // Cleanup
    sender_task.abort();
    state.sessions.disconnect(&conn_id).await;
    state.connections.remove(&conn_id).await;

    info!("Client {} cleaned up", conn_id);
}

/// Encode and write one outbound frame.
async fn send_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> Result<(), ServerError> {
    let text = msg.to_json()?;
    sink.send(Message::Text(text.into())).await?;
    Ok(())
}

/// Route a decoded frame. Malformed frames are dropped without reply.
async fn on_frame(
    sessions: &SessionManager,
    connection: &ConnectionHandle,
    frame: Result<ClientMessage, FrameError>,
) {
    match frame {
        Ok(msg) => handle_client_message(sessions, connection, msg).await,
        Err(e) => debug!("Dropping frame from {}: {}", connection.id(), e),
    }
}

/// Handle a client message.
async fn handle_client_message(
    sessions: &SessionManager,
    connection: &ConnectionHandle,
    msg: ClientMessage,
) {
    match msg {
        ClientMessage::CreateSession => {
            if let Err(e) = sessions.create_session(connection.clone()).await {
                debug!("Create from {} failed: {}", connection.id(), e);
            }
        }
        ClientMessage::JoinSession { session_id } => {
            let session_id = SessionId::from(session_id);
            if let Err(e) = sessions.join_session(connection.clone(), &session_id).await {
                debug!("Join from {} failed: {}", connection.id(), e);
            }
        }
        ClientMessage::CodeUpdate(update) => {
            sessions
                .update_payload(&connection.id(), update.into_payload())
                .await;
        }
    }
}
