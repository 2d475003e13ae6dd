//! Session Registry
//!
//! Owns every live [`SwapSession`], the index from connection to session, and
//! the round timer task of each running session.
//!
//! Locking: the registry maps are only held for lookups, inserts and removals,
//! never while waiting for a session lock. Session mutations (seat, payload
//! capture, tick, teardown) happen under that session's own lock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::RwLock;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::network::connection::{ConnectionHandle, ConnectionId};
use crate::network::protocol::ServerMessage;
use crate::swap::round;
use crate::swap::state::{Payload, SessionId, SwapSession};
use crate::{ROUND_DURATION_SECS, SWAP_WARNING_SECS};

/// Random draws before falling back to a scan of the id space.
const ID_GENERATION_ATTEMPTS: usize = 32;

/// Configuration for sessions.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Round length (seconds).
    pub round_duration_secs: u32,
    /// Countdown value that triggers `swap_warning`.
    pub swap_warning_secs: u32,
    /// Time between countdown ticks.
    pub tick_interval: Duration,
    /// Outbound frame buffer per connection.
    ///
    /// A running session queues at most three frames per tick, so the default
    /// absorbs well over a minute of a stalled socket before `code_swap` can
    /// be dropped.
    pub outbound_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            round_duration_secs: ROUND_DURATION_SECS,
            swap_warning_secs: SWAP_WARNING_SECS,
            tick_interval: Duration::from_secs(1),
            outbound_buffer: 256,
        }
    }
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No live session with that id.
    #[error("Session not found")]
    NotFound,

    /// Both slots are taken.
    #[error("Session full")]
    Full,

    /// Connection already belongs to a session.
    #[error("Already in a session")]
    AlreadySeated,

    /// Round cannot start before both slots are filled.
    #[error("Session not ready")]
    NotReady,

    /// Every session id is in use.
    #[error("No session ids available")]
    IdSpaceExhausted,
}

impl SessionError {
    /// Whether the requester is told about this error.
    pub fn is_reported(&self) -> bool {
        matches!(
            self,
            SessionError::NotFound | SessionError::Full | SessionError::IdSpaceExhausted
        )
    }
}

// =============================================================================
// SESSION MANAGER
// =============================================================================

/// Manages all live sessions.
pub struct SessionManager {
    config: SessionConfig,
    /// Live sessions.
    sessions: RwLock<BTreeMap<SessionId, Arc<RwLock<SwapSession>>>>,
    /// Connection to session mapping.
    connection_sessions: RwLock<BTreeMap<ConnectionId, SessionId>>,
}

impl SessionManager {
    /// Create new session manager.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(BTreeMap::new()),
            connection_sessions: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create a session with `connection` in the first slot and reply with
    /// `session_created`.
    #[instrument(skip_all, fields(conn = %connection.id()))]
    pub async fn create_session(
        &self,
        connection: ConnectionHandle,
    ) -> Result<SessionId, SessionError> {
        let conn_id = connection.id();
        if self.session_of(&conn_id).await.is_some() {
            debug!("Connection {} already seated, ignoring create", conn_id);
            return Err(SessionError::AlreadySeated);
        }

        let id = {
            let mut sessions = self.sessions.write().await;
            let Some(id) = generate_session_id(&*sessions) else {
                connection.send(ServerMessage::error(
                    SessionError::IdSpaceExhausted.to_string(),
                ));
                return Err(SessionError::IdSpaceExhausted);
            };
            let session = SwapSession::new(
                id.clone(),
                connection.clone(),
                self.config.round_duration_secs,
                self.config.swap_warning_secs,
            );
            sessions.insert(id.clone(), Arc::new(RwLock::new(session)));
            id
        };

        self.connection_sessions
            .write()
            .await
            .insert(conn_id, id.clone());

        connection.send(ServerMessage::SessionCreated {
            session_id: id.to_string(),
        });
        info!("Session {} created, waiting for second player", id);

        Ok(id)
    }

    /// Seat `connection` in the session's free slot and start the first round.
    ///
    /// `Session not found` and `Session full` are reported to the requester
    /// as `error` frames and leave the registry untouched.
    #[instrument(skip_all, fields(conn = %connection.id(), session = %session_id))]
    pub async fn join_session(
        &self,
        connection: ConnectionHandle,
        session_id: &SessionId,
    ) -> Result<(), SessionError> {
        let result = self.try_join(connection.clone(), session_id).await;
        if let Err(err) = &result {
            if err.is_reported() {
                connection.send(ServerMessage::error(err.to_string()));
            }
            debug!("Join of session {} refused: {}", session_id, err);
        }
        result
    }

    async fn try_join(
        &self,
        connection: ConnectionHandle,
        session_id: &SessionId,
    ) -> Result<(), SessionError> {
        let conn_id = connection.id();
        if self.session_of(&conn_id).await.is_some() {
            return Err(SessionError::AlreadySeated);
        }

        let session = self
            .get_session(session_id)
            .await
            .ok_or(SessionError::NotFound)?;

        let mut guard = session.write().await;
        guard.seat(connection.clone())?;

        // Indexed while the session lock is held so a concurrent teardown
        // sees the joiner and clears this entry.
        self.connection_sessions
            .write()
            .await
            .insert(conn_id, session_id.clone());

        connection.send(ServerMessage::PlayerJoined {
            session_id: session_id.to_string(),
        });
        info!("Player joined session {}, players: {}", session_id, guard.participant_count());

        let token = CancellationToken::new();
        guard.start_round(token.clone())?;
        drop(guard);

        tokio::spawn(run_round_timer(
            session,
            session_id.clone(),
            token,
            self.config.tick_interval,
        ));
        info!("Game started in session {}", session_id);

        Ok(())
    }

    /// Record the latest payload from `connection`.
    ///
    /// No-op (returns `false`) when the connection is in no live session.
    pub async fn update_payload(&self, connection: &ConnectionId, payload: Payload) -> bool {
        let Some(session) = self.get_connection_session(connection).await else {
            debug!("Payload from {} outside any session, ignoring", connection);
            return false;
        };
        let mut guard = session.write().await;
        guard.update_payload(connection, payload)
    }

    /// Tear down the session `connection` belongs to.
    ///
    /// The timer is cancelled and the partner, if any, is released. Returns
    /// the id of the removed session.
    #[instrument(skip(self))]
    pub async fn disconnect(&self, connection: &ConnectionId) -> Option<SessionId> {
        let session_id = self.connection_sessions.write().await.remove(connection)?;
        let session = self.sessions.write().await.remove(&session_id)?;

        let released = session.write().await.terminate();
        self.release_connections(&session_id, &released).await;

        info!("Session {} terminated by disconnect of {}", session_id, connection);
        Some(session_id)
    }

    /// Terminate every session.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = {
            let mut sessions = self.sessions.write().await;
            std::mem::take(&mut *sessions).into_iter().collect()
        };

        for (session_id, session) in &drained {
            let released = session.write().await.terminate();
            self.release_connections(session_id, &released).await;
        }

        if !drained.is_empty() {
            info!("Terminated {} sessions on shutdown", drained.len());
        }
    }

    async fn release_connections(&self, session_id: &SessionId, released: &[ConnectionId]) {
        let mut index = self.connection_sessions.write().await;
        for conn in released {
            if index.get(conn) == Some(session_id) {
                index.remove(conn);
            }
        }
    }

    /// Get a session by ID.
    pub async fn get_session(&self, id: &SessionId) -> Option<Arc<RwLock<SwapSession>>> {
        let sessions = self.sessions.read().await;
        sessions.get(id).cloned()
    }

    /// Session id a connection is seated in.
    pub async fn session_of(&self, connection: &ConnectionId) -> Option<SessionId> {
        self.connection_sessions.read().await.get(connection).cloned()
    }

    /// Get session for a connection.
    pub async fn get_connection_session(
        &self,
        connection: &ConnectionId,
    ) -> Option<Arc<RwLock<SwapSession>>> {
        let session_id = self.session_of(connection).await?;
        self.get_session(&session_id).await
    }

    /// Get active session count.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

/// Pick an id that is not used by a live session.
fn generate_session_id<V>(live: &BTreeMap<SessionId, V>) -> Option<SessionId> {
    let mut rng = rand::thread_rng();
    for _ in 0..ID_GENERATION_ATTEMPTS {
        let id = SessionId::from_number(rng.gen_range(SessionId::MIN..=SessionId::MAX));
        if !live.contains_key(&id) {
            return Some(id);
        }
    }

    (SessionId::MIN..=SessionId::MAX)
        .map(SessionId::from_number)
        .find(|id| !live.contains_key(id))
}

/// Drive a running session once per `tick_interval` until `token` is
/// cancelled.
async fn run_round_timer(
    session: Arc<RwLock<SwapSession>>,
    session_id: SessionId,
    token: CancellationToken,
    tick_interval: Duration,
) {
    let mut ticker = interval_at(Instant::now() + tick_interval, tick_interval);
    // Missed ticks are replayed so the countdown keeps pace with wall-clock.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let mut guard = session.write().await;
        // Teardown cancels under this lock.
        if token.is_cancelled() {
            break;
        }
        if round::tick(&mut guard).is_none() {
            break;
        }
    }

    debug!("Round timer for session {} stopped", session_id);
}
