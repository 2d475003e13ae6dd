//! Session State
//!
//! A session has two participant slots, a countdown and, while running, the
//! cancellation token of its round timer.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::network::connection::{ConnectionHandle, ConnectionId};
use crate::network::protocol::ServerMessage;
use crate::network::session::SessionError;

/// Participants per session.
pub const SLOT_COUNT: usize = 2;

/// Four-digit numeric session identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Smallest generated id.
    pub const MIN: u16 = 1000;
    /// Largest generated id.
    pub const MAX: u16 = 9999;

    /// Id for a number in `MIN..=MAX`.
    pub fn from_number(n: u16) -> Self {
        Self(n.to_string())
    }

    /// Borrow as string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Code and language captured from a participant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Editor contents.
    pub code: String,
    /// Language identifier.
    pub language: String,
}

impl Payload {
    /// Create a payload.
    pub fn new(code: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            language: language.into(),
        }
    }
}

/// A seated connection and its latest payload.
#[derive(Debug)]
pub struct Participant {
    /// Outbound handle.
    pub connection: ConnectionHandle,
    /// Most recently reported payload.
    pub payload: Payload,
}

impl Participant {
    /// Seat a connection with an empty payload.
    pub fn new(connection: ConnectionHandle) -> Self {
        Self {
            connection,
            payload: Payload::default(),
        }
    }
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// One participant, waiting for a partner.
    Forming,
    /// Both slots filled, countdown active.
    Running,
    /// A participant left or the registry shut down.
    Terminated,
}

/// A two-player swap session.
#[derive(Debug)]
pub struct SwapSession {
    /// Unique session identifier.
    pub id: SessionId,
    slots: [Option<Participant>; SLOT_COUNT],
    pub(crate) countdown: u32,
    round_duration: u32,
    swap_warning_at: u32,
    timer: Option<CancellationToken>,
    terminated: bool,
    pub(crate) rounds_completed: u64,
}

impl SwapSession {
    /// Create a session with the creator in slot 0.
    pub fn new(
        id: SessionId,
        creator: ConnectionHandle,
        round_duration: u32,
        swap_warning_at: u32,
    ) -> Self {
        Self {
            id,
            slots: [Some(Participant::new(creator)), None],
            countdown: round_duration,
            round_duration,
            swap_warning_at,
            timer: None,
            terminated: false,
            rounds_completed: 0,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        if self.terminated {
            SessionState::Terminated
        } else if self.timer.is_some() {
            SessionState::Running
        } else {
            SessionState::Forming
        }
    }

    /// Number of filled slots.
    pub fn participant_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Whether both slots are filled.
    pub fn is_full(&self) -> bool {
        self.participant_count() == SLOT_COUNT
    }

    /// Slot index of a connection.
    pub fn slot_of(&self, connection: &ConnectionId) -> Option<usize> {
        self.slots.iter().position(|slot| {
            slot.as_ref()
                .is_some_and(|p| p.connection.id() == *connection)
        })
    }

    /// Participant in a slot.
    pub fn participant(&self, slot: usize) -> Option<&Participant> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Seconds remaining in the current round.
    pub fn countdown(&self) -> u32 {
        self.countdown
    }

    /// Configured round length.
    pub fn round_duration(&self) -> u32 {
        self.round_duration
    }

    /// Countdown value that triggers the warning.
    pub fn swap_warning_at(&self) -> u32 {
        self.swap_warning_at
    }

    /// Number of swaps performed.
    pub fn rounds_completed(&self) -> u64 {
        self.rounds_completed
    }

    /// Seat a connection in the free slot.
    pub fn seat(&mut self, connection: ConnectionHandle) -> Result<usize, SessionError> {
        if self.terminated {
            return Err(SessionError::NotFound);
        }
        if self.slot_of(&connection.id()).is_some() {
            return Err(SessionError::AlreadySeated);
        }

        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(SessionError::Full)?;
        self.slots[slot] = Some(Participant::new(connection));
        Ok(slot)
    }

    /// Record the latest payload from a connection.
    ///
    /// Returns `false` if the connection is not seated here.
    pub fn update_payload(&mut self, connection: &ConnectionId, payload: Payload) -> bool {
        if self.terminated {
            return false;
        }
        match self.slot_of(connection) {
            Some(slot) => {
                if let Some(participant) = self.slots[slot].as_mut() {
                    participant.payload = payload;
                }
                true
            }
            None => false,
        }
    }

    /// Start the first round: store the timer token, reset the countdown and
    /// broadcast `game_start`.
    ///
    /// Fails with [`SessionError::NotReady`] unless both slots are filled.
    pub fn start_round(&mut self, timer: CancellationToken) -> Result<(), SessionError> {
        if self.terminated {
            return Err(SessionError::NotFound);
        }
        if !self.is_full() || self.timer.is_some() {
            return Err(SessionError::NotReady);
        }

        self.countdown = self.round_duration;
        self.timer = Some(timer);
        self.broadcast(ServerMessage::GameStart {
            timer: self.countdown,
        });
        Ok(())
    }

    /// Stop the timer and release both participants.
    ///
    /// Returns the connections that were seated. Idempotent.
    pub fn terminate(&mut self) -> Vec<ConnectionId> {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        self.terminated = true;

        self.slots
            .iter_mut()
            .filter_map(|slot| slot.take().map(|p| p.connection.id()))
            .collect()
    }

    /// Send a message to every seated participant.
    pub fn broadcast(&self, message: ServerMessage) {
        if self.terminated {
            return;
        }
        for participant in self.slots.iter().flatten() {
            participant.connection.send(message.clone());
        }
    }

    /// Both participants, if the session is full.
    pub(crate) fn pair_mut(&mut self) -> Option<(&mut Participant, &mut Participant)> {
        let [first, second] = &mut self.slots;
        match (first.as_mut(), second.as_mut()) {
            (Some(a), Some(b)) => Some((a, b)),
            _ => None,
        }
    }
}
