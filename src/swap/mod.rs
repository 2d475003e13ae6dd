//! Session state and round logic.
//!
//! Nothing in this module touches sockets or timers. A [`state::SwapSession`]
//! is driven from outside: the registry seats participants and records
//! payloads, and the round timer calls [`round::tick`] once per second.

pub mod round;
pub mod state;

pub use round::{perform_swap, tick, SwapOutcome, TickResult};
pub use state::{Participant, Payload, SessionId, SessionState, SwapSession, SLOT_COUNT};
