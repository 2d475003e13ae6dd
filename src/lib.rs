//! # CodeSwap Server
//!
//! Pairs two editor clients into a timed session and periodically swaps the
//! code each of them is working on.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CODESWAP SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  swap/           - Session state (no I/O)                    │
//! │  ├── state.rs    - Sessions, slots and captured payloads     │
//! │  └── round.rs    - Countdown tick and payload exchange       │
//! │                                                              │
//! │  network/        - Networking                                │
//! │  ├── protocol.rs - Message types                             │
//! │  ├── connection.rs - Connection handles and registry         │
//! │  ├── session.rs  - Session registry and round timers         │
//! │  └── server.rs   - HTTP/WebSocket gateway                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rounds
//!
//! Once both slots of a session are filled, a timer counts down from
//! [`ROUND_DURATION_SECS`] once per second. At [`SWAP_WARNING_SECS`] both
//! players get a warning; at zero their latest payloads are exchanged and the
//! countdown starts over. The session lives until either player disconnects.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod network;
pub mod swap;

// Re-export commonly used types
pub use network::{
    ClientMessage, ConnectionHandle, ConnectionId, ServerConfig, ServerMessage, SessionConfig,
    SessionError, SessionManager, SwapServer,
};
pub use swap::state::{Payload, SessionId, SessionState, SwapSession};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Length of one round in seconds.
pub const ROUND_DURATION_SECS: u32 = 300;

/// Countdown value at which players are warned of the coming swap.
pub const SWAP_WARNING_SECS: u32 = 30;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 8080;
