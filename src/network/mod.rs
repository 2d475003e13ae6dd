//! Network Layer
//!
//! WebSocket gateway, wire protocol and the session registry that the
//! gateway dispatches into.

pub mod connection;
pub mod protocol;
pub mod server;
pub mod session;

pub use connection::{ConnectionHandle, ConnectionId, ConnectionRegistry};
pub use protocol::{ClientMessage, FrameError, PayloadUpdate, ServerMessage, SwapSender, SwappedCode};
pub use server::{ServerConfig, ServerError, SwapServer, HEALTH_BODY};
pub use session::{SessionConfig, SessionError, SessionManager};
