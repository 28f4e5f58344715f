//! WebSocket Session Management
//!
//! This module contains the logic for tutoring sessions over WebSockets:
//!
//! - `protocol`: The JSON frame format for client-server communication.
//! - `handler`: The per-connection state machine (unbound or bound to a session).
//! - `cycle`: The turn-completion protocol run for each user turn.
//! - `session`: The connection lifecycle, from upgrade to close.

mod cycle;
pub mod handler;
pub mod protocol;
pub mod session;

pub use session::ws_handler;
