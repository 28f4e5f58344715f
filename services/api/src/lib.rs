//! Tutor Relay API Library Crate
//!
//! This library contains all the logic for the tutoring relay web service:
//! configuration, the shared application state, the REST handlers, the
//! WebSocket session protocol, and routing. The `api` binary is a thin
//! wrapper around this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
