//! Voicebridge Relay Library Crate
//!
//! This library contains all the core logic for the voice session relay:
//! configuration, shared state, the health/status HTTP surface, and the
//! WebSocket bridge that pairs one browser connection with one vendor
//! connection. The `bin/relay.rs` binary is a thin wrapper around this
//! library.

pub mod config;
pub mod handlers;
pub mod router;
pub mod state;
pub mod ws;
