//! WebSocket Session Relay
//!
//! This module contains the bridge between one browser connection and one
//! vendor connection. It is structured into submodules for clarity:
//!
//! - `protocol`: the JSON message vocabulary spoken with the browser.
//! - `vendor`: the vendor-facing vocabulary and upstream dialing.
//! - `session`: the per-session coordinator loop that owns both sockets.

pub mod protocol;
pub mod session;
pub mod vendor;

pub use session::ws_handler;
