//! Shared Application State
//!
//! This module defines the `AppState` struct, created once at startup and
//! passed to every handler. Session tracking is an explicit part of this
//! context rather than module-level mutable state, so the open-session count
//! stays well-defined under concurrent connection bursts.

use crate::config::Config;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// The shared application state. All fields are public to be accessible
/// from other modules.
pub struct AppState {
    pub config: Arc<Config>,
    pub started_at: Instant,
    open_sessions: AtomicUsize,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            started_at: Instant::now(),
            open_sessions: AtomicUsize::new(0),
        }
    }

    /// Number of sessions currently in the `Open` state.
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::Relaxed)
    }

    /// Seconds since the server started.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Registers an open session. The returned guard decrements the counter
    /// when dropped, so the count balances on every exit path, error paths
    /// included.
    pub fn track_session(self: &Arc<Self>) -> SessionGuard {
        self.open_sessions.fetch_add(1, Ordering::Relaxed);
        SessionGuard {
            state: Arc::clone(self),
        }
    }
}

/// RAII guard pairing one increment of the open-session counter with
/// exactly one decrement.
pub struct SessionGuard {
    state: Arc<AppState>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.state.open_sessions.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState::new(Config {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            vendor_api_key: "test-vendor-key".to_string(),
            vendor_agent_id: "agent-1234".to_string(),
            vendor_ws_url: None,
            log_level: Level::INFO,
        }))
    }

    #[test]
    fn session_guard_balances_counter() {
        let state = test_state();
        assert_eq!(state.open_sessions(), 0);

        let a = state.track_session();
        let b = state.track_session();
        assert_eq!(state.open_sessions(), 2);

        drop(a);
        assert_eq!(state.open_sessions(), 1);
        drop(b);
        assert_eq!(state.open_sessions(), 0);
    }
}
