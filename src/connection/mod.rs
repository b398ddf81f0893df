//! The WebSocket-wrapping connection FSM.
//!
//! The actual transport is compile-time dispatched, same split as the
//! teacher's `ws` module:
//! - `ws-native` → `tokio-tungstenite`, a background tokio task (`native.rs`)
//! - `ws-wasm` → `web-sys::WebSocket`, thread-local closures (`wasm.rs`)
//!
//! Both expose a `Connection` type with the same readiness vocabulary and
//! operations.

#[cfg(feature = "ws-native")]
pub mod native;

#[cfg(feature = "ws-wasm")]
pub mod wasm;

#[cfg(feature = "ws-native")]
pub use native::Connection;

#[cfg(all(feature = "ws-wasm", not(feature = "ws-native")))]
pub use wasm::Connection;

use std::time::Duration;

/// Fixed delay `reopen()` waits between closing and reopening, regardless
/// of whether the close it preempted succeeded, failed, or was a no-op.
pub const REOPEN_DELAY: Duration = Duration::from_millis(500);

/// The connection's readiness, mirroring the W3C WebSocket `readyState`
/// vocabulary the wire protocol itself is built on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl From<u8> for ReadyState {
    fn from(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_state_round_trips_through_u8() {
        assert_eq!(ReadyState::from(0), ReadyState::Connecting);
        assert_eq!(ReadyState::from(1), ReadyState::Open);
        assert_eq!(ReadyState::from(2), ReadyState::Closing);
        assert_eq!(ReadyState::from(3), ReadyState::Closed);
        assert_eq!(ReadyState::from(200), ReadyState::Closed);
    }
}
