//! Crate-wide error types.
//!
//! The protocol is designed to recover locally and never raise to
//! application code: a send attempted while the socket is closed just
//! returns `false`, a rejected subscription just fires a callback.
//! `CableError` exists for the handful of operations that have no such
//! local recovery path.

use thiserror::Error;

/// Top-level error for fallible operations that can't just return a `bool`.
#[derive(Error, Debug)]
pub enum CableError {
    #[error("websocket error: {0}")]
    Ws(#[from] WsError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Other(String),
}

/// WebSocket transport errors.
#[derive(Error, Debug)]
pub enum WsError {
    #[error("not connected")]
    NotConnected,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("unsupported subprotocol negotiated: {0}")]
    UnsupportedProtocol(String),
}

/// Errors surfaced by a `ConfigSource` lookup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no config value named {0:?}")]
    NotFound(String),

    #[error("config lookup unavailable in this environment: {0}")]
    Unavailable(String),
}
