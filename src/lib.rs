//! A client for ActionCable-style multiplexed pub/sub over a single
//! WebSocket: one socket, many logical channel subscriptions, automatic
//! reconnection with backoff, and a liveness monitor that notices a
//! silently dropped connection even when the underlying transport never
//! tells you.
//!
//! ## Architecture
//!
//! - [`network`] / [`identifier`] / [`protocol`] — wire-level constants,
//!   canonical subscription identifiers, and the JSON frame shapes.
//! - [`connection_monitor`] — the liveness/reconnect state machine, pure
//!   and transport-agnostic.
//! - [`subscription`] / [`subscriptions`] — a single subscription handle,
//!   and the registry that multiplexes many of them by identifier.
//! - [`connection`] — the WebSocket-owning FSM, compile-time dispatched
//!   between `ws-native` (`tokio-tungstenite`, a background actor task)
//!   and `ws-wasm` (`web_sys::WebSocket`, DOM event closures).
//! - [`consumer`] — the application-facing facade: URL resolution,
//!   connection lifecycle, and subscription creation.
//! - [`config`] / [`url`] / [`visibility`] — the dependency-injection
//!   seams for the handful of things that differ between a native binary
//!   and a page running in a browser.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use cable::consumer::Consumer;
//! use cable::subscription::Callbacks;
//!
//! let consumer = Consumer::new("wss://example.com/cable");
//! let room = consumer.subscribe_to_channel(
//!     "Room",
//!     Callbacks::new()
//!         .on_connected(|| println!("joined"))
//!         .on_received(|msg| println!("got {msg}")),
//! );
//! room.perform("speak", serde_json::json!({"body": "hi"}));
//! ```

pub mod config;
pub mod connection;
pub mod connection_monitor;
pub mod consumer;
pub mod error;
pub mod identifier;
pub mod network;
pub mod protocol;
pub mod subscription;
pub mod subscriptions;
pub mod url;
pub mod visibility;

pub mod prelude {
    pub use crate::config::{ConfigSource, NullConfigSource, StaticConfigSource};
    pub use crate::connection::{Connection, ReadyState};
    pub use crate::connection_monitor::ConnectionMonitor;
    pub use crate::consumer::Consumer;
    pub use crate::error::{CableError, ConfigError, WsError};
    pub use crate::identifier::{channel_params, encode, Identifier};
    pub use crate::network::{is_protocol_supported, DEFAULT_PATH};
    pub use crate::protocol::{Command, DisconnectReason, FrameKind, IncomingFrame, OutgoingFrame};
    pub use crate::subscription::{Callbacks, Subscription, SubscriptionToken};
    pub use crate::url::UrlSource;
    pub use crate::visibility::{ManualVisibilitySource, NullVisibilitySource, Visibility, VisibilitySource};
}
