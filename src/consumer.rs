//! The application-facing facade: holds the URL, hands out subscriptions,
//! and forwards the connection lifecycle operations.
//!
//! Mirrors `createConsumer(url?)` plus the `Consumer` instance methods;
//! `subscriptions.create(channelNameOrParams, mixin)` becomes
//! [`Consumer::subscribe`]/[`Consumer::subscribe_to_channel`] here since this
//! crate doesn't need a separate `Subscriptions`-the-collection-object
//! distinct from `Connection`'s own registry.

use std::sync::Arc;

use serde_json::Value;

use crate::config::ConfigSource;
use crate::connection::Connection;
use crate::error::{CableError, ConfigError};
use crate::identifier::{channel_params, encode};
use crate::network::DEFAULT_PATH;
use crate::protocol::OutgoingFrame;
use crate::subscription::{Callbacks, Subscription};
use crate::url::UrlSource;

pub struct Consumer {
    connection: Arc<Connection>,
}

impl Consumer {
    pub fn new(url: impl Into<UrlSource>) -> Self {
        Self {
            connection: Arc::new(Connection::new(url)),
        }
    }

    /// `createConsumer(url?)`: an explicit URL wins; otherwise fall back to
    /// `config.get("url")`; otherwise the bare default mount path.
    ///
    /// A config source reporting `NotFound` is the expected "nothing
    /// configured" case and falls through to [`DEFAULT_PATH`] same as a
    /// missing `url` argument. `Unavailable` means the config backend
    /// itself isn't functioning (no `Document` in this environment, no
    /// env/file backing installed) rather than "this key has no value", so
    /// it's surfaced instead of silently substituting a default that's
    /// unlikely to be right.
    pub fn create(url: Option<impl Into<UrlSource>>, config: Arc<dyn ConfigSource>) -> Result<Self, CableError> {
        let resolved: UrlSource = match url {
            Some(u) => u.into(),
            None => match config.get("url") {
                Ok(u) => u.into(),
                Err(ConfigError::NotFound(_)) => DEFAULT_PATH.into(),
                Err(err @ ConfigError::Unavailable(_)) => return Err(CableError::Config(err)),
            },
        };
        Ok(Self::new(resolved))
    }

    /// = `connection.open()`.
    pub fn connect(&self) -> bool {
        self.connection.open()
    }

    /// = `connection.close({allowReconnect: false})`.
    pub fn disconnect(&self) -> bool {
        self.connection.close()
    }

    /// Open the socket only if it isn't already connecting or open.
    pub fn ensure_active_connection(&self) -> bool {
        if self.connection.is_active() {
            return true;
        }
        self.connection.open()
    }

    /// Best-effort send over the raw connection, bypassing any particular
    /// subscription's identifier framing.
    pub fn send(&self, frame: OutgoingFrame) -> bool {
        self.connection.send(frame)
    }

    /// `subscriptions.create({channel, ...params}, mixin)`.
    pub fn subscribe(&self, params: Value, callbacks: Callbacks) -> Subscription {
        self.ensure_active_connection();
        self.connection.create_subscription(encode(&params), callbacks)
    }

    /// `subscriptions.create(channelName, mixin)` — the bare-name overload.
    pub fn subscribe_to_channel(&self, channel: &str, callbacks: Callbacks) -> Subscription {
        self.subscribe(channel_params(channel), callbacks)
    }
}

impl Clone for Consumer {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NullConfigSource, StaticConfigSource};

    #[tokio::test]
    async fn create_with_explicit_url_ignores_config() {
        let consumer = Consumer::create(Some("ws://example.com/cable"), Arc::new(NullConfigSource)).unwrap();
        assert!(!consumer.connection.is_active());
    }

    #[tokio::test]
    async fn create_falls_back_to_config_url() {
        let config = StaticConfigSource::new().with("url", "ws://configured.example.com/cable");
        let consumer = Consumer::create(None::<String>, Arc::new(config)).unwrap();
        assert!(!consumer.connection.is_active());
    }

    #[tokio::test]
    async fn create_falls_back_to_default_path_when_config_has_nothing() {
        let consumer = Consumer::create(None::<String>, Arc::new(NullConfigSource));
        assert!(consumer.is_ok());
    }

    #[tokio::test]
    async fn create_surfaces_unavailable_config_as_an_error() {
        struct BrokenConfig;
        impl ConfigSource for BrokenConfig {
            fn get(&self, _name: &str) -> Result<String, ConfigError> {
                Err(ConfigError::Unavailable("no document in this environment".to_string()))
            }
        }
        let result = Consumer::create(None::<String>, Arc::new(BrokenConfig));
        assert!(matches!(result, Err(CableError::Config(ConfigError::Unavailable(_)))));
    }

    #[tokio::test]
    async fn send_on_a_fresh_consumer_returns_false() {
        let consumer = Consumer::new("ws://127.0.0.1:1/cable");
        assert!(!consumer.send(OutgoingFrame::subscribe("{}".to_string())));
    }

    #[tokio::test]
    async fn subscribe_to_channel_uses_canonical_channel_identifier() {
        let consumer = Consumer::new("ws://127.0.0.1:1/cable");
        let sub = consumer.subscribe_to_channel("Room", Callbacks::new());
        assert_eq!(sub.identifier(), r#"{"channel":"Room"}"#);
    }
}
