//! The value bundle handed back by `Subscriptions::create` — an identifier
//! plus the optional callbacks a caller wants invoked as server frames
//! arrive for it, and a thin handle for sending commands back out.

use serde_json::Value;
use std::sync::Arc;

use crate::identifier::Identifier;
use crate::protocol::Command;

/// Opaque token identifying one `create()` call, distinct from the wire
/// `Identifier` so that two subscriptions with identical params (and thus
/// identical wire identifiers) still get their own callbacks and their own
/// independent `unsubscribe()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionToken(pub(crate) u64);

/// Callbacks a caller registers on `create()`. All optional; an absent
/// callback is simply not invoked.
#[derive(Default)]
pub struct Callbacks {
    pub initialized: Option<Box<dyn FnMut() + Send>>,
    pub connected: Option<Box<dyn FnMut() + Send>>,
    /// Called with `willAttemptReconnect`: whether the `ConnectionMonitor`
    /// is still running (and will therefore try to bring the socket back up
    /// on its own) at the moment this disconnect fired.
    pub disconnected: Option<Box<dyn FnMut(bool) + Send>>,
    pub rejected: Option<Box<dyn FnMut() + Send>>,
    pub received: Option<Box<dyn FnMut(Value) + Send>>,
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("initialized", &self.initialized.is_some())
            .field("connected", &self.connected.is_some())
            .field("disconnected", &self.disconnected.is_some())
            .field("rejected", &self.rejected.is_some())
            .field("received", &self.received.is_some())
            .finish()
    }
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_initialized(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.initialized = Some(Box::new(f));
        self
    }

    pub fn on_connected(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.connected = Some(Box::new(f));
        self
    }

    pub fn on_disconnected(mut self, f: impl FnMut(bool) + Send + 'static) -> Self {
        self.disconnected = Some(Box::new(f));
        self
    }

    pub fn on_rejected(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.rejected = Some(Box::new(f));
        self
    }

    pub fn on_received(mut self, f: impl FnMut(Value) + Send + 'static) -> Self {
        self.received = Some(Box::new(f));
        self
    }
}

/// Sends a subscription-scoped command out over the wire. Implemented by
/// whatever owns the live connection (the native actor, the wasm bridge);
/// kept as a trait so this module and `subscriptions.rs` never need to know
/// which transport backs them.
pub trait SubscriptionTransport: Send + Sync {
    /// Best-effort send; `false` if there was nowhere to send it (socket
    /// not open). Mirrors `Connection::send`'s own contract.
    fn send_command(&self, identifier: &Identifier, command: Command, data: Option<Value>) -> bool;

    /// Tell the registry this handle is going away.
    fn forget(&self, token: SubscriptionToken);
}

/// A live subscription handle. Cheap to clone; all clones refer to the same
/// underlying registry entry.
#[derive(Clone)]
pub struct Subscription {
    pub(crate) token: SubscriptionToken,
    identifier: Identifier,
    transport: Arc<dyn SubscriptionTransport>,
}

impl Subscription {
    pub(crate) fn new(
        token: SubscriptionToken,
        identifier: Identifier,
        transport: Arc<dyn SubscriptionTransport>,
    ) -> Self {
        Self {
            token,
            identifier,
            transport,
        }
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    pub fn token(&self) -> SubscriptionToken {
        self.token
    }

    /// Send an application-defined payload over this subscription's channel.
    pub fn send(&self, data: Value) -> bool {
        self.transport
            .send_command(&self.identifier, Command::Message, Some(data))
    }

    /// Invoke a named server-side action, merging `action` into `data`.
    pub fn perform(&self, action: &str, mut data: Value) -> bool {
        if let Value::Object(ref mut map) = data {
            map.insert("action".to_string(), Value::String(action.to_string()));
        } else {
            data = serde_json::json!({ "action": action });
        }
        self.send(data)
    }

    /// Unsubscribe. Best-effort like every other wire operation: the
    /// registry entry is always dropped locally, even if the socket wasn't
    /// open to carry the `unsubscribe` command.
    pub fn unsubscribe(&self) {
        self.transport.forget(self.token);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("token", &self.token)
            .field("identifier", &self.identifier)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct RecordingTransport {
        sent: Mutex<Vec<(Identifier, Option<Value>)>>,
        forgotten: AtomicUsize,
        open: bool,
    }

    impl SubscriptionTransport for RecordingTransport {
        fn send_command(&self, identifier: &Identifier, _command: Command, data: Option<Value>) -> bool {
            self.sent.lock().unwrap().push((identifier.clone(), data));
            self.open
        }

        fn forget(&self, _token: SubscriptionToken) {
            self.forgotten.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn send_returns_transport_result() {
        let transport = Arc::new(RecordingTransport {
            sent: Mutex::new(Vec::new()),
            forgotten: AtomicUsize::new(0),
            open: true,
        });
        let sub = Subscription::new(SubscriptionToken(1), "chat".to_string(), transport.clone());
        assert!(sub.send(serde_json::json!({"body": "hi"})));
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn send_returns_false_when_transport_is_closed() {
        let transport = Arc::new(RecordingTransport {
            sent: Mutex::new(Vec::new()),
            forgotten: AtomicUsize::new(0),
            open: false,
        });
        let sub = Subscription::new(SubscriptionToken(1), "chat".to_string(), transport);
        assert!(!sub.send(serde_json::json!({})));
    }

    #[test]
    fn perform_merges_action_into_object_payload() {
        let transport = Arc::new(RecordingTransport {
            sent: Mutex::new(Vec::new()),
            forgotten: AtomicUsize::new(0),
            open: true,
        });
        let sub = Subscription::new(SubscriptionToken(1), "chat".to_string(), transport.clone());
        sub.perform("speak", serde_json::json!({"body": "hi"}));
        let sent = transport.sent.lock().unwrap();
        let (_, data) = &sent[0];
        let data = data.as_ref().unwrap();
        assert_eq!(data["action"], "speak");
        assert_eq!(data["body"], "hi");
    }

    #[test]
    fn unsubscribe_forgets_the_token() {
        let transport = Arc::new(RecordingTransport {
            sent: Mutex::new(Vec::new()),
            forgotten: AtomicUsize::new(0),
            open: true,
        });
        let sub = Subscription::new(SubscriptionToken(7), "chat".to_string(), transport.clone());
        sub.unsubscribe();
        assert_eq!(transport.forgotten.load(Ordering::SeqCst), 1);
    }
}
