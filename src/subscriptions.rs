//! The subscription registry: identifier-based multiplexing of many logical
//! channel subscriptions over one socket.
//!
//! This is a pure state machine — it never touches a socket. `create`
//! always tells the caller a `subscribe` frame is warranted (every
//! subscriber gets its own, even duplicates of an already-live identifier —
//! the server tracks subscriptions per client message, not per identifier);
//! `remove` is the one that's ref-counted, telling the caller `unsubscribe`
//! is warranted only once the *last* subscriber to an identifier leaves. The
//! caller (the actor in `connection::native`/`connection::wasm`) is the one
//! that actually builds the frame and hands it to the connection. That
//! split is what keeps this module testable without a live socket, the
//! same way `ConnectionMonitor` stays testable without one.

use serde_json::Value;

use crate::identifier::Identifier;
use crate::subscription::{Callbacks, SubscriptionToken};

struct Entry {
    token: SubscriptionToken,
    identifier: Identifier,
    callbacks: Callbacks,
    /// Set once a `confirm_subscription` has arrived for this identifier.
    confirmed: bool,
}

/// Whether the registry wants the caller to emit a `subscribe`/
/// `unsubscribe` frame as a result of the operation just performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireAction {
    None,
    Subscribe,
    Unsubscribe,
}

pub struct Subscriptions {
    entries: Vec<Entry>,
    next_token: u64,
}

impl Default for Subscriptions {
    fn default() -> Self {
        Self::new()
    }
}

impl Subscriptions {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_token: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn mint_token(&mut self) -> SubscriptionToken {
        let token = SubscriptionToken(self.next_token);
        self.next_token += 1;
        token
    }

    fn count_for(&self, identifier: &str) -> usize {
        self.entries.iter().filter(|e| e.identifier == identifier).count()
    }

    /// Register a new subscription. Fires `initialized` immediately.
    /// Returns the token; the caller always sends `subscribe` for it — one
    /// `create` always means one `subscribe` frame, even for an identifier
    /// that already has other live subscribers.
    pub fn create(&mut self, identifier: Identifier, callbacks: Callbacks) -> (SubscriptionToken, WireAction) {
        let token = self.mint_token();
        let action = self.insert(token, identifier, callbacks);
        (token, action)
    }

    /// Like `create`, but for a token minted outside the registry — the
    /// actor mints tokens synchronously from a shared counter so a public
    /// `create_subscription()` call can hand back a `Subscription` handle
    /// before the command to register it has even reached the actor.
    ///
    /// Always returns [`WireAction::Subscribe`] — unlike `remove`, this is
    /// not ref-counted: every `create` gets its own `subscribe` frame,
    /// mirroring `add()` always calling `sendCommand(subscription,
    /// "subscribe")` regardless of how many other subscribers already share
    /// this identifier.
    pub fn insert(&mut self, token: SubscriptionToken, identifier: Identifier, mut callbacks: Callbacks) -> WireAction {
        if let Some(cb) = callbacks.initialized.as_mut() {
            cb();
        }
        self.entries.push(Entry {
            token,
            identifier,
            callbacks,
            confirmed: false,
        });
        WireAction::Subscribe
    }

    /// Drop one subscriber. Returns whether its identifier has no
    /// subscribers left (the caller should send `unsubscribe`).
    pub fn remove(&mut self, token: SubscriptionToken) -> WireAction {
        let Some(pos) = self.entries.iter().position(|e| e.token == token) else {
            return WireAction::None;
        };
        let identifier = self.entries[pos].identifier.clone();
        self.entries.remove(pos);
        if self.count_for(&identifier) == 0 {
            WireAction::Unsubscribe
        } else {
            WireAction::None
        }
    }

    /// Like `remove`, but returns the identifier only when this was the
    /// last subscriber — the caller's cue to actually send `unsubscribe`.
    pub fn remove_and_identifier(&mut self, token: SubscriptionToken) -> Option<Identifier> {
        let Some(pos) = self.entries.iter().position(|e| e.token == token) else {
            return None;
        };
        let identifier = self.entries[pos].identifier.clone();
        self.entries.remove(pos);
        if self.count_for(&identifier) == 0 {
            Some(identifier)
        } else {
            None
        }
    }

    /// Server rejected this identifier outright: notify every subscriber to
    /// it and drop them all. No `unsubscribe` frame is sent — the server
    /// already considers it gone.
    pub fn reject(&mut self, identifier: &str) {
        for entry in self.entries.iter_mut().filter(|e| e.identifier == identifier) {
            if let Some(cb) = entry.callbacks.rejected.as_mut() {
                cb();
            }
        }
        self.entries.retain(|e| e.identifier != identifier);
    }

    /// Mark every subscriber to `identifier` confirmed and fire `connected`.
    pub fn confirm(&mut self, identifier: &str) {
        for entry in self.entries.iter_mut().filter(|e| e.identifier == identifier) {
            entry.confirmed = true;
            if let Some(cb) = entry.callbacks.connected.as_mut() {
                cb();
            }
        }
    }

    /// Deliver an application payload addressed to `identifier`.
    pub fn received(&mut self, identifier: &str, message: Value) {
        for entry in self.entries.iter_mut().filter(|e| e.identifier == identifier) {
            if let Some(cb) = entry.callbacks.received.as_mut() {
                cb(message.clone());
            }
        }
    }

    /// Fire `disconnected` on every live subscription (socket closed),
    /// passing whether the monitor will keep trying to bring it back up.
    pub fn notify_all_disconnected(&mut self, will_attempt_reconnect: bool) {
        for entry in self.entries.iter_mut() {
            entry.confirmed = false;
            if let Some(cb) = entry.callbacks.disconnected.as_mut() {
                cb(will_attempt_reconnect);
            }
        }
    }

    /// One `subscribe` per tracked subscription, in insertion order — not
    /// deduplicated by identifier: two subscribers to the same identifier
    /// both get re-advertised, exactly as they would if `create`d fresh
    /// after this reconnect. Collected into a `Vec` first (rather than
    /// iterated in place) so a callback that mutates the registry
    /// mid-iteration (e.g. unsubscribing from within `connected`) can never
    /// observe a torn iteration.
    pub fn reload(&self) -> Vec<Identifier> {
        self.entries.iter().map(|entry| entry.identifier.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn first_create_for_an_identifier_requests_subscribe() {
        let mut subs = Subscriptions::new();
        let (_, action) = subs.create("a".to_string(), Callbacks::new());
        assert_eq!(action, WireAction::Subscribe);
    }

    #[test]
    fn second_create_for_the_same_identifier_also_requests_subscribe() {
        // Unlike `remove`, `create` isn't ref-counted: the server tracks
        // subscriptions per client message, not per identifier, so a
        // duplicate `create` still needs its own `subscribe` frame.
        let mut subs = Subscriptions::new();
        subs.create("a".to_string(), Callbacks::new());
        let (_, action) = subs.create("a".to_string(), Callbacks::new());
        assert_eq!(action, WireAction::Subscribe);
    }

    #[test]
    fn remove_last_subscriber_requests_unsubscribe() {
        let mut subs = Subscriptions::new();
        let (token, _) = subs.create("a".to_string(), Callbacks::new());
        assert_eq!(subs.remove(token), WireAction::Unsubscribe);
    }

    #[test]
    fn remove_one_of_several_subscribers_keeps_wire_subscription() {
        let mut subs = Subscriptions::new();
        let (t1, _) = subs.create("a".to_string(), Callbacks::new());
        let (_t2, _) = subs.create("a".to_string(), Callbacks::new());
        assert_eq!(subs.remove(t1), WireAction::None);
        assert_eq!(subs.count_for("a"), 1);
    }

    #[test]
    fn removing_unknown_token_is_a_noop() {
        let mut subs = Subscriptions::new();
        assert_eq!(subs.remove(SubscriptionToken(999)), WireAction::None);
    }

    #[test]
    fn create_fires_initialized_synchronously() {
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let f = fired.clone();
        let callbacks = Callbacks::new().on_initialized(move || f.store(true, std::sync::atomic::Ordering::SeqCst));
        let mut subs = Subscriptions::new();
        subs.create("a".to_string(), callbacks);
        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn confirm_fires_connected_for_every_subscriber_to_that_identifier() {
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut subs = Subscriptions::new();
        for _ in 0..3 {
            let c = count.clone();
            subs.create("a".to_string(), Callbacks::new().on_connected(move || {
                c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }));
        }
        subs.create("b".to_string(), Callbacks::new());
        subs.confirm("a");
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[test]
    fn reject_fires_rejected_and_drops_entries() {
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let f = fired.clone();
        let mut subs = Subscriptions::new();
        subs.create("a".to_string(), Callbacks::new().on_rejected(move || f.store(true, std::sync::atomic::Ordering::SeqCst)));
        subs.reject("a");
        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(subs.len(), 0);
    }

    #[test]
    fn received_routes_only_to_matching_identifier() {
        let got = Arc::new(std::sync::Mutex::new(Vec::new()));
        let g1 = got.clone();
        let g2 = got.clone();
        let mut subs = Subscriptions::new();
        subs.create("a".to_string(), Callbacks::new().on_received(move |v| g1.lock().unwrap().push(v)));
        subs.create("b".to_string(), Callbacks::new().on_received(move |v| g2.lock().unwrap().push(v)));
        subs.received("a", serde_json::json!({"x": 1}));
        assert_eq!(got.lock().unwrap().len(), 1);
    }

    #[test]
    fn notify_all_disconnected_unconfirms_and_fires_every_entry() {
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut subs = Subscriptions::new();
        for id in ["a", "b"] {
            let c = count.clone();
            subs.create(
                id.to_string(),
                Callbacks::new().on_disconnected(move |_will_attempt_reconnect| {
                    c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                }),
            );
        }
        subs.confirm("a");
        subs.notify_all_disconnected(true);
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn notify_all_disconnected_passes_will_attempt_reconnect_through() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let s = seen.clone();
        let mut subs = Subscriptions::new();
        subs.create(
            "a".to_string(),
            Callbacks::new().on_disconnected(move |will_attempt_reconnect| {
                s.lock().unwrap().push(will_attempt_reconnect);
            }),
        );
        subs.notify_all_disconnected(true);
        subs.notify_all_disconnected(false);
        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn reload_lists_every_subscriber_including_duplicates() {
        let mut subs = Subscriptions::new();
        subs.create("a".to_string(), Callbacks::new());
        subs.create("a".to_string(), Callbacks::new());
        subs.create("b".to_string(), Callbacks::new());
        let mut ids = subs.reload();
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "a".to_string(), "b".to_string()]);
    }
}
