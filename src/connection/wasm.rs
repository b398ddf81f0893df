//! WASM transport — `web_sys::WebSocket` driven synchronously from
//! closures, no background task.
//!
//! WASM has no multi-threaded executor to run the native transport's
//! actor task on, so this mirrors the teacher's `ws/wasm.rs`: DOM event
//! closures mutate shared state directly and call back synchronously into
//! `Subscriptions`/`ConnectionMonitor`, which is the same "single logical
//! task, no preemption mid-dispatch" model `run_actor` gives the native
//! transport by construction — there just isn't a second thread for it to
//! race against in the first place.
//!
//! State lives in an `Rc<RefCell<_>>` rather than the teacher's
//! `thread_local!` statics so more than one `Connection` can coexist in a
//! module (mirroring the native actor's one-task-per-instance design).
//! WASM's single thread means this needs no locking beyond the
//! `RefCell`'s own borrow check.
//!
//! **Handler hygiene** (Design Note "Bound-method handlers and handler
//! replacement"): every closure captures the `generation` it was installed
//! under and compares it against the shared state's current generation
//! before acting, so a late-firing event from a socket `reopen()` has
//! already superseded is silently dropped instead of re-entering state
//! that now belongs to a different socket.

use std::cell::RefCell;
use std::rc::Rc;

use gloo_timers::callback::Timeout;
use serde_json::Value;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{CloseEvent, ErrorEvent, MessageEvent, WebSocket};
use web_time::Instant;

use crate::connection::{ReadyState, REOPEN_DELAY};
use crate::connection_monitor::{ConnectionMonitor, PollAction, VISIBILITY_DEBOUNCE};
use crate::identifier::Identifier;
use crate::network::{is_protocol_supported, SUBPROTOCOLS};
use crate::protocol::{Command as WireCommand, FrameKind, IncomingFrame, OutgoingFrame};
use crate::subscription::{Callbacks, Subscription, SubscriptionToken, SubscriptionTransport};
use crate::subscriptions::{Subscriptions, WireAction};
use crate::url::UrlSource;
use crate::visibility::{NullVisibilitySource, Visibility};

struct State {
    url: UrlSource,
    ws: Option<WebSocket>,
    generation: u64,
    monitor: ConnectionMonitor,
    subscriptions: Subscriptions,
    next_token: u64,
    poll_timeout: Option<Timeout>,
    reopen_timeout: Option<Timeout>,
    visibility_debounce: Option<Timeout>,
}

impl State {
    fn ready_state(&self) -> ReadyState {
        match &self.ws {
            Some(ws) => ReadyState::from(ws.ready_state() as u8),
            None => ReadyState::Closed,
        }
    }

    fn is_active(&self) -> bool {
        matches!(self.ready_state(), ReadyState::Open | ReadyState::Connecting)
    }
}

/// A live connection to the server. `!Send`/`!Sync` — WASM is
/// single-threaded, so this can only ever be used from the thread it was
/// created on (the only thread there is).
#[derive(Clone)]
pub struct Connection {
    inner: Rc<RefCell<State>>,
}

struct SharedTransport {
    inner: Rc<RefCell<State>>,
}

impl SubscriptionTransport for SharedTransport {
    fn send_command(&self, identifier: &Identifier, command: WireCommand, data: Option<Value>) -> bool {
        let frame = match command {
            WireCommand::Message => OutgoingFrame::message(identifier.clone(), &data.unwrap_or(Value::Null)),
            WireCommand::Subscribe => OutgoingFrame::subscribe(identifier.clone()),
            WireCommand::Unsubscribe => OutgoingFrame::unsubscribe(identifier.clone()),
        };
        send_frame(&self.inner, &frame)
    }

    fn forget(&self, token: SubscriptionToken) {
        let identifier = self.inner.borrow_mut().subscriptions.remove_and_identifier(token);
        if let Some(identifier) = identifier {
            send_frame(&self.inner, &OutgoingFrame::unsubscribe(identifier));
        }
    }
}

// `SubscriptionTransport` requires `Send + Sync` so one `Callbacks`/
// `Subscription` type serves both transports; WASM has no real threads so
// this is a sound, if slightly fictional, promise — nothing here is ever
// touched from a second OS thread.
unsafe impl Send for SharedTransport {}
unsafe impl Sync for SharedTransport {}

impl Connection {
    pub fn new(url: impl Into<UrlSource>) -> Self {
        Self::with_visibility_source(url, Rc::new(dom::DomLocalVisibilitySource))
    }

    pub fn with_visibility_source(url: impl Into<UrlSource>, visibility_source: Rc<dyn LocalVisibilitySource>) -> Self {
        // The monitor's own channel-based visibility source is left at its
        // inert default: on this backend the DOM signal arrives through
        // `LocalVisibilitySource` below instead, since there is no executor
        // here to poll an `mpsc::UnboundedReceiver` on.
        let state = State {
            url: url.into(),
            ws: None,
            generation: 0,
            monitor: ConnectionMonitor::new(std::sync::Arc::new(NullVisibilitySource)),
            subscriptions: Subscriptions::new(),
            next_token: 0,
            poll_timeout: None,
            reopen_timeout: None,
            visibility_debounce: None,
        };
        let conn = Self { inner: Rc::new(RefCell::new(state)) };
        watch_visibility(conn.clone(), visibility_source);
        conn
    }

    pub fn ready_state(&self) -> ReadyState {
        self.inner.borrow().ready_state()
    }

    pub fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    pub fn is_active(&self) -> bool {
        self.inner.borrow().is_active()
    }

    pub fn get_protocol(&self) -> Option<String> {
        self.inner.borrow().ws.as_ref().map(|ws| ws.protocol())
    }

    pub fn is_protocol_supported(&self) -> bool {
        self.get_protocol().as_deref().map(is_protocol_supported).unwrap_or(false)
    }

    /// Idempotent: a no-op if already connecting or open.
    pub fn open(&self) -> bool {
        if self.inner.borrow().is_active() {
            tracing::debug!("open() called while already active, ignoring");
            return false;
        }
        self.do_open();
        true
    }

    fn do_open(&self) {
        let generation = {
            let mut state = self.inner.borrow_mut();
            detach_old_socket(&mut state);
            state.generation += 1;
            state.monitor.start(Instant::now());
            state.generation
        };

        let resolved = self.inner.borrow().url.resolve();
        let protocols: js_sys::Array = SUBPROTOCOLS.iter().map(|p| JsValue::from_str(p)).collect();
        let ws = match WebSocket::new_with_str_sequence(&resolved, &protocols) {
            Ok(ws) => ws,
            Err(err) => {
                tracing::warn!(?err, "failed to construct websocket");
                schedule_reopen(self.clone());
                return;
            }
        };
        install_handlers(self.clone(), ws.clone(), generation);
        self.inner.borrow_mut().ws = Some(ws);
    }

    /// Best-effort close. Returns `false` only if already closed. Permanent:
    /// stops the monitor, so no automatic reopen follows.
    pub fn close(&self) -> bool {
        self.close_internal(false)
    }

    fn close_internal(&self, allow_reconnect: bool) -> bool {
        let mut state = self.inner.borrow_mut();
        if !state.is_active() {
            return false;
        }
        if !allow_reconnect {
            state.monitor.stop(Instant::now());
        }
        if let Some(ws) = &state.ws {
            let _ = ws.close();
        }
        true
    }

    /// Close (best-effort) without stopping the monitor, then unconditionally
    /// reopen after [`REOPEN_DELAY`] regardless of how the close went.
    pub fn reopen(&self) {
        self.close_internal(true);
        schedule_reopen(self.clone());
    }

    /// Best-effort send; `false` if the socket isn't open right now.
    pub fn send(&self, frame: OutgoingFrame) -> bool {
        send_frame(&self.inner, &frame)
    }

    pub fn create_subscription(&self, identifier: Identifier, callbacks: Callbacks) -> Subscription {
        let token = {
            let mut state = self.inner.borrow_mut();
            let token = SubscriptionToken(state.next_token);
            state.next_token += 1;
            let action = state.subscriptions.insert(token, identifier.clone(), callbacks);
            if action == WireAction::Subscribe {
                drop(state);
                send_frame(&self.inner, &OutgoingFrame::subscribe(identifier.clone()));
            }
            token
        };
        // `Subscription` wants `Arc<dyn SubscriptionTransport>` so one
        // `Subscription` type serves both transports; `SharedTransport`'s
        // `unsafe impl Send + Sync` above is what makes that sound here.
        let transport: std::sync::Arc<dyn SubscriptionTransport> =
            std::sync::Arc::new(SharedTransport { inner: self.inner.clone() });
        Subscription::new(token, identifier, transport)
    }
}

fn send_frame(inner: &Rc<RefCell<State>>, frame: &OutgoingFrame) -> bool {
    let state = inner.borrow();
    match &state.ws {
        Some(ws) if state.ready_state() == ReadyState::Open => ws.send_with_str(&frame.to_string()).is_ok(),
        _ => false,
    }
}

fn detach_old_socket(state: &mut State) {
    if let Some(ws) = state.ws.take() {
        ws.set_onopen(None);
        ws.set_onmessage(None);
        ws.set_onerror(None);
        ws.set_onclose(None);
        let _ = ws.close();
    }
    state.poll_timeout = None;
}

fn schedule_reopen(conn: Connection) {
    let timeout = Timeout::new(REOPEN_DELAY.as_millis() as u32, move || {
        conn.open();
    });
    conn_store_reopen_timeout(&conn, timeout);
}

fn conn_store_reopen_timeout(conn: &Connection, timeout: Timeout) {
    conn.inner.borrow_mut().reopen_timeout = Some(timeout);
}

fn install_handlers(conn: Connection, ws: WebSocket, generation: u64) {
    let onopen = {
        let conn = conn.clone();
        Closure::<dyn FnMut()>::new(move || {
            if !conn.current_generation_is(generation) {
                return;
            }
            on_open(&conn, generation);
        })
    };
    ws.set_onopen(Some(onopen.as_ref().unchecked_ref()));
    onopen.forget();

    let onmessage = {
        let conn = conn.clone();
        Closure::<dyn FnMut(_)>::new(move |e: MessageEvent| {
            if !conn.current_generation_is(generation) {
                return;
            }
            if let Some(text) = e.data().as_string() {
                on_message(&conn, &text);
            }
        })
    };
    ws.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
    onmessage.forget();

    let onerror = Closure::<dyn FnMut(_)>::new(move |e: ErrorEvent| {
        tracing::warn!(message = %e.message(), "websocket error event");
    });
    ws.set_onerror(Some(onerror.as_ref().unchecked_ref()));
    onerror.forget();

    let onclose = {
        let conn = conn.clone();
        Closure::<dyn FnMut(_)>::new(move |_e: CloseEvent| {
            if !conn.current_generation_is(generation) {
                return;
            }
            on_close(&conn);
        })
    };
    ws.set_onclose(Some(onclose.as_ref().unchecked_ref()));
    onclose.forget();
}

impl Connection {
    fn current_generation_is(&self, generation: u64) -> bool {
        self.inner.borrow().generation == generation
    }

    fn arm_poll_timer(&self) {
        let interval = self.inner.borrow().monitor.poll_interval();
        let conn = self.clone();
        let timeout = Timeout::new(interval.as_millis() as u32, move || {
            conn.on_poll_tick();
        });
        self.inner.borrow_mut().poll_timeout = Some(timeout);
    }

    fn on_poll_tick(&self) {
        let action = {
            let mut state = self.inner.borrow_mut();
            if !state.is_active() && state.ws.is_none() {
                return;
            }
            state.monitor.reconnect_if_stale(Instant::now())
        };
        if action == PollAction::Reopen {
            self.reopen();
        } else {
            self.arm_poll_timer();
        }
    }
}

fn on_open(conn: &Connection, _generation: u64) {
    tracing::debug!("websocket opened");
    conn.arm_poll_timer();
    // `welcome` fires `connected`, not the raw open — matching the native
    // transport and the spec's "do not notify subscriptions of a connect
    // here" instruction.
    let unsupported = !conn.is_protocol_supported() && conn.get_protocol().is_some();
    if unsupported {
        tracing::warn!(protocol = ?conn.get_protocol(), "server negotiated an unsupported subprotocol; closing");
        conn.close();
    }
}

fn on_message(conn: &Connection, text: &str) {
    let frame: IncomingFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(err) => {
            tracing::warn!(?err, raw = text, "failed to parse inbound frame");
            return;
        }
    };

    if !conn.is_protocol_supported() {
        return;
    }

    match frame.kind() {
        FrameKind::Welcome => {
            let identifiers = {
                let mut state = conn.inner.borrow_mut();
                state.monitor.record_connect(Instant::now());
                state.subscriptions.reload()
            };
            for identifier in identifiers {
                send_frame(&conn.inner, &OutgoingFrame::subscribe(identifier));
            }
        }
        FrameKind::Ping => {
            conn.inner.borrow_mut().monitor.record_ping(Instant::now());
        }
        FrameKind::ConfirmSubscription => {
            if let Some(identifier) = frame.identifier.as_deref() {
                conn.inner.borrow_mut().subscriptions.confirm(identifier);
            }
        }
        FrameKind::RejectSubscription => {
            if let Some(identifier) = frame.identifier.as_deref() {
                conn.inner.borrow_mut().subscriptions.reject(identifier);
            }
        }
        FrameKind::Disconnect => {
            tracing::info!(reason = ?frame.reason, reconnect = frame.reconnect, "server requested disconnect");
            if frame.reconnect {
                conn.reopen();
            } else {
                conn.close();
            }
        }
        FrameKind::Application => {
            if let (Some(identifier), Some(message)) = (frame.identifier, frame.message) {
                conn.inner.borrow_mut().subscriptions.received(&identifier, message);
            }
        }
    }
}

fn on_close(conn: &Connection) {
    let was_active = conn.inner.borrow().is_active();
    {
        let mut state = conn.inner.borrow_mut();
        // Whether the monitor is still running was already decided by
        // whatever called `close`/`reopen` before this event fired — a
        // permanent close stops it there, an automatic-reconnect close
        // leaves it running so `willAttemptReconnect` reads true below.
        state.monitor.record_disconnect(Instant::now());
        state.ws = None;
        state.poll_timeout = None;
    }
    // Dedup: a close event arriving while we already believe the socket is
    // down fires no fanout, matching the native transport's outcome-based
    // single-fanout-per-session behavior.
    if was_active {
        let will_attempt_reconnect = conn.inner.borrow().monitor.is_running();
        conn.inner.borrow_mut().subscriptions.notify_all_disconnected(will_attempt_reconnect);
    }
}

fn watch_visibility(conn: Connection, source: Rc<dyn LocalVisibilitySource>) {
    source.watch(Box::new(move |visibility| {
        if visibility != Visibility::Visible {
            return;
        }
        let conn = conn.clone();
        let timeout = Timeout::new(VISIBILITY_DEBOUNCE.as_millis() as u32, move || {
            let should_reopen = {
                let state = conn.inner.borrow();
                state.monitor.should_reopen_on_visible(Instant::now(), state.ready_state() == ReadyState::Open)
            };
            if should_reopen {
                conn.reopen();
            }
        });
        conn.inner.borrow_mut().visibility_debounce = Some(timeout);
    }));
}

/// A local (non-`Send`) visibility source — the WASM analogue of
/// [`VisibilitySource`], expressed with a plain closure callback instead of
/// a channel since there is no executor here to poll a receiver on.
pub trait LocalVisibilitySource {
    fn watch(&self, callback: Box<dyn FnMut(Visibility)>);
}

pub mod dom {
    //! Real `visibilitychange` bridging, following the same closure
    //! pattern as the socket handlers above.
    use super::{LocalVisibilitySource, Visibility};
    use wasm_bindgen::prelude::*;
    use wasm_bindgen::JsCast;

    #[derive(Default)]
    pub struct DomLocalVisibilitySource;

    impl LocalVisibilitySource for DomLocalVisibilitySource {
        fn watch(&self, mut callback: Box<dyn FnMut(Visibility)>) {
            let Some(document) = web_sys::window().and_then(|w| w.document()) else {
                return;
            };
            let closure = Closure::<dyn FnMut()>::new(move || {
                let state = web_sys::window()
                    .and_then(|w| w.document())
                    .map(|d| match d.visibility_state() {
                        web_sys::VisibilityState::Visible => Visibility::Visible,
                        _ => Visibility::Hidden,
                    })
                    .unwrap_or(Visibility::Hidden);
                callback(state);
            });
            let _ = document.add_event_listener_with_callback("visibilitychange", closure.as_ref().unchecked_ref());
            closure.forget();
        }
    }
}
