//! Native transport — `tokio-tungstenite` driven by one long-lived
//! background actor task per `Connection`.
//!
//! Every public operation (`open`, `close`, `send`, subscription creation)
//! is a command enqueued onto a single `mpsc` channel the actor drains
//! strictly sequentially. That gives the same "single logical task;
//! handlers run to completion without interleaving" guarantee the wire
//! protocol's reentrancy assumptions want, without an `Arc<Mutex<_>>`
//! anywhere: a callback that turns around and calls `unsubscribe()` just
//! enqueues another command rather than re-entering the registry on the
//! same stack. `Subscriptions` and `ConnectionMonitor` live for the actor's
//! entire lifetime, independent of how many times the underlying socket
//! itself is torn down and reopened — so subscriptions created before the
//! first successful connect are simply carried into the first `reload()`.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use web_time::Instant;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::connection::{ReadyState, REOPEN_DELAY};
use crate::connection_monitor::{ConnectionMonitor, PollAction};
use crate::error::WsError;
use crate::identifier::Identifier;
use crate::network::{is_protocol_supported, SUBPROTOCOLS};
use crate::protocol::{Command as WireCommand, FrameKind, IncomingFrame, OutgoingFrame};
use crate::subscription::{Callbacks, Subscription, SubscriptionToken, SubscriptionTransport};
use crate::subscriptions::{Subscriptions, WireAction};
use crate::url::UrlSource;
use crate::visibility::{NullVisibilitySource, Visibility, VisibilitySource};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

enum ActorCommand {
    Open,
    Close,
    Send(OutgoingFrame),
    CreateSubscription(SubscriptionToken, Identifier, Callbacks),
    RemoveSubscription(SubscriptionToken),
}

/// Routes a `Subscription`'s `send`/`unsubscribe` calls into the actor's
/// command queue.
struct ActorTransport {
    cmd_tx: mpsc::UnboundedSender<ActorCommand>,
}

impl SubscriptionTransport for ActorTransport {
    fn send_command(&self, identifier: &Identifier, command: WireCommand, data: Option<Value>) -> bool {
        let frame = match command {
            WireCommand::Message => OutgoingFrame::message(identifier.clone(), &data.unwrap_or(Value::Null)),
            WireCommand::Subscribe => OutgoingFrame::subscribe(identifier.clone()),
            WireCommand::Unsubscribe => OutgoingFrame::unsubscribe(identifier.clone()),
        };
        self.cmd_tx.send(ActorCommand::Send(frame)).is_ok()
    }

    fn forget(&self, token: SubscriptionToken) {
        let _ = self.cmd_tx.send(ActorCommand::RemoveSubscription(token));
    }
}

/// A live connection to the server. Cheap to share: wrap in `Arc` and hand
/// clones to subscriptions and the owning `Consumer`.
pub struct Connection {
    cmd_tx: mpsc::UnboundedSender<ActorCommand>,
    ready_state: Arc<AtomicU8>,
    protocol: Arc<Mutex<Option<String>>>,
    next_token: AtomicU64,
    task: JoinHandle<()>,
}

impl Connection {
    pub fn new(url: impl Into<UrlSource>) -> Self {
        Self::with_visibility_source(url, Arc::new(NullVisibilitySource))
    }

    pub fn with_visibility_source(url: impl Into<UrlSource>, visibility_source: Arc<dyn VisibilitySource>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let ready_state = Arc::new(AtomicU8::new(ReadyState::Closed as u8));
        let protocol = Arc::new(Mutex::new(None));
        let state = TaskState {
            url: url.into(),
            cmd_rx,
            self_tx: cmd_tx.clone(),
            ready_state: ready_state.clone(),
            protocol: protocol.clone(),
            monitor: ConnectionMonitor::new(visibility_source),
            subscriptions: Subscriptions::new(),
        };
        let task = tokio::spawn(run_actor(state));
        Self {
            cmd_tx,
            ready_state,
            protocol,
            next_token: AtomicU64::new(0),
            task,
        }
    }

    pub fn ready_state(&self) -> ReadyState {
        ReadyState::from(self.ready_state.load(Ordering::SeqCst))
    }

    pub fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    pub fn is_active(&self) -> bool {
        matches!(self.ready_state(), ReadyState::Open | ReadyState::Connecting)
    }

    /// The negotiated subprotocol, if any socket has connected yet.
    pub fn get_protocol(&self) -> Option<String> {
        self.protocol.lock().expect("protocol mutex poisoned").clone()
    }

    /// Whether the negotiated protocol is one this client can speak — any
    /// protocol except the explicit unsupported sentinel.
    pub fn is_protocol_supported(&self) -> bool {
        self.get_protocol().as_deref().map(is_protocol_supported).unwrap_or(false)
    }

    /// Idempotent: a no-op if already connecting or open.
    pub fn open(&self) -> bool {
        if matches!(self.ready_state(), ReadyState::Connecting | ReadyState::Open) {
            return false;
        }
        self.cmd_tx.send(ActorCommand::Open).is_ok()
    }

    /// Best-effort close. Returns `false` only if already closed.
    pub fn close(&self) -> bool {
        if self.ready_state() == ReadyState::Closed {
            return false;
        }
        self.cmd_tx.send(ActorCommand::Close).is_ok()
    }

    /// Close (best-effort), then unconditionally reopen after
    /// [`REOPEN_DELAY`] regardless of how the close went.
    pub async fn reopen(&self) {
        self.close();
        tokio::time::sleep(REOPEN_DELAY).await;
        self.open();
    }

    /// Best-effort send; `false` if the socket isn't open right now.
    pub fn send(&self, frame: OutgoingFrame) -> bool {
        self.is_open() && self.cmd_tx.send(ActorCommand::Send(frame)).is_ok()
    }

    pub fn create_subscription(&self, identifier: Identifier, callbacks: Callbacks) -> Subscription {
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::SeqCst));
        let transport: Arc<dyn SubscriptionTransport> = Arc::new(ActorTransport {
            cmd_tx: self.cmd_tx.clone(),
        });
        let _ = self
            .cmd_tx
            .send(ActorCommand::CreateSubscription(token, identifier.clone(), callbacks));
        Subscription::new(token, identifier, transport)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct TaskState {
    url: UrlSource,
    cmd_rx: mpsc::UnboundedReceiver<ActorCommand>,
    self_tx: mpsc::UnboundedSender<ActorCommand>,
    ready_state: Arc<AtomicU8>,
    protocol: Arc<Mutex<Option<String>>>,
    monitor: ConnectionMonitor,
    subscriptions: Subscriptions,
}

/// Why `run_connected` returned.
enum ConnectedOutcome {
    /// `Connection::close()` was called, or the server said `disconnect`
    /// with `reconnect: false`.
    UserClosed,
    /// The socket dropped out from under us.
    ServerClosed,
    Errored,
    /// `ConnectionMonitor` decided the socket was stale.
    Stale,
}

fn schedule_reopen(self_tx: mpsc::UnboundedSender<ActorCommand>) {
    tokio::spawn(async move {
        tokio::time::sleep(REOPEN_DELAY).await;
        let _ = self_tx.send(ActorCommand::Open);
    });
}

async fn run_actor(mut state: TaskState) {
    loop {
        // Idle: service commands (queuing subscriptions, no-op sends) until
        // an `Open` arrives or the `Connection` is dropped.
        loop {
            match state.cmd_rx.recv().await {
                None => return,
                Some(ActorCommand::Open) => break,
                Some(ActorCommand::Close) => {}
                Some(ActorCommand::Send(_)) => {}
                Some(ActorCommand::CreateSubscription(token, identifier, callbacks)) => {
                    state.subscriptions.insert(token, identifier, callbacks);
                }
                Some(ActorCommand::RemoveSubscription(token)) => {
                    state.subscriptions.remove(token);
                }
            }
        }

        // `open()`'s monitor start is synchronous with the decision to
        // open, not with the socket actually coming up — a slow or
        // never-succeeding connect attempt still accrues staleness.
        state.monitor.start(Instant::now());
        state.ready_state.store(ReadyState::Connecting as u8, Ordering::SeqCst);
        *state.protocol.lock().expect("protocol mutex poisoned") = None;
        let resolved = state.url.resolve();
        let (mut ws, protocol) = match attempt_connect(&resolved).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "connection attempt failed");
                state.ready_state.store(ReadyState::Closed as u8, Ordering::SeqCst);
                schedule_reopen(state.self_tx.clone());
                continue;
            }
        };
        *state.protocol.lock().expect("protocol mutex poisoned") = protocol.clone();

        let protocol_supported = protocol.as_deref().map(is_protocol_supported).unwrap_or(true);
        if !protocol_supported {
            let err = WsError::UnsupportedProtocol(protocol.clone().unwrap_or_default());
            tracing::warn!(error = %err, "closing");
            // Mirrors the open handler's `close({allowReconnect: false})`:
            // stop the monitor first, then best-effort close. No `welcome`
            // can arrive on a protocol we can't parse, so subscriptions
            // never see `connected` — only the disconnect fanout.
            state.monitor.stop(Instant::now());
            state.monitor.record_disconnect(Instant::now());
            let _ = ws.close().await;
            state.ready_state.store(ReadyState::Closed as u8, Ordering::SeqCst);
            state.subscriptions.notify_all_disconnected(state.monitor.is_running());
            continue;
        }

        state.ready_state.store(ReadyState::Open as u8, Ordering::SeqCst);
        let (mut sink, mut stream) = ws.split();

        let outcome = run_connected(&mut state, &mut sink, &mut stream).await;

        state.monitor.record_disconnect(Instant::now());
        // Only a user-initiated close is permanent; `ServerClosed`/`Errored`/
        // `Stale` all schedule a reopen below, so the monitor must keep
        // running for `disconnected`'s `willAttemptReconnect` to read true.
        if matches!(outcome, ConnectedOutcome::UserClosed) {
            state.monitor.stop(Instant::now());
        }
        state.ready_state.store(ReadyState::Closed as u8, Ordering::SeqCst);
        state.subscriptions.notify_all_disconnected(state.monitor.is_running());

        match outcome {
            ConnectedOutcome::UserClosed => {}
            ConnectedOutcome::ServerClosed | ConnectedOutcome::Errored | ConnectedOutcome::Stale => {
                schedule_reopen(state.self_tx.clone());
            }
        }
    }
}

async fn recv_visibility(monitor: &mut ConnectionMonitor) -> Option<Visibility> {
    monitor.visibility_events()?.recv().await
}

async fn run_connected(state: &mut TaskState, sink: &mut WsSink, stream: &mut WsSource) -> ConnectedOutcome {
    // Default for a raw socket close that arrives without a preceding
    // `disconnect` frame — the monitor's own retry policy should still try
    // again. A `disconnect` frame, when one arrives, decides and returns
    // immediately instead of falling through to this default.
    let allow_reconnect = true;

    let mut poll_deadline = tokio::time::Instant::now() + state.monitor.poll_interval();
    let poll_sleep = tokio::time::sleep_until(poll_deadline);
    tokio::pin!(poll_sleep);

    loop {
        let has_visibility = state.monitor.visibility_events().is_some();

        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(outcome) = handle_text_frame(state, sink, text.as_ref()).await {
                            return outcome;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return if allow_reconnect { ConnectedOutcome::ServerClosed } else { ConnectedOutcome::UserClosed };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "websocket stream error");
                        return ConnectedOutcome::Errored;
                    }
                }
            }

            cmd = state.cmd_rx.recv() => {
                match cmd {
                    None | Some(ActorCommand::Close) => {
                        let _ = sink.send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "client closed".into(),
                        }))).await;
                        return ConnectedOutcome::UserClosed;
                    }
                    Some(ActorCommand::Open) => {}
                    Some(ActorCommand::Send(frame)) => {
                        let _ = sink.send(Message::Text(frame.to_string().into())).await;
                    }
                    Some(ActorCommand::CreateSubscription(token, identifier, callbacks)) => {
                        if state.subscriptions.insert(token, identifier.clone(), callbacks) == WireAction::Subscribe {
                            let _ = sink.send(Message::Text(OutgoingFrame::subscribe(identifier).to_string().into())).await;
                        }
                    }
                    Some(ActorCommand::RemoveSubscription(token)) => {
                        if let Some(identifier) = state.subscriptions.remove_and_identifier(token) {
                            let _ = sink.send(Message::Text(OutgoingFrame::unsubscribe(identifier).to_string().into())).await;
                        }
                    }
                }
            }

            () = &mut poll_sleep => {
                let now = Instant::now();
                if state.monitor.reconnect_if_stale(now) == PollAction::Reopen {
                    let _ = sink.close().await;
                    return ConnectedOutcome::Stale;
                }
                poll_deadline = tokio::time::Instant::now() + state.monitor.poll_interval();
                poll_sleep.as_mut().reset(poll_deadline);
            }

            Some(visibility) = recv_visibility(&mut state.monitor), if has_visibility => {
                if visibility == Visibility::Visible {
                    tokio::time::sleep(crate::connection_monitor::VISIBILITY_DEBOUNCE).await;
                    if state.monitor.should_reopen_on_visible(Instant::now(), true) {
                        let _ = sink.close().await;
                        return ConnectedOutcome::Stale;
                    }
                }
            }
        }
    }
}

/// Dispatches one inbound application frame. Returns `Some` when the
/// connected session must end right here (a `disconnect` frame asks us to
/// close proactively rather than wait for the server to drop the raw
/// socket on its own time).
async fn handle_text_frame(state: &mut TaskState, sink: &mut WsSink, text: &str) -> Option<ConnectedOutcome> {
    let frame: IncomingFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(error = %e, raw = text, "failed to parse inbound frame");
            return None;
        }
    };

    match frame.kind() {
        FrameKind::Welcome => {
            state.monitor.record_connect(Instant::now());
            for identifier in state.subscriptions.reload() {
                let _ = sink
                    .send(Message::Text(OutgoingFrame::subscribe(identifier).to_string().into()))
                    .await;
            }
            None
        }
        FrameKind::Ping => {
            state.monitor.record_ping(Instant::now());
            None
        }
        FrameKind::ConfirmSubscription => {
            if let Some(identifier) = frame.identifier.as_deref() {
                state.subscriptions.confirm(identifier);
            }
            None
        }
        FrameKind::RejectSubscription => {
            if let Some(identifier) = frame.identifier.as_deref() {
                state.subscriptions.reject(identifier);
            }
            None
        }
        FrameKind::Disconnect => {
            tracing::info!(reason = ?frame.reason, reconnect = frame.reconnect, "server requested disconnect");
            let _ = sink.close().await;
            Some(if frame.reconnect {
                ConnectedOutcome::ServerClosed
            } else {
                ConnectedOutcome::UserClosed
            })
        }
        FrameKind::Application => {
            if let (Some(identifier), Some(message)) = (frame.identifier, frame.message) {
                state.subscriptions.received(&identifier, message);
            }
            None
        }
    }
}

async fn attempt_connect(url: &str) -> Result<(WsStream, Option<String>), WsError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| WsError::ConnectionFailed(e.to_string()))?;
    let protocols = SUBPROTOCOLS.join(", ");
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        protocols
            .parse()
            .map_err(|_| WsError::ConnectionFailed("invalid subprotocol header value".to_string()))?,
    );

    let (stream, response) = tokio::time::timeout(std::time::Duration::from_secs(30), connect_async(request))
        .await
        .map_err(|_| WsError::ConnectionFailed("connection timed out".to_string()))?
        .map_err(|e| WsError::ConnectionFailed(e.to_string()))?;

    let negotiated = response
        .headers()
        .get("Sec-WebSocket-Protocol")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    Ok((stream, negotiated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_connection_starts_closed() {
        let conn = Connection::new("ws://127.0.0.1:1/cable");
        assert_eq!(conn.ready_state(), ReadyState::Closed);
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn send_on_closed_connection_returns_false() {
        let conn = Connection::new("ws://127.0.0.1:1/cable");
        assert!(!conn.send(OutgoingFrame::subscribe("{}".to_string())));
    }

    #[tokio::test]
    async fn open_is_idempotent_while_connecting() {
        let conn = Connection::new("ws://127.0.0.1:1/cable");
        assert!(conn.open());
        // A real connect attempt to a closed local port takes a moment to
        // fail; ready_state should already have flipped to Connecting.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!conn.open(), "second open() while connecting must no-op");
    }

    #[tokio::test]
    async fn close_on_already_closed_connection_returns_false() {
        let conn = Connection::new("ws://127.0.0.1:1/cable");
        assert!(!conn.close());
    }

    #[tokio::test]
    async fn create_subscription_before_open_still_returns_a_handle() {
        let conn = Connection::new("ws://127.0.0.1:1/cable");
        let sub = conn.create_subscription("{\"channel\":\"Room\"}".to_string(), Callbacks::new());
        assert_eq!(sub.identifier(), "{\"channel\":\"Room\"}");
    }

    #[tokio::test]
    async fn get_protocol_is_absent_before_any_socket() {
        let conn = Connection::new("ws://127.0.0.1:1/cable");
        assert_eq!(conn.get_protocol(), None);
        assert!(!conn.is_protocol_supported());
    }

    #[tokio::test]
    async fn is_active_while_connecting() {
        let conn = Connection::new("ws://127.0.0.1:1/cable");
        assert!(!conn.is_active());
        conn.open();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(conn.is_active(), "connecting counts as active");
    }
}
