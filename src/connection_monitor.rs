//! Liveness/reconnect state machine.
//!
//! Detects a stale or silently dropped socket from server pings, tracks
//! close events, and reacts to page-visibility transitions — all as a
//! pure state machine. It never touches a socket directly: the actor that
//! owns both the `Connection` and this monitor drives the poll/visibility
//! timers and asks the monitor what to do, then calls `Connection::reopen`
//! itself. That keeps the monitor trivially unit-testable and avoids the
//! circular Connection↔Monitor backreference the original has.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use web_time::Instant;

use crate::visibility::{NullVisibilitySource, Visibility, VisibilitySource};

/// Connection is considered stale after this long without a ping.
pub const STALE_THRESHOLD: Duration = Duration::from_secs(6);

/// Poll interval bounds and the log-curve multiplier.
pub const POLL_MIN: Duration = Duration::from_secs(3);
pub const POLL_MAX: Duration = Duration::from_secs(30);
pub const POLL_MULTIPLIER: f64 = 5.0;

/// Debounce before reacting to a page becoming visible again.
pub const VISIBILITY_DEBOUNCE: Duration = Duration::from_millis(200);

/// What the poll tick (or a visibility transition) decided to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollAction {
    /// Nothing to do; re-arm and wait for the next tick.
    None,
    /// The caller should call `Connection::reopen()`.
    Reopen,
}

pub struct ConnectionMonitor {
    reconnect_attempts: u32,
    started_at: Option<Instant>,
    stopped_at: Option<Instant>,
    pinged_at: Option<Instant>,
    disconnected_at: Option<Instant>,
    visibility_source: Arc<dyn VisibilitySource>,
    visibility_rx: Option<mpsc::UnboundedReceiver<Visibility>>,
}

impl std::fmt::Debug for ConnectionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMonitor")
            .field("reconnect_attempts", &self.reconnect_attempts)
            .field("started_at", &self.started_at)
            .field("stopped_at", &self.stopped_at)
            .field("pinged_at", &self.pinged_at)
            .field("disconnected_at", &self.disconnected_at)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new(Arc::new(NullVisibilitySource))
    }
}

impl ConnectionMonitor {
    pub fn new(visibility_source: Arc<dyn VisibilitySource>) -> Self {
        Self {
            reconnect_attempts: 0,
            started_at: None,
            stopped_at: None,
            pinged_at: None,
            disconnected_at: None,
            visibility_source,
            visibility_rx: None,
        }
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// `isRunning() ⇔ startedAt is set and stoppedAt is not`.
    pub fn is_running(&self) -> bool {
        self.started_at.is_some() && self.stopped_at.is_none()
    }

    /// Idempotent. Returns `true` if this call actually started it.
    pub fn start(&mut self, now: Instant) -> bool {
        if self.is_running() {
            return false;
        }
        self.started_at = Some(now);
        self.stopped_at = None;
        self.visibility_rx = Some(self.visibility_source.subscribe());
        true
    }

    /// Idempotent. Returns `true` if this call actually stopped it.
    pub fn stop(&mut self, now: Instant) -> bool {
        if !self.is_running() {
            return false;
        }
        self.stopped_at = Some(now);
        self.visibility_rx = None;
        true
    }

    pub fn record_ping(&mut self, now: Instant) {
        self.pinged_at = Some(now);
    }

    /// Called on server `welcome`.
    pub fn record_connect(&mut self, now: Instant) {
        self.reconnect_attempts = 0;
        self.pinged_at = Some(now);
        self.disconnected_at = None;
    }

    /// Called on socket `close`.
    pub fn record_disconnect(&mut self, now: Instant) {
        self.disconnected_at = Some(now);
    }

    /// The timestamp staleness is measured from: the last ping, or
    /// `startedAt` if no ping has arrived yet. `None` if never started.
    fn reference_time(&self) -> Option<Instant> {
        self.pinged_at.or(self.started_at)
    }

    /// `secondsSince(pingedAt ?? startedAt) > staleThreshold`.
    pub fn is_stale(&self, now: Instant) -> bool {
        match self.reference_time() {
            Some(reference) => now.saturating_duration_since(reference) > STALE_THRESHOLD,
            None => false,
        }
    }

    /// Evaluate staleness on a poll tick. Increments `reconnect_attempts`
    /// whenever stale, regardless of whether a reopen is actually
    /// triggered this cycle.
    pub fn reconnect_if_stale(&mut self, now: Instant) -> PollAction {
        if !self.is_stale(now) {
            return PollAction::None;
        }
        self.reconnect_attempts += 1;

        if let Some(disconnected_at) = self.disconnected_at {
            if now.saturating_duration_since(disconnected_at) < STALE_THRESHOLD {
                // Already known-down; its own reopen is pending.
                return PollAction::None;
            }
        }
        PollAction::Reopen
    }

    /// The poll loop's re-arm interval, given the current attempt count.
    ///
    /// `round(clamp(multiplier · ln(attempts + 1), min, max) · 1000)` ms.
    /// At `attempts = 0`, `ln(1) = 0`, clamped up to `min`.
    pub fn poll_interval(&self) -> Duration {
        Self::poll_interval_for(self.reconnect_attempts)
    }

    pub fn poll_interval_for(reconnect_attempts: u32) -> Duration {
        let raw_seconds = POLL_MULTIPLIER * ((reconnect_attempts as f64) + 1.0).ln();
        let clamped = raw_seconds.clamp(POLL_MIN.as_secs_f64(), POLL_MAX.as_secs_f64());
        Duration::from_millis((clamped * 1000.0).round() as u64)
    }

    /// Visibility handler's reopen decision, evaluated after the debounce.
    pub fn should_reopen_on_visible(&self, now: Instant, connection_is_open: bool) -> bool {
        self.is_stale(now) || !connection_is_open
    }

    /// The active visibility-change receiver, if the monitor is running.
    pub fn visibility_events(&mut self) -> Option<&mut mpsc::UnboundedReceiver<Visibility>> {
        self.visibility_rx.as_mut()
    }
}
