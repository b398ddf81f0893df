//! Page-visibility signal consumed by `ConnectionMonitor`.
//!
//! "Page visibility" is a browser concept with no native-OS equivalent;
//! this trait is the dependency-injection seam Design Note "Global
//! adapters" calls for, so `ConnectionMonitor` itself never needs to know
//! whether it's running under a DOM.

use tokio::sync::mpsc;

/// A visibility transition the monitor reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Something that can notify a listener of visibility transitions.
pub trait VisibilitySource: Send + Sync {
    /// Start watching. Returns a receiver of transitions; dropping the
    /// receiver (or calling this again and dropping the old one) stops
    /// the subscription.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<Visibility>;
}

/// Default source for environments with no page-visibility concept at all
/// (native binaries, services). Never fires — the receiver simply never
/// yields, which in a `select!` arm means that branch is never taken.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullVisibilitySource;

impl VisibilitySource for NullVisibilitySource {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<Visibility> {
        let (tx, rx) = mpsc::unbounded_channel();
        // Leak the sender so the channel never closes; closing it would
        // make `rx.recv()` resolve immediately with `None` on every poll,
        // which would busy-loop the monitor's select arm instead of
        // parking forever as a "no such signal here" source should.
        std::mem::forget(tx);
        rx
    }
}

/// A source a test can drive by hand.
#[derive(Debug, Clone)]
pub struct ManualVisibilitySource {
    tx: mpsc::UnboundedSender<Visibility>,
    rx: std::sync::Arc<std::sync::Mutex<Option<mpsc::UnboundedReceiver<Visibility>>>>,
}

impl ManualVisibilitySource {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: std::sync::Arc::new(std::sync::Mutex::new(Some(rx))),
        }
    }

    pub fn fire(&self, state: Visibility) {
        let _ = self.tx.send(state);
    }
}

impl Default for ManualVisibilitySource {
    fn default() -> Self {
        Self::new()
    }
}

impl VisibilitySource for ManualVisibilitySource {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<Visibility> {
        self.rx
            .lock()
            .expect("visibility source mutex poisoned")
            .take()
            .expect("ManualVisibilitySource::subscribe called more than once")
    }
}

// No `dom` submodule here: the `ws-wasm` transport (`connection::wasm`)
// bridges `visibilitychange` through its own `LocalVisibilitySource`
// instead of this channel-based `VisibilitySource`, since it has no
// executor to poll an `mpsc::UnboundedReceiver` on. See
// `connection::wasm::dom::DomLocalVisibilitySource`.

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manual_source_delivers_fired_transitions() {
        let source = ManualVisibilitySource::new();
        let mut rx = source.subscribe();
        source.fire(Visibility::Visible);
        assert_eq!(rx.recv().await, Some(Visibility::Visible));
    }

    #[tokio::test]
    async fn null_source_never_yields() {
        let mut rx = NullVisibilitySource.subscribe();
        let result = tokio::time::timeout(std::time::Duration::from_millis(20), rx.recv()).await;
        assert!(result.is_err(), "NullVisibilitySource must never fire");
    }
}
