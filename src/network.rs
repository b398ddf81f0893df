//! Protocol-level constants: mount path and subprotocol negotiation list.

/// Default mount path used when no explicit URL is configured.
pub const DEFAULT_PATH: &str = "/cable";

/// Preferred subprotocol, sent first in the negotiation list.
pub const SUPPORTED_PROTOCOL: &str = "actioncable-v1-json";

/// Sentinel subprotocol a server can echo back to say "I don't speak
/// anything you offered" without failing the WebSocket handshake outright.
pub const UNSUPPORTED_PROTOCOL: &str = "actioncable-unsupported";

/// The full list offered during the WebSocket handshake, preferred first.
pub const SUBPROTOCOLS: &[&str] = &[SUPPORTED_PROTOCOL, UNSUPPORTED_PROTOCOL];

/// Whether a negotiated subprotocol is one this client can actually speak.
///
/// Every protocol except the explicit unsupported sentinel counts as
/// supported — a future server version could add a new preferred protocol
/// name and an older client should still treat it as usable rather than
/// failing closed.
pub fn is_protocol_supported(protocol: &str) -> bool {
    protocol != UNSUPPORTED_PROTOCOL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_protocol_is_supported() {
        assert!(is_protocol_supported(SUPPORTED_PROTOCOL));
    }

    #[test]
    fn unsupported_sentinel_is_not_supported() {
        assert!(!is_protocol_supported(UNSUPPORTED_PROTOCOL));
    }

    #[test]
    fn unknown_protocol_is_supported() {
        assert!(is_protocol_supported("some-future-protocol"));
    }
}
