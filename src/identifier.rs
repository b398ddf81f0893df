//! Canonical subscription identifiers.
//!
//! The identifier is the wire-level handle for a channel subscription: a
//! canonical JSON encoding of the subscription's params object. Two
//! subscriptions to equal params must produce equal identifiers so the
//! server-side (and our own registry) can multiplex many subscriptions
//! over one socket by string key.
//!
//! `serde_json` is used with the `preserve_order` feature so key order in
//! the encoded identifier follows the order params were inserted, matching
//! the original object-key-order-sensitive semantics: `{channel: "Room",
//! id: 1}` and `{id: 1, channel: "Room"}` are deliberately allowed to
//! produce different identifiers. Callers that want identifier stability
//! across equivalent params should build them with a consistent key order.

use serde_json::Value;

/// A canonical JSON-encoded identifier string.
pub type Identifier = String;

/// Build params for a bare channel name: `{"channel": name}`.
pub fn channel_params(channel: &str) -> Value {
    let mut map = serde_json::Map::new();
    map.insert("channel".to_string(), Value::String(channel.to_string()));
    Value::Object(map)
}

/// Canonically encode a params value into its wire identifier.
///
/// Panics only if `params` somehow fails to serialize, which cannot happen
/// for a `serde_json::Value` — encoding a `Value` is infallible.
pub fn encode(params: &Value) -> Identifier {
    serde_json::to_string(params).expect("serde_json::Value serialization is infallible")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_channel_name_gets_literal_channel_key() {
        let params = channel_params("Room");
        assert_eq!(encode(&params), r#"{"channel":"Room"}"#);
    }

    #[test]
    fn equal_params_produce_equal_identifiers() {
        let a = encode(&json!({"channel": "Room", "id": 1}));
        let b = encode(&json!({"channel": "Room", "id": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn key_order_is_preserved_and_affects_the_identifier() {
        let a = encode(&json!({"channel": "Room", "id": 1}));
        let b = encode(&json!({"id": 1, "channel": "Room"}));
        assert_ne!(a, b, "key order is part of the canonical encoding");
        assert_eq!(a, r#"{"channel":"Room","id":1}"#);
        assert_eq!(b, r#"{"id":1,"channel":"Room"}"#);
    }
}
