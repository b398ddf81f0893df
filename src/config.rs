//! Out-of-band configuration lookup.
//!
//! In the browser this resolves `<meta name="action-cable-<name>" content="...">`.
//! That collaborator's contract is fixed at the boundary (spec §1,
//! non-goals) — this module gives it a typed seam so a native binary can
//! supply env-var- or file-backed config while a WASM build supplies one
//! backed by the DOM, without `Consumer` caring which.

use crate::error::ConfigError;

/// Resolves a named configuration value.
pub trait ConfigSource: Send + Sync {
    fn get(&self, name: &str) -> Result<String, ConfigError>;
}

/// A config source that never has anything — the default for environments
/// without a real config backend (tests, headless native binaries that
/// always pass an explicit URL). Reports every lookup as `NotFound` rather
/// than `Unavailable`: "no backend is installed" is the expected, everyday
/// shape of "nothing configured", not a broken environment, so callers like
/// [`crate::consumer::Consumer::create`] fall through to the default mount
/// path exactly as they would for a real backend with no matching key.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullConfigSource;

impl ConfigSource for NullConfigSource {
    fn get(&self, name: &str) -> Result<String, ConfigError> {
        Err(ConfigError::NotFound(name.to_string()))
    }
}

/// A config source backed by a fixed in-memory map, primarily for tests
/// and for native binaries that want to inject config without a DOM.
#[derive(Debug, Default, Clone)]
pub struct StaticConfigSource {
    values: std::collections::HashMap<String, String>,
}

impl StaticConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }
}

impl ConfigSource for StaticConfigSource {
    fn get(&self, name: &str) -> Result<String, ConfigError> {
        self.values
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::NotFound(name.to_string()))
    }
}

#[cfg(feature = "ws-wasm")]
pub mod dom {
    //! `<meta name="action-cable-<name>">` lookup, for WASM builds running in a
    //! real document.

    use super::ConfigSource;
    use crate::error::ConfigError;
    use wasm_bindgen::JsCast;

    #[derive(Debug, Default, Clone, Copy)]
    pub struct DomMetaConfigSource;

    impl ConfigSource for DomMetaConfigSource {
        fn get(&self, name: &str) -> Result<String, ConfigError> {
            let window = web_sys::window()
                .ok_or_else(|| ConfigError::Unavailable("no window".to_string()))?;
            let document = window
                .document()
                .ok_or_else(|| ConfigError::Unavailable("no document".to_string()))?;
            let selector = format!(r#"meta[name="action-cable-{name}"]"#);
            let element = document
                .query_selector(&selector)
                .ok()
                .flatten()
                .ok_or_else(|| ConfigError::NotFound(name.to_string()))?;
            let meta = element
                .dyn_into::<web_sys::HtmlMetaElement>()
                .map_err(|_| ConfigError::NotFound(name.to_string()))?;
            Ok(meta.content())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_source_always_errors() {
        let source = NullConfigSource;
        assert!(source.get("url").is_err());
    }

    #[test]
    fn static_source_returns_configured_values() {
        let source = StaticConfigSource::new().with("url", "wss://example.com/cable");
        assert_eq!(source.get("url").unwrap(), "wss://example.com/cable");
        assert!(source.get("missing").is_err());
    }
}
