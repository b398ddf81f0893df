//! URL resolution for the Consumer's `url` property.
//!
//! The URL may be given as a plain string or as a zero-argument factory
//! producing one, resolved lazily on every access (Design Note: "URL
//! factory"). Normalizing a bare `http(s)` URL into `ws(s)` is an external
//! collaborator's job in the browser (it lets the DOM resolve the string as
//! a hyperlink so relative URLs and the current origin are handled for
//! free) — `normalize` here implements the documented contract of that
//! collaborator for environments that don't have a DOM to delegate to.

use std::sync::Arc;

/// Where the Consumer's URL comes from: a fixed string, or something that
/// produces one fresh on every access (e.g. reading a token that can
/// rotate).
#[derive(Clone)]
pub enum UrlSource {
    Static(String),
    Factory(Arc<dyn Fn() -> String + Send + Sync>),
}

impl UrlSource {
    /// Resolve to the current URL string, normalizing `http(s)` to `ws(s)`.
    pub fn resolve(&self) -> String {
        let raw = match self {
            UrlSource::Static(s) => s.clone(),
            UrlSource::Factory(f) => f(),
        };
        normalize(&raw)
    }
}

impl std::fmt::Debug for UrlSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UrlSource::Static(s) => f.debug_tuple("Static").field(s).finish(),
            UrlSource::Factory(_) => f.debug_tuple("Factory").field(&"<fn>").finish(),
        }
    }
}

impl From<String> for UrlSource {
    fn from(s: String) -> Self {
        UrlSource::Static(s)
    }
}

impl From<&str> for UrlSource {
    fn from(s: &str) -> Self {
        UrlSource::Static(s.to_string())
    }
}

impl<F> From<F> for UrlSource
where
    F: Fn() -> String + Send + Sync + 'static,
{
    fn from(f: F) -> Self {
        UrlSource::Factory(Arc::new(f))
    }
}

/// Rewrite a bare `http(s)` URL to `ws(s)`; leave anything already
/// `ws(s)`-prefixed (case-insensitively) untouched.
///
/// This is a best-effort stand-in for the real collaborator, which in a
/// browser lets `<a>` element resolution handle relative URLs and the
/// current origin. Outside a DOM we can only do the literal scheme swap the
/// spec documents: replace a leading `http` with `ws`.
pub fn normalize(raw: &str) -> String {
    if is_already_ws(raw) {
        return raw.to_string();
    }
    if let Some(rest) = strip_ci_prefix(raw, "https://") {
        return format!("wss://{rest}");
    }
    if let Some(rest) = strip_ci_prefix(raw, "http://") {
        return format!("ws://{rest}");
    }
    raw.to_string()
}

fn is_already_ws(raw: &str) -> bool {
    strip_ci_prefix(raw, "wss:").is_some() || strip_ci_prefix(raw, "ws:").is_some()
}

fn strip_ci_prefix<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_https_to_wss() {
        assert_eq!(normalize("https://example.com/cable"), "wss://example.com/cable");
    }

    #[test]
    fn rewrites_http_to_ws() {
        assert_eq!(normalize("http://example.com/cable"), "ws://example.com/cable");
    }

    #[test]
    fn leaves_ws_untouched() {
        assert_eq!(normalize("ws://example.com/cable"), "ws://example.com/cable");
        assert_eq!(normalize("wss://example.com/cable"), "wss://example.com/cable");
    }

    #[test]
    fn is_case_insensitive() {
        assert_eq!(normalize("HTTPS://example.com"), "wss://example.com");
        assert_eq!(normalize("WSS://example.com"), "WSS://example.com");
    }

    #[test]
    fn static_source_resolves_to_itself() {
        let source: UrlSource = "wss://example.com/cable".into();
        assert_eq!(source.resolve(), "wss://example.com/cable");
    }

    #[test]
    fn factory_source_is_resolved_lazily_on_each_access() {
        let counter = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let c = counter.clone();
        let source: UrlSource = (move || {
            let n = c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            format!("wss://example.com/cable?n={n}")
        })
        .into();

        assert_eq!(source.resolve(), "wss://example.com/cable?n=0");
        assert_eq!(source.resolve(), "wss://example.com/cable?n=1");
    }
}
