//! Target URL handling: path extraction, scheme correction, validation and
//! origin derivation.

use crate::error::ProxyError;
use regex::Regex;
use std::sync::LazyLock;
use url::Url;

static VALID_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^https?://").expect("valid scheme regex"));

// Letters followed by a colon and at least one slash, or a bare run of slashes.
// A host name followed by a port (`localhost:8080`) is left alone.
static MALFORMED_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:[a-z]*:/+|/+)").expect("valid malformed scheme regex"));

/// Returns the target portion of an inbound request path: everything after the
/// leading `/`. The query string is carried separately by the caller.
pub fn target_from_path(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

/// Guarantees the string starts with `http://` or `https://`.
///
/// Empty input and input that already carries an HTTP scheme are returned
/// unchanged. Anything else has a leading malformed scheme fragment removed
/// (`ht:/`, `:/`, stray slashes) and `https://` prepended. This never fails;
/// the result still has to go through [`validate`].
pub fn normalize(raw: &str) -> String {
    if raw.is_empty() || VALID_SCHEME.is_match(raw) {
        return raw.to_string();
    }

    let clean = MALFORMED_SCHEME.replace(raw, "");
    format!("https://{}", clean)
}

/// Parses a normalized target with WHATWG URL semantics.
pub fn validate(normalized: &str) -> Result<Url, ProxyError> {
    Url::parse(normalized)
        .map_err(|e| ProxyError::InvalidTarget(format!("{}: {}", normalized, e)))
}

/// `scheme://host[:port]` of a validated URL, default ports omitted.
pub fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}
