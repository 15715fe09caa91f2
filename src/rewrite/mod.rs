//! Link rewriting for proxied HTML and CSS.
//!
//! Every rewrite is expressed as a named [`Rule`]: a compiled pattern plus a
//! replacement function. A pass is a fixed, ordered list of rules folded over
//! the input text; each rule sees the output of the previous one. The rules
//! never fail: text they do not recognise passes through untouched.
//!
//! Known limitations: matching is textual, not DOM-aware. `<base>` tags are not
//! honoured and quote characters inside a matched URL are not escaped.
//!
//! Attribute rules match whole attribute names only. `data-src` and
//! `data-href` have rules of their own; other prefixed variants such as
//! `data-srcset` or `data-lazy-src` are deliberately left untouched.

pub mod css;
pub mod html;
pub mod srcset;

use crate::target::origin_of;
use regex::{Captures, Regex};
use std::sync::LazyLock;
use url::Url;

pub use css::rewrite_css;
pub use html::rewrite_html;

static ABSOLUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^https?://").expect("valid absolute url regex"));

// Any explicit scheme (`data:`, `javascript:`, `about:` ...).
static OTHER_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[a-z][a-z0-9+.\-]*:").expect("valid scheme regex"));

/// How a reference found in markup or CSS is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference<'a> {
    /// Explicit `http://` or `https://` URL.
    Absolute(&'a str),
    /// Path-only, scheme-relative or bare reference.
    Relative(&'a str),
    /// Anchors, empty values and non-network schemes. Left byte-identical.
    Ignored,
}

impl<'a> Reference<'a> {
    pub fn classify(value: &'a str) -> Self {
        if ABSOLUTE.is_match(value) {
            return Reference::Absolute(value);
        }

        let trimmed = value.trim_start();
        if trimmed.is_empty()
            || trimmed.starts_with('#')
            || trimmed.starts_with(':')
            || OTHER_SCHEME.is_match(trimmed)
        {
            return Reference::Ignored;
        }

        Reference::Relative(value)
    }
}

/// Per-request inputs shared by every rule.
#[derive(Debug, Clone)]
pub struct RewriteContext {
    proxy_base: String,
    target_origin: String,
    target_scheme: String,
    // `{origin}/`, the base relative references are joined onto.
    target_root: Option<Url>,
}

impl RewriteContext {
    pub fn new(proxy_base: &str, target: &Url) -> Self {
        let target_origin = origin_of(target);
        let target_root = Url::parse(&format!("{}/", target_origin)).ok();
        Self {
            proxy_base: proxy_base.trim_end_matches('/').to_string(),
            target_origin,
            target_scheme: target.scheme().to_string(),
            target_root,
        }
    }

    pub fn proxy_base(&self) -> &str {
        &self.proxy_base
    }

    pub fn target_origin(&self) -> &str {
        &self.target_origin
    }

    /// `{proxyBase}/{absolute}`
    pub fn proxied(&self, absolute: &str) -> String {
        format!("{}/{}", self.proxy_base, absolute)
    }

    /// Resolves a relative reference against the target origin.
    ///
    /// The result carries no dot segments (`..` stops at the root), so a
    /// browser cannot collapse the proxied URL into the target host.
    pub fn resolve(&self, relative: &str) -> String {
        let relative = relative.trim_start();
        if let Some(resolved) = self.target_root.as_ref().and_then(|root| root.join(relative).ok()) {
            return resolved.into();
        }

        if relative.starts_with("//") {
            format!("{}:{}", self.target_scheme, relative)
        } else if relative.starts_with('/') {
            format!("{}{}", self.target_origin, relative)
        } else {
            format!("{}/{}", self.target_origin, relative)
        }
    }

    /// The proxied form of `value`, or `None` when it must be left alone.
    pub fn rewrite_reference(&self, value: &str) -> Option<String> {
        match Reference::classify(value) {
            Reference::Absolute(url) => Some(self.proxied(url)),
            Reference::Relative(path) => Some(self.proxied(&self.resolve(path))),
            Reference::Ignored => None,
        }
    }
}

type Replacer = Box<dyn Fn(&Captures, &RewriteContext) -> Option<String> + Send + Sync>;

/// A single global substitution. Returning `None` from the replacer keeps the
/// matched text as it was.
pub struct Rule {
    name: &'static str,
    pattern: Regex,
    replace: Replacer,
}

impl Rule {
    pub fn new<F>(name: &'static str, pattern: &str, replace: F) -> Self
    where
        F: Fn(&Captures, &RewriteContext) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            name,
            pattern: Regex::new(pattern).expect("rewrite rule patterns are static and valid"),
            replace: Box::new(replace),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn apply(&self, input: &str, ctx: &RewriteContext) -> String {
        self.pattern
            .replace_all(input, |caps: &Captures| {
                (self.replace)(caps, ctx).unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

/// Folds `input` through `rules` in order.
pub fn run_pass(rules: &[Rule], input: &str, ctx: &RewriteContext) -> String {
    rules.iter().fold(input.to_string(), |text, rule| {
        log::trace!("Applying rewrite rule {}", rule.name());
        rule.apply(&text, ctx)
    })
}

/// Text of a named capture group, empty when the group did not participate.
pub(crate) fn group<'t>(caps: &Captures<'t>, name: &str) -> &'t str {
    caps.name(name).map(|m| m.as_str()).unwrap_or_default()
}
