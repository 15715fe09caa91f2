//! CSS pass: `@import` and `url()` references.
//!
//! The import rules run before the `url()` rules so that `@import url(...)`
//! is turned into the quoted import form before the generic `url()` pattern
//! could see it.

use super::{group, run_pass, Reference, RewriteContext, Rule};
use std::sync::LazyLock;

const IMPORT_PATTERN: &str = r#"(?i)@import\s+(?:url\(\s*["']?(?P<url>[^"')\s]+)["']?\s*\)|["'](?P<quoted>[^"']+)["'])"#;

const URL_PATTERN: &str = r#"(?i)url\(\s*["']?(?P<url>[^"')]+)["']?\s*\)"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Absolute,
    Relative,
}

fn import_url<'t>(caps: &regex::Captures<'t>) -> &'t str {
    let url = group(caps, "url");
    if url.is_empty() { group(caps, "quoted") } else { url }
}

fn proxied_of_kind(value: &str, kind: Kind, ctx: &RewriteContext) -> Option<String> {
    match (Reference::classify(value), kind) {
        (Reference::Absolute(url), Kind::Absolute) => Some(ctx.proxied(url)),
        (Reference::Relative(path), Kind::Relative) => Some(ctx.proxied(&ctx.resolve(path))),
        _ => None,
    }
}

fn import_rule(name: &'static str, kind: Kind) -> Rule {
    Rule::new(name, IMPORT_PATTERN, move |caps, ctx| {
        proxied_of_kind(import_url(caps).trim(), kind, ctx)
            .map(|proxied| format!("@import \"{}\"", proxied))
    })
}

fn url_rule(name: &'static str, kind: Kind, quote: char) -> Rule {
    Rule::new(name, URL_PATTERN, move |caps, ctx| {
        proxied_of_kind(group(caps, "url").trim(), kind, ctx)
            .map(|proxied| format!("url({}{}{})", quote, proxied, quote))
    })
}

/// `url()` rules emitting the given quote character.
pub(crate) fn url_rules(quote: char) -> Vec<Rule> {
    vec![
        url_rule("css-url-absolute", Kind::Absolute, quote),
        url_rule("css-url-relative", Kind::Relative, quote),
    ]
}

static CSS_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    let mut rules = vec![
        import_rule("css-import-absolute", Kind::Absolute),
        import_rule("css-import-relative", Kind::Relative),
    ];
    rules.extend(url_rules('"'));
    rules
});

/// Rewrites `@import` and `url()` references in a stylesheet.
pub fn rewrite_css(css: &str, ctx: &RewriteContext) -> String {
    run_pass(&CSS_RULES, css, ctx)
}
