//! HTML pass.
//!
//! Pipeline order:
//! 1. absolute URL attributes
//! 2. relative URL attributes
//! 3. `srcset`
//! 4. `<style>` blocks (full CSS pass)
//! 5. `style="..."` attributes (`url()` rules only)
//!
//! Attribute names only match as whole names: the character before the name
//! must not be a word character or `-`, so the `src` rule leaves `data-src`
//! to its own rule.

use super::css::{rewrite_css, url_rules};
use super::srcset::rewrite_srcset;
use super::{group, run_pass, Reference, RewriteContext, Rule};
use std::sync::LazyLock;

struct UrlAttribute {
    name: &'static str,
    absolute_rule: &'static str,
    relative_rule: Option<&'static str>,
}

static URL_ATTRIBUTES: [UrlAttribute; 8] = [
    UrlAttribute { name: "href", absolute_rule: "html-href-absolute", relative_rule: Some("html-href-relative") },
    UrlAttribute { name: "src", absolute_rule: "html-src-absolute", relative_rule: Some("html-src-relative") },
    UrlAttribute { name: "action", absolute_rule: "html-action-absolute", relative_rule: Some("html-action-relative") },
    UrlAttribute { name: "poster", absolute_rule: "html-poster-absolute", relative_rule: Some("html-poster-relative") },
    UrlAttribute { name: "background", absolute_rule: "html-background-absolute", relative_rule: Some("html-background-relative") },
    // `content` carries arbitrary text (`width=device-width`), so only absolute URLs are touched.
    UrlAttribute { name: "content", absolute_rule: "html-content-absolute", relative_rule: None },
    UrlAttribute { name: "data-src", absolute_rule: "html-data-src-absolute", relative_rule: Some("html-data-src-relative") },
    UrlAttribute { name: "data-href", absolute_rule: "html-data-href-absolute", relative_rule: Some("html-data-href-relative") },
];

const ATTRIBUTE_LEAD: &str = r"(?P<lead>^|[^\w-])";

fn absolute_attribute_rule(attr: &'static UrlAttribute) -> Rule {
    let pattern = format!(
        r#"(?i){}{}\s*=\s*["'](?P<url>https?://[^"']+)["']"#,
        ATTRIBUTE_LEAD,
        regex::escape(attr.name)
    );
    Rule::new(attr.absolute_rule, &pattern, move |caps, ctx| {
        Some(format!(
            "{}{}=\"{}\"",
            group(caps, "lead"),
            attr.name,
            ctx.proxied(group(caps, "url"))
        ))
    })
}

fn relative_attribute_rule(attr: &'static UrlAttribute, rule_name: &'static str) -> Rule {
    let pattern = format!(
        r#"(?i){}{}\s*=\s*["'](?P<value>[^"']*)["']"#,
        ATTRIBUTE_LEAD,
        regex::escape(attr.name)
    );
    Rule::new(rule_name, &pattern, move |caps, ctx| match Reference::classify(group(caps, "value")) {
        Reference::Relative(path) => Some(format!(
            "{}{}=\"{}\"",
            group(caps, "lead"),
            attr.name,
            ctx.proxied(&ctx.resolve(path))
        )),
        _ => None,
    })
}

fn srcset_rule() -> Rule {
    let pattern = format!(r#"(?i){}srcset\s*=\s*["'](?P<value>[^"']+)["']"#, ATTRIBUTE_LEAD);
    Rule::new("html-srcset", &pattern, |caps, ctx| {
        Some(format!(
            "{}srcset=\"{}\"",
            group(caps, "lead"),
            rewrite_srcset(group(caps, "value"), ctx)
        ))
    })
}

fn style_block_rule() -> Rule {
    Rule::new(
        "html-style-block",
        r"(?is)(?P<open><style\b[^>]*>)(?P<body>.*?)(?P<close></style\s*>)",
        |caps, ctx| {
            Some(format!(
                "{}{}{}",
                group(caps, "open"),
                rewrite_css(group(caps, "body"), ctx),
                group(caps, "close")
            ))
        },
    )
}

// `url()` inside an attribute uses the quote the attribute does not, so the
// rewritten value cannot terminate the attribute early.
static DOUBLE_QUOTED_STYLE_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| url_rules('\''));
static SINGLE_QUOTED_STYLE_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| url_rules('"'));

fn style_attribute_rule() -> Rule {
    let pattern = format!(
        r#"(?i){}style\s*=\s*(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)')"#,
        ATTRIBUTE_LEAD
    );
    Rule::new("html-style-attribute", &pattern, |caps, ctx| {
        let lead = group(caps, "lead");
        if let Some(value) = caps.name("dq") {
            let css = run_pass(&DOUBLE_QUOTED_STYLE_RULES, value.as_str(), ctx);
            Some(format!("{}style=\"{}\"", lead, css))
        } else {
            let css = run_pass(&SINGLE_QUOTED_STYLE_RULES, group(caps, "sq"), ctx);
            Some(format!("{}style='{}'", lead, css))
        }
    })
}

static HTML_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    let mut rules: Vec<Rule> = URL_ATTRIBUTES.iter().map(absolute_attribute_rule).collect();
    rules.extend(URL_ATTRIBUTES.iter().filter_map(|attr| {
        attr.relative_rule.map(|name| relative_attribute_rule(attr, name))
    }));
    rules.push(srcset_rule());
    rules.push(style_block_rule());
    rules.push(style_attribute_rule());
    rules
});

/// Names of the HTML rules in the order they run.
pub fn rule_names() -> Vec<&'static str> {
    HTML_RULES.iter().map(Rule::name).collect()
}

/// Rewrites URL attributes, `srcset`, `<style>` blocks and inline styles.
pub fn rewrite_html(html: &str, ctx: &RewriteContext) -> String {
    run_pass(&HTML_RULES, html, ctx)
}
