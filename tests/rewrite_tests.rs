//! Rewrite engine properties checked over whole documents.

use edge_relay::rewrite::{rewrite_css, rewrite_html, RewriteContext};
use edge_relay::target::{normalize, origin_of, target_from_path, validate};
use regex::Regex;
use url::Url;

const PROXY_BASE: &str = "https://proxy.example";

fn ctx(target: &str) -> RewriteContext {
    RewriteContext::new(PROXY_BASE, &Url::parse(target).unwrap())
}

const IGNORED: [&str; 8] = [
    "#section",
    "javascript:void(0)",
    "mailto:team@site.test",
    "tel:+15550100",
    "data:image/png;base64,iVBORw0KGgo=",
    "about:blank",
    "blob:https://site.test/4f1e",
    "",
];

#[test]
fn test_ignored_references_are_byte_identical() {
    let ctx = ctx("https://site.test/dir/page.html");

    for value in IGNORED {
        let html = format!(
            r#"<a href="{v}">a</a><img src='{v}'><form action="{v}"></form><div data-src="{v}"></div>"#,
            v = value
        );
        assert_eq!(rewrite_html(&html, &ctx), html, "html with {:?}", value);

        if !value.is_empty() {
            let css = format!("a {{ background: url({v}) }} b {{ background: url('{v}') }}", v = value);
            assert_eq!(rewrite_css(&css, &ctx), css, "css with {:?}", value);
        }
    }
}

#[test]
fn test_rewritten_links_resolve_to_target_origin() {
    let target = "https://site.test:8443/docs/guide/index.html";
    let ctx = ctx(target);
    let target_origin = origin_of(&Url::parse(target).unwrap());

    let html = r#"
        <link rel="stylesheet" href="/static/app.css">
        <script src="js/app.js"></script>
        <img src="//site.test:8443/logo.png" srcset="/a.png 1x, b.png 2x">
        <form action="search"></form>
        <video poster="/poster.jpg"></video>
        <style>body { background: url(../bg.png) } .i { background: url(../../img/icon.svg) } @import "print.css";</style>
        <div style="background-image: url(/hero.jpg)"></div>
    "#;
    let out = rewrite_html(html, &ctx);

    // Follow each link the way a browser would: parse the full proxied URL
    // (dot segments collapse here), then hand its path to the relay.
    let proxied = Regex::new(r#"https://proxy\.example/[^"'\s)]+"#).unwrap();
    let mut count = 0;
    for link in proxied.find_iter(&out) {
        let followed = Url::parse(link.as_str()).unwrap();
        assert_eq!(followed.host_str(), Some("proxy.example"), "{}", link.as_str());

        let url = validate(&normalize(target_from_path(followed.path()))).unwrap();
        assert_eq!(origin_of(&url), target_origin, "{}", link.as_str());
        count += 1;
    }
    assert_eq!(count, 11);
    assert!(out.contains("https://proxy.example/https://site.test:8443/bg.png"));
    assert!(out.contains("https://proxy.example/https://site.test:8443/img/icon.svg"));
}

#[test]
fn test_absolute_links_keep_their_own_origin() {
    let ctx = ctx("https://site.test/");
    let out = rewrite_html(
        r#"<a href="http://other.test/x">x</a><img src="https://cdn.test/y.png">"#,
        &ctx,
    );
    assert_eq!(
        out,
        r#"<a href="https://proxy.example/http://other.test/x">x</a><img src="https://proxy.example/https://cdn.test/y.png">"#
    );
}

#[test]
fn test_full_document() {
    let ctx = ctx("https://site.test/blog/post.html");
    let html = concat!(
        "<!doctype html><html><head>",
        r#"<meta property="og:image" content="https://site.test/og.png">"#,
        r#"<link href="/feed.xml" rel="alternate">"#,
        "<style>@import url(/base.css);</style>",
        "</head><body>",
        r##"<a href="#comments">c</a> <a href="https://site.test/">home</a>"##,
        r#"<img data-src="/lazy.jpg" src="data:image/gif;base64,R0lG">"#,
        "</body></html>",
    );

    let expected = concat!(
        "<!doctype html><html><head>",
        r#"<meta property="og:image" content="https://proxy.example/https://site.test/og.png">"#,
        r#"<link href="https://proxy.example/https://site.test/feed.xml" rel="alternate">"#,
        r#"<style>@import "https://proxy.example/https://site.test/base.css";</style>"#,
        "</head><body>",
        r##"<a href="#comments">c</a> <a href="https://proxy.example/https://site.test/">home</a>"##,
        r#"<img data-src="https://proxy.example/https://site.test/lazy.jpg" src="data:image/gif;base64,R0lG">"#,
        "</body></html>",
    );

    assert_eq!(rewrite_html(html, &ctx), expected);
}
