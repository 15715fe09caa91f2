//! `srcset` candidate list rewriting.

use super::RewriteContext;

/// One `url [descriptors]` entry of a srcset value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate<'a> {
    pub url: &'a str,
    pub descriptors: &'a str,
}

/// Splits a srcset value into candidates.
///
/// A URL runs until whitespace, so commas inside it (as in `data:` URIs) stay
/// part of the URL; trailing commas end the candidate. Descriptors run until a
/// comma outside parentheses.
pub fn parse_candidates(value: &str) -> Vec<Candidate<'_>> {
    let bytes = value.as_bytes();
    let mut candidates = Vec::new();
    let mut pos = 0;

    loop {
        while pos < bytes.len() && (bytes[pos].is_ascii_whitespace() || bytes[pos] == b',') {
            pos += 1;
        }
        if pos >= bytes.len() {
            break;
        }

        let url_start = pos;
        while pos < bytes.len() && !bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        let raw_url = &value[url_start..pos];

        let url = raw_url.trim_end_matches(',');
        if url.len() != raw_url.len() {
            candidates.push(Candidate { url, descriptors: "" });
            continue;
        }

        let descriptor_start = pos;
        let mut depth = 0usize;
        while pos < bytes.len() {
            match bytes[pos] {
                b'(' => depth += 1,
                b')' => depth = depth.saturating_sub(1),
                b',' if depth == 0 => break,
                _ => {}
            }
            pos += 1;
        }

        candidates.push(Candidate {
            url,
            descriptors: value[descriptor_start..pos].trim(),
        });
    }

    candidates
}

/// Rewrites every absolute or relative candidate URL; ignored URLs are kept
/// as they are. Candidates are rejoined with `", "`.
pub fn rewrite_srcset(value: &str, ctx: &RewriteContext) -> String {
    parse_candidates(value)
        .into_iter()
        .map(|candidate| {
            let url = ctx
                .rewrite_reference(candidate.url)
                .unwrap_or_else(|| candidate.url.to_string());
            if candidate.descriptors.is_empty() {
                url
            } else {
                format!("{} {}", url, candidate.descriptors)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}
