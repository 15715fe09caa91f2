//! Per-request dispatch: target extraction, validation, forwarding and the
//! content-type gate in front of the rewrite engine.

use crate::common::{
    full_body, outbound_headers, strip_response_headers, ContentCoding, PrefixedBody, RelayBody,
    ResponseBuilder, RewriteKind,
};
use crate::error::ProxyError;
use crate::forwarder::{Forwarder, OutboundRequest};
use crate::rewrite::{rewrite_css, rewrite_html, RewriteContext};
use crate::target::{normalize, target_from_path, validate};
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_ENCODING, CONTENT_LENGTH, HOST};
use http::response::Parts;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::{Method, Request, Response};
use log::{debug, info, warn};
use std::fmt::Display;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Fixed proxy base, for deployments behind another proxy that rewrites `Host`.
    pub public_base_url: Option<String>,
    /// Proxy base used when the request carries no authority at all.
    pub fallback_base: String,
    /// Rewrite-eligible bodies above this size are streamed unmodified.
    pub max_rewrite_body_bytes: usize,
    /// Inbound bodies above this size are answered with 413.
    pub max_request_body_bytes: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            public_base_url: None,
            fallback_base: "http://127.0.0.1:8080".to_string(),
            max_rewrite_body_bytes: 16 * 1024 * 1024,
            max_request_body_bytes: 16 * 1024 * 1024,
        }
    }
}

pub struct Relay {
    forwarder: Arc<dyn Forwarder>,
    settings: RelaySettings,
}

impl Relay {
    pub fn new(forwarder: Arc<dyn Forwarder>, settings: RelaySettings) -> Self {
        Self { forwarder, settings }
    }

    /// Entry point for one inbound request. Never fails: request-level errors
    /// become the fixed 400/500 replies.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<RelayBody>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Display + Send,
    {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        match self.process_request(req).await {
            Ok(response) => response,
            Err(e) => {
                warn!("{} {} failed: {}", method, path, e);
                ResponseBuilder::from_error(&e)
            }
        }
    }

    async fn process_request<B>(&self, req: Request<B>) -> Result<Response<RelayBody>, ProxyError>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Display + Send,
    {
        let proxy_base = self.proxy_base(&req);
        let target = validate(&normalize(target_from_path(req.uri().path())))?;

        let mut outbound_url = target.clone();
        if let Some(query) = req.uri().query().filter(|query| !query.is_empty()) {
            outbound_url.set_query(Some(query));
        }

        let (parts, body) = req.into_parts();
        let is_get = parts.method == Method::GET;
        let body = self.read_request_body(body).await?;

        debug!("{} {} via {}", parts.method, outbound_url, proxy_base);

        let response = self
            .forwarder
            .forward(OutboundRequest {
                method: parts.method.clone(),
                url: outbound_url.clone(),
                headers: outbound_headers(&parts.headers, is_get),
                body,
            })
            .await?;

        let (mut head, body) = response.into_parts();
        strip_response_headers(&mut head.headers);

        let kind = if is_get { RewriteKind::from_headers(&head.headers) } else { None };
        let Some(kind) = kind else {
            info!("{} {} -> {} (streamed)", parts.method, outbound_url, head.status.as_u16());
            return Ok(Response::from_parts(head, body));
        };

        let ctx = RewriteContext::new(&proxy_base, &target);
        let response = self.rewrite_response(head, body, kind, &ctx).await?;
        info!("{} {} -> {} ({:?})", parts.method, outbound_url, response.status().as_u16(), kind);
        Ok(response)
    }

    async fn rewrite_response(
        &self,
        mut head: Parts,
        body: RelayBody,
        kind: RewriteKind,
        ctx: &RewriteContext,
    ) -> Result<Response<RelayBody>, ProxyError> {
        let coding = ContentCoding::from_headers(&head.headers);
        if !coding.is_decodable() {
            debug!("Cannot decode {:?} body, streaming unmodified", head.headers.get(CONTENT_ENCODING));
            return Ok(Response::from_parts(head, body));
        }

        let limit = self.settings.max_rewrite_body_bytes;
        if declared_length(&head).is_some_and(|length| length > limit) {
            debug!("Body larger than {} bytes, streaming unmodified", limit);
            return Ok(Response::from_parts(head, body));
        }

        let raw = match collect_within(body, limit).await? {
            Collected::Complete(raw) => raw,
            Collected::Overflow(body) => {
                debug!("Body grew past {} bytes, streaming unmodified", limit);
                return Ok(Response::from_parts(head, body));
            }
        };

        let decoded = coding.decode(&raw)?;
        let text = String::from_utf8_lossy(&decoded);
        let rewritten = match kind {
            RewriteKind::Html => rewrite_html(&text, ctx),
            RewriteKind::Css => rewrite_css(&text, ctx),
        };

        head.headers.remove(CONTENT_ENCODING);
        head.headers.insert(CONTENT_LENGTH, HeaderValue::from(rewritten.len()));
        Ok(Response::from_parts(head, full_body(rewritten)))
    }

    async fn read_request_body<B>(&self, body: B) -> Result<Bytes, ProxyError>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Display + Send,
    {
        let limit = self.settings.max_request_body_bytes;
        let body = body.map_err(|e| ProxyError::FetchFailure(format!("Failed to read request body: {}", e)));

        match Limited::new(body, limit).collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) if e.is::<LengthLimitError>() => Err(ProxyError::RequestTooLarge(limit)),
            Err(e) => match e.downcast::<ProxyError>() {
                Ok(e) => Err(*e),
                Err(e) => Err(ProxyError::FetchFailure(e.to_string())),
            },
        }
    }

    /// Origin of the relay as the client sees it.
    fn proxy_base<B>(&self, req: &Request<B>) -> String {
        if let Some(base) = &self.settings.public_base_url {
            return base.trim_end_matches('/').to_string();
        }

        let authority = req
            .uri()
            .authority()
            .map(|authority| authority.to_string())
            .or_else(|| {
                req.headers()
                    .get(HOST)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_owned)
            });
        let Some(authority) = authority else {
            return self.settings.fallback_base.clone();
        };

        let scheme = req
            .headers()
            .get("x-forwarded-proto")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(|value| value.trim().to_ascii_lowercase())
            .filter(|value| value == "http" || value == "https")
            .or_else(|| req.uri().scheme_str().map(str::to_owned))
            .unwrap_or_else(|| "http".to_string());

        format!("{}://{}", scheme, authority)
    }
}

enum Collected {
    Complete(Vec<u8>),
    /// The body passed the limit; already-read chunks are replayed first.
    Overflow(RelayBody),
}

async fn collect_within(mut body: RelayBody, limit: usize) -> Result<Collected, ProxyError> {
    let mut chunks = Vec::new();
    let mut size = 0;

    while let Some(frame) = body.frame().await {
        let frame =
            frame.map_err(|e| ProxyError::FetchFailure(format!("Failed to read origin body: {}", e)))?;
        let Ok(chunk) = frame.into_data() else {
            continue;
        };

        size += chunk.len();
        chunks.push(chunk);
        if size > limit {
            return Ok(Collected::Overflow(PrefixedBody::new(chunks, body).boxed_unsync()));
        }
    }

    let mut raw = Vec::with_capacity(size);
    for chunk in &chunks {
        raw.extend_from_slice(chunk);
    }
    Ok(Collected::Complete(raw))
}

fn declared_length(head: &Parts) -> Option<usize> {
    head.headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Unreachable;

    #[async_trait]
    impl Forwarder for Unreachable {
        async fn forward(&self, _request: OutboundRequest) -> Result<Response<RelayBody>, ProxyError> {
            Err(ProxyError::FetchFailure("unreachable".to_string()))
        }
    }

    fn relay(settings: RelaySettings) -> Relay {
        Relay::new(Arc::new(Unreachable), settings)
    }

    #[test]
    fn test_proxy_base_from_host_header() {
        let req = Request::builder()
            .uri("/https://site.test/")
            .header(HOST, "proxy.example:8443")
            .body(())
            .unwrap();
        assert_eq!(relay(RelaySettings::default()).proxy_base(&req), "http://proxy.example:8443");
    }

    #[test]
    fn test_proxy_base_honours_forwarded_proto() {
        let req = Request::builder()
            .uri("/https://site.test/")
            .header(HOST, "proxy.example")
            .header("x-forwarded-proto", "https, http")
            .body(())
            .unwrap();
        assert_eq!(relay(RelaySettings::default()).proxy_base(&req), "https://proxy.example");
    }

    #[test]
    fn test_proxy_base_from_absolute_uri() {
        let req = Request::builder()
            .uri("https://proxy.example/https://site.test/")
            .body(())
            .unwrap();
        assert_eq!(relay(RelaySettings::default()).proxy_base(&req), "https://proxy.example");
    }

    #[test]
    fn test_proxy_base_configured_and_fallback() {
        let req = Request::builder().uri("/x").body(()).unwrap();
        assert_eq!(relay(RelaySettings::default()).proxy_base(&req), "http://127.0.0.1:8080");

        let settings = RelaySettings {
            public_base_url: Some("https://relay.example/".to_string()),
            ..RelaySettings::default()
        };
        assert_eq!(relay(settings).proxy_base(&req), "https://relay.example");
    }
}
