use crate::error::ProxyError;
use bytes::Bytes;
use flate2::read::{DeflateDecoder, MultiGzDecoder, ZlibDecoder};
use http::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT_ENCODING, CONNECTION, CONTENT_ENCODING,
    CONTENT_TYPE, COOKIE, HOST, SET_COOKIE,
};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Frame, SizeHint};
use hyper::{Response, StatusCode};
use std::collections::VecDeque;
use std::io::Read;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Body type of every response the relay produces: either a buffered
/// (rewritten or error) body or the origin body streamed through.
pub type RelayBody = UnsyncBoxBody<Bytes, ProxyError>;

pub const INVALID_TARGET_MESSAGE: &str = "Provide Valid URL.";
pub const FETCH_FAILURE_MESSAGE: &str = "Error fetching the target URL.";
pub const REQUEST_TOO_LARGE_MESSAGE: &str = "Request body too large.";

// Hop-by-hop headers never cross the relay in either direction.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn full_body(bytes: impl Into<Bytes>) -> RelayBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Replays already-read chunks, then continues with the rest of a body.
pub struct PrefixedBody {
    prefix: VecDeque<Bytes>,
    rest: RelayBody,
}

impl PrefixedBody {
    pub fn new(prefix: impl IntoIterator<Item = Bytes>, rest: RelayBody) -> Self {
        Self {
            prefix: prefix.into_iter().collect(),
            rest,
        }
    }
}

impl Body for PrefixedBody {
    type Data = Bytes;
    type Error = ProxyError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, ProxyError>>> {
        let this = self.get_mut();
        if let Some(chunk) = this.prefix.pop_front() {
            return Poll::Ready(Some(Ok(Frame::data(chunk))));
        }
        Pin::new(&mut this.rest).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.prefix.is_empty() && self.rest.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        let buffered: u64 = self.prefix.iter().map(|chunk| chunk.len() as u64).sum();
        let rest = self.rest.size_hint();
        let mut hint = SizeHint::new();
        hint.set_lower(rest.lower() + buffered);
        if let Some(upper) = rest.upper() {
            hint.set_upper(upper + buffered);
        }
        hint
    }
}

/// Response builder utilities for the fixed relay replies.
pub struct ResponseBuilder;

impl ResponseBuilder {
    /// Creates a plain-text response with the given status
    pub fn error(status: StatusCode, message: &'static str) -> Response<RelayBody> {
        let mut response = Response::new(full_body(message));
        *response.status_mut() = status;
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain;charset=UTF-8"),
        );
        response
    }

    /// 400 for targets that do not parse as a URL
    pub fn invalid_target() -> Response<RelayBody> {
        Self::error(StatusCode::BAD_REQUEST, INVALID_TARGET_MESSAGE)
    }

    /// 500 for any failure while talking to the origin
    pub fn fetch_failure() -> Response<RelayBody> {
        Self::error(StatusCode::INTERNAL_SERVER_ERROR, FETCH_FAILURE_MESSAGE)
    }

    /// 413 for inbound bodies above the configured cap
    pub fn request_too_large() -> Response<RelayBody> {
        Self::error(StatusCode::PAYLOAD_TOO_LARGE, REQUEST_TOO_LARGE_MESSAGE)
    }

    /// Maps a request-level error onto its fixed response.
    pub fn from_error(error: &ProxyError) -> Response<RelayBody> {
        match error {
            ProxyError::InvalidTarget(_) => Self::invalid_target(),
            ProxyError::RequestTooLarge(_) => Self::request_too_large(),
            _ => Self::fetch_failure(),
        }
    }
}

fn remove_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named in `Connection` are hop-by-hop as well.
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Headers sent to the origin: the inbound set without cookies, `Host` and
/// hop-by-hop headers. When `decodable_only` is set, a client
/// `Accept-Encoding` is narrowed to the codings the relay can undo.
pub fn outbound_headers(inbound: &HeaderMap, decodable_only: bool) -> HeaderMap {
    let mut headers = inbound.clone();
    headers.remove(COOKIE);
    headers.remove(HOST);
    remove_hop_by_hop(&mut headers);

    if decodable_only && headers.contains_key(ACCEPT_ENCODING) {
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate"));
    }
    headers
}

/// Strips `Set-Cookie` and hop-by-hop headers from an origin response.
pub fn strip_response_headers(headers: &mut HeaderMap) {
    headers.remove(SET_COOKIE);
    remove_hop_by_hop(headers);
}

/// Which rewrite pass, if any, a response body gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteKind {
    Html,
    Css,
}

impl RewriteKind {
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let content_type = headers.get(CONTENT_TYPE)?.to_str().ok()?.to_ascii_lowercase();
        if content_type.contains("text/html") {
            Some(RewriteKind::Html)
        } else if content_type.contains("text/css") {
            Some(RewriteKind::Css)
        } else {
            None
        }
    }
}

/// `Content-Encoding` of a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCoding {
    Identity,
    Gzip,
    Deflate,
    Unsupported,
}

impl ContentCoding {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let Some(value) = headers.get(CONTENT_ENCODING) else {
            return ContentCoding::Identity;
        };
        let Ok(value) = value.to_str() else {
            return ContentCoding::Unsupported;
        };

        match value.trim().to_ascii_lowercase().as_str() {
            "" | "identity" => ContentCoding::Identity,
            "gzip" | "x-gzip" => ContentCoding::Gzip,
            "deflate" => ContentCoding::Deflate,
            _ => ContentCoding::Unsupported,
        }
    }

    pub fn is_decodable(self) -> bool {
        self != ContentCoding::Unsupported
    }

    /// Undoes the coding. `deflate` is tried as zlib first, then as a raw
    /// deflate stream, since servers send both.
    pub fn decode(self, bytes: &[u8]) -> Result<Vec<u8>, ProxyError> {
        let mut out = Vec::with_capacity(bytes.len() * 2);
        match self {
            ContentCoding::Identity => out.extend_from_slice(bytes),
            ContentCoding::Gzip => {
                MultiGzDecoder::new(bytes).read_to_end(&mut out)?;
            }
            ContentCoding::Deflate => {
                if ZlibDecoder::new(bytes).read_to_end(&mut out).is_err() {
                    out.clear();
                    DeflateDecoder::new(bytes).read_to_end(&mut out)?;
                }
            }
            ContentCoding::Unsupported => {
                return Err(ProxyError::Http("unsupported content encoding".to_string()));
            }
        }
        Ok(out)
    }
}
