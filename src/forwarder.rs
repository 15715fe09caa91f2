use crate::common::RelayBody;
use crate::error::ProxyError;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use http_body_util::{BodyExt, Full};
use hyper::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use log::debug;
use tokio::time::{timeout, Duration};
use url::Url;

/// A fully resolved request for the origin.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Performs the origin fetch. Any transport problem is a
/// [`ProxyError::FetchFailure`].
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, request: OutboundRequest) -> Result<Response<RelayBody>, ProxyError>;
}

#[derive(Debug, Clone)]
pub struct ForwarderSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_redirects: usize,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: Duration,
}

impl Default for ForwarderSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            max_redirects: 20,
            pool_max_idle_per_host: 10,
            pool_idle_timeout: Duration::from_secs(90),
        }
    }
}

/// Pooled HTTP/HTTPS client that follows redirects the way browser fetch does.
pub struct HttpForwarder {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    request_timeout: Duration,
    max_redirects: usize,
}

impl HttpForwarder {
    pub fn new(settings: &ForwarderSettings) -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(settings.connect_timeout));

        let client = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(settings.pool_max_idle_per_host)
            .pool_idle_timeout(settings.pool_idle_timeout)
            .build(HttpsConnector::new_with_connector(http));

        Self {
            client,
            request_timeout: settings.request_timeout,
            max_redirects: settings.max_redirects,
        }
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &Url,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response<hyper::body::Incoming>, ProxyError> {
        let uri: Uri = url
            .as_str()
            .parse()
            .map_err(|e: http::uri::InvalidUri| ProxyError::FetchFailure(format!("{}: {}", url, e)))?;

        let mut req = Request::new(Full::new(body));
        *req.method_mut() = method.clone();
        *req.uri_mut() = uri;
        *req.headers_mut() = headers.clone();

        debug!("Forwarding {} {}", method, url);

        timeout(self.request_timeout, self.client.request(req))
            .await
            .map_err(|_| ProxyError::FetchFailure("Request timeout".to_string()))?
            .map_err(|e| ProxyError::FetchFailure(e.to_string()))
    }
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// Whether following `status` turns the request into a bodiless GET.
pub fn redirect_switches_to_get(status: StatusCode, method: &Method) -> bool {
    (status == StatusCode::SEE_OTHER && *method != Method::HEAD)
        || (matches!(status, StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND) && *method == Method::POST)
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(&self, request: OutboundRequest) -> Result<Response<RelayBody>, ProxyError> {
        let OutboundRequest { mut method, mut url, mut headers, mut body } = request;
        let mut redirects = 0;

        loop {
            let response = self.send_once(&method, &url, &headers, body.clone()).await?;
            let status = response.status();

            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned);

            let location = match location {
                Some(location) if is_redirect(status) && self.max_redirects > 0 => location,
                _ => {
                    return Ok(response.map(|body| body.map_err(ProxyError::from).boxed_unsync()));
                }
            };

            if redirects == self.max_redirects {
                return Err(ProxyError::FetchFailure(format!(
                    "Too many redirects ({}) starting from {}",
                    redirects, url
                )));
            }

            let next = url.join(&location).map_err(|e| {
                ProxyError::FetchFailure(format!("Invalid redirect location {}: {}", location, e))
            })?;
            debug!("Following {} redirect {} -> {}", status.as_u16(), url, next);

            if redirect_switches_to_get(status, &method) {
                method = Method::GET;
                body = Bytes::new();
                headers.remove(CONTENT_TYPE);
                headers.remove(CONTENT_LENGTH);
            }
            if next.origin() != url.origin() {
                headers.remove(AUTHORIZATION);
            }

            url = next;
            redirects += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_method_rewriting() {
        assert!(redirect_switches_to_get(StatusCode::SEE_OTHER, &Method::POST));
        assert!(redirect_switches_to_get(StatusCode::SEE_OTHER, &Method::PUT));
        assert!(!redirect_switches_to_get(StatusCode::SEE_OTHER, &Method::HEAD));
        assert!(redirect_switches_to_get(StatusCode::FOUND, &Method::POST));
        assert!(redirect_switches_to_get(StatusCode::MOVED_PERMANENTLY, &Method::POST));
        assert!(!redirect_switches_to_get(StatusCode::FOUND, &Method::GET));
        assert!(!redirect_switches_to_get(StatusCode::TEMPORARY_REDIRECT, &Method::POST));
        assert!(!redirect_switches_to_get(StatusCode::PERMANENT_REDIRECT, &Method::PUT));
    }

    #[test]
    fn test_is_redirect() {
        assert!(is_redirect(StatusCode::FOUND));
        assert!(is_redirect(StatusCode::PERMANENT_REDIRECT));
        assert!(!is_redirect(StatusCode::NOT_MODIFIED));
        assert!(!is_redirect(StatusCode::OK));
    }

    #[tokio::test]
    async fn test_connection_refused_is_fetch_failure() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let forwarder = HttpForwarder::new(&ForwarderSettings::default());
        let result = forwarder
            .forward(OutboundRequest {
                method: Method::GET,
                url: Url::parse(&format!("http://{}/", addr)).unwrap(),
                headers: HeaderMap::new(),
                body: Bytes::new(),
            })
            .await;
        assert!(matches!(result, Err(ProxyError::FetchFailure(_))));
    }
}
