//! Forwarder tests against a local origin
//!
//! A small hyper server on an ephemeral port plays the origin so redirect
//! following, method switching and end-to-end relaying run over real sockets.

use bytes::Bytes;
use edge_relay::forwarder::{Forwarder, ForwarderSettings, HttpForwarder, OutboundRequest};
use edge_relay::{Relay, RelayServer, RelaySettings};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1::Builder as ServerBuilder;
use hyper::service::service_fn;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use url::Url;

async fn origin(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let body = req.into_body().collect().await.map(|b| b.to_bytes()).unwrap_or_default();

    let redirect = |status: StatusCode, location: &str| {
        Response::builder()
            .status(status)
            .header("location", location)
            .body(Full::new(Bytes::new()))
            .unwrap()
    };

    let response = match path.as_str() {
        "/start" => redirect(StatusCode::FOUND, "/final"),
        "/see-other" => redirect(StatusCode::SEE_OTHER, "/echo"),
        "/temporary" => redirect(StatusCode::TEMPORARY_REDIRECT, "/echo"),
        "/loop" => redirect(StatusCode::FOUND, "/loop"),
        "/final" => Response::new(Full::new(Bytes::from_static(b"done"))),
        "/echo" => Response::new(Full::new(Bytes::from(format!(
            "{} {}",
            method,
            String::from_utf8_lossy(&body)
        )))),
        "/page.html" => Response::builder()
            .header("content-type", "text/html")
            .header("set-cookie", "origin=1")
            .body(Full::new(Bytes::from_static(br#"<a href="/next.html">next</a>"#)))
            .unwrap(),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::new()))
            .unwrap(),
    };
    Ok(response)
}

async fn spawn_origin() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                let _ = ServerBuilder::new()
                    .serve_connection(TokioIo::new(stream), service_fn(origin))
                    .await;
            });
        }
    });
    addr
}

fn request(method: Method, addr: SocketAddr, path: &str, body: &'static str) -> OutboundRequest {
    OutboundRequest {
        method,
        url: Url::parse(&format!("http://{}{}", addr, path)).unwrap(),
        headers: HeaderMap::new(),
        body: Bytes::from_static(body.as_bytes()),
    }
}

async fn text(response: Response<edge_relay::common::RelayBody>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_follows_redirects() {
    let addr = spawn_origin().await;
    let forwarder = HttpForwarder::new(&ForwarderSettings::default());

    let response = forwarder.forward(request(Method::GET, addr, "/start", "")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(text(response).await, "done");
}

#[tokio::test]
async fn test_see_other_switches_to_get() {
    let addr = spawn_origin().await;
    let forwarder = HttpForwarder::new(&ForwarderSettings::default());

    let response = forwarder
        .forward(request(Method::POST, addr, "/see-other", "payload"))
        .await
        .unwrap();

    assert_eq!(text(response).await, "GET ");
}

#[tokio::test]
async fn test_temporary_redirect_keeps_method_and_body() {
    let addr = spawn_origin().await;
    let forwarder = HttpForwarder::new(&ForwarderSettings::default());

    let response = forwarder
        .forward(request(Method::PUT, addr, "/temporary", "payload"))
        .await
        .unwrap();

    assert_eq!(text(response).await, "PUT payload");
}

#[tokio::test]
async fn test_redirect_loop_is_fetch_failure() {
    let addr = spawn_origin().await;
    let forwarder = HttpForwarder::new(&ForwarderSettings {
        max_redirects: 3,
        ..ForwarderSettings::default()
    });

    let result = forwarder.forward(request(Method::GET, addr, "/loop", "")).await;

    assert!(matches!(result, Err(edge_relay::ProxyError::FetchFailure(_))));
}

#[tokio::test]
async fn test_zero_redirects_returns_redirect_response() {
    let addr = spawn_origin().await;
    let forwarder = HttpForwarder::new(&ForwarderSettings {
        max_redirects: 0,
        ..ForwarderSettings::default()
    });

    let response = forwarder.forward(request(Method::GET, addr, "/start", "")).await.unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers().get("location").unwrap(), "/final");
}

#[tokio::test]
async fn test_relay_server_end_to_end() {
    let origin_addr = spawn_origin().await;

    let relay = Relay::new(
        Arc::new(HttpForwarder::new(&ForwarderSettings::default())),
        RelaySettings::default(),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let relay_addr = listener.local_addr().unwrap();
    let server = RelayServer::new(Arc::new(relay), relay_addr, 16, 16 * 1024);
    tokio::spawn(server.serve(listener));

    let forwarder = HttpForwarder::new(&ForwarderSettings::default());
    let response = forwarder
        .forward(request(
            Method::GET,
            relay_addr,
            &format!("/http://{}/page.html", origin_addr),
            "",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("set-cookie").is_none());
    assert_eq!(
        text(response).await,
        format!(
            r#"<a href="http://{relay}/http://{origin}/next.html">next</a>"#,
            relay = relay_addr,
            origin = origin_addr
        )
    );
}
