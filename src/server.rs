use crate::config::Config;
use crate::error::ProxyError;
use crate::forwarder::HttpForwarder;
use crate::relay::Relay;
use hyper::body::Incoming;
use hyper::server::conn::http1::Builder as ServerBuilder;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use log::{debug, info, warn};
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

// hyper rejects read buffers below this size.
const MIN_BUF_SIZE: usize = 8192;

// ENFILE and EMFILE: the process or system is out of file descriptors.
const FD_EXHAUSTED: [i32; 2] = [23, 24];
const FD_EXHAUSTED_BACKOFF: Duration = Duration::from_millis(100);

/// HTTP/1 listener feeding every request into a shared [`Relay`].
pub struct RelayServer {
    relay: Arc<Relay>,
    listen_addr: SocketAddr,
    max_connections: usize,
    max_header_size: usize,
}

impl RelayServer {
    pub fn new(relay: Arc<Relay>, listen_addr: SocketAddr, max_connections: usize, max_header_size: usize) -> Self {
        Self {
            relay,
            listen_addr,
            max_connections,
            max_header_size,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        debug!(
            "Relay configuration - listen_addr: {}, max_connections: {}, max_redirects: {}",
            config.listen_addr, config.max_connections, config.max_redirects
        );
        let forwarder = HttpForwarder::new(&config.forwarder_settings());
        let relay = Relay::new(Arc::new(forwarder), config.relay_settings());
        Self::new(
            Arc::new(relay),
            config.listen_addr,
            config.max_connections,
            config.max_header_size,
        )
    }

    pub async fn run(self) -> Result<(), ProxyError> {
        info!("Binding TCP listener to: {}", self.listen_addr);
        let listener = TcpListener::bind(self.listen_addr).await?;
        self.serve(listener).await
    }

    /// Accept loop over an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ProxyError> {
        info!("Edge relay listening on: http://{}", listener.local_addr()?);

        let connections = Arc::new(Semaphore::new(self.max_connections));
        let max_buf_size = self.max_header_size.max(MIN_BUF_SIZE);

        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    if let Some(pause) = accept_backoff(&e) {
                        tokio::time::sleep(pause).await;
                    }
                    continue;
                }
            };

            let Ok(permit) = connections.clone().try_acquire_owned() else {
                warn!(
                    "Connection limit ({}) reached, dropping connection from {}",
                    self.max_connections, remote_addr
                );
                continue;
            };

            let relay = self.relay.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let service = service_fn(move |req: Request<Incoming>| {
                    let relay = relay.clone();
                    async move { Ok::<_, Infallible>(relay.handle(req).await) }
                });

                if let Err(e) = ServerBuilder::new()
                    .keep_alive(true)
                    .max_buf_size(max_buf_size)
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    debug!("Error serving connection from {}: {}", remote_addr, e);
                }
            });
        }
    }
}

/// Pause before the next accept. Retrying at once while descriptors are
/// exhausted would spin on the same error.
fn accept_backoff(e: &io::Error) -> Option<Duration> {
    e.raw_os_error()
        .filter(|code| FD_EXHAUSTED.contains(code))
        .map(|_| FD_EXHAUSTED_BACKOFF)
}
