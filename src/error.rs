use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    /// The path-extracted target does not parse as a URL.
    #[error("Invalid target URL: {0}")]
    InvalidTarget(String),

    /// The outbound request could not be completed (DNS, connect, TLS, timeout...).
    #[error("Fetch failure: {0}")]
    FetchFailure(String),

    /// The inbound request body exceeded the configured cap (bytes).
    #[error("Request body exceeds {0} bytes")]
    RequestTooLarge(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Hyper error: {0}")]
    Hyper(String),
}

impl From<hyper::Error> for ProxyError {
    fn from(e: hyper::Error) -> Self {
        ProxyError::Hyper(e.to_string())
    }
}
