pub mod common;
pub mod config;
pub mod config_validation;
pub mod error;
pub mod forwarder;
pub mod logging;
pub mod relay;
pub mod rewrite;
pub mod server;
pub mod target;

pub use config::Config;
pub use error::ProxyError;
pub use relay::{Relay, RelaySettings};
pub use server::RelayServer;
