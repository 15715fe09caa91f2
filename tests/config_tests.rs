//! Config file round trip and validation

use edge_relay::config::{Config, LogFormat, LoggingConfig};
use edge_relay::config_validation::ConfigValidator;
use edge_relay::ProxyError;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_config_file_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("relay.json");
    let path = path.to_str().unwrap();

    let config = Config {
        listen_addr: "0.0.0.0:9090".parse().unwrap(),
        public_base_url: Some("https://relay.example".to_string()),
        max_redirects: 5,
        logging: Some(LoggingConfig {
            format: Some(LogFormat::Json),
            ..LoggingConfig::default()
        }),
        ..Config::default()
    };
    config.to_file(path).unwrap();

    let loaded = Config::from_file(path).unwrap();
    assert_eq!(loaded.listen_addr, config.listen_addr);
    assert_eq!(loaded.public_base_url, config.public_base_url);
    assert_eq!(loaded.max_redirects, 5);
    assert_eq!(loaded.logging.unwrap().format, Some(LogFormat::Json));
}

#[test]
fn test_partial_config_file_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("relay.json");
    fs::write(&path, r#"{ "max_connections": 50 }"#).unwrap();

    let config = Config::from_file(path.to_str().unwrap()).unwrap();
    assert_eq!(config.max_connections, 50);
    assert_eq!(config.listen_addr, Config::default().listen_addr);
    assert_eq!(config.connect_timeout_secs, 10);
    assert!(ConfigValidator::new(&config).validate().is_valid);
}

#[test]
fn test_malformed_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("relay.json");
    fs::write(&path, "{ not json").unwrap();

    let result = Config::from_file(path.to_str().unwrap());
    assert!(matches!(result, Err(ProxyError::Config(_))));
}

#[test]
fn test_missing_config_file() {
    let result = Config::from_file("/nonexistent/relay.json");
    assert!(matches!(result, Err(ProxyError::Io(_))));
}

#[test]
fn test_invalid_values_fail_validation() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("relay.json");
    fs::write(
        &path,
        r#"{ "request_timeout_secs": 0, "max_header_size": 1024, "public_base_url": "relay" }"#,
    )
    .unwrap();

    let config = Config::from_file(path.to_str().unwrap()).unwrap();
    let result = ConfigValidator::new(&config).validate();
    assert!(!result.is_valid);
    assert_eq!(result.errors.len(), 3);
}
