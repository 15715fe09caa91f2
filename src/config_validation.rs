//! Configuration validation.
//!
//! Errors make the relay refuse to start; warnings and suggestions are logged.

use crate::config::{Config, LogOutputType};
use url::Url;

/// Validation result
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

impl ValidationResult {
    pub fn success() -> Self {
        Self {
            is_valid: true,
            errors: vec![],
            warnings: vec![],
            suggestions: vec![],
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.errors.push(error);
        self.is_valid = false;
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn add_suggestion(&mut self, suggestion: String) {
        self.suggestions.push(suggestion);
    }
}

const MIN_HEADER_SIZE: usize = 8192;

pub struct ConfigValidator<'a> {
    config: &'a Config,
}

impl<'a> ConfigValidator<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::success();

        self.validate_listen_address(&mut result);
        self.validate_timeouts(&mut result);
        self.validate_limits(&mut result);
        self.validate_public_base_url(&mut result);
        self.validate_logging(&mut result);

        result
    }

    fn validate_listen_address(&self, result: &mut ValidationResult) {
        let addr = self.config.listen_addr;
        if addr.port() != 0 && addr.port() < 1024 {
            result.add_warning(format!(
                "Using privileged port {} - may require elevated privileges",
                addr.port()
            ));
        }
        if addr.ip().is_unspecified() {
            result.add_warning(format!(
                "Binding to all interfaces ({}) exposes an open relay to external networks",
                addr.ip()
            ));
        }
    }

    fn validate_timeouts(&self, result: &mut ValidationResult) {
        if self.config.connect_timeout_secs == 0 {
            result.add_error("connect_timeout_secs must be greater than 0".to_string());
        }
        if self.config.request_timeout_secs == 0 {
            result.add_error("request_timeout_secs must be greater than 0".to_string());
        }
        if self.config.connect_timeout_secs > self.config.request_timeout_secs {
            result.add_suggestion(
                "connect_timeout_secs exceeds request_timeout_secs; the request timeout fires first".to_string(),
            );
        }
    }

    fn validate_limits(&self, result: &mut ValidationResult) {
        if self.config.max_connections == 0 {
            result.add_error("max_connections must be greater than 0".to_string());
        }
        if self.config.max_header_size < MIN_HEADER_SIZE {
            result.add_error(format!(
                "max_header_size must be at least {} bytes",
                MIN_HEADER_SIZE
            ));
        }
        if self.config.max_rewrite_body_bytes == 0 {
            result.add_error("max_rewrite_body_bytes must be greater than 0".to_string());
        }
        if self.config.max_request_body_bytes == 0 {
            result.add_error("max_request_body_bytes must be greater than 0".to_string());
        }
        if self.config.max_redirects > 20 {
            result.add_warning(format!(
                "max_redirects of {} exceeds the browser limit of 20",
                self.config.max_redirects
            ));
        }
        if self.config.max_redirects == 0 {
            result.add_suggestion(
                "max_redirects is 0: redirects are passed to clients, whose Location headers bypass the relay"
                    .to_string(),
            );
        }
    }

    fn validate_public_base_url(&self, result: &mut ValidationResult) {
        let Some(base) = &self.config.public_base_url else {
            return;
        };

        match Url::parse(base) {
            Ok(url) if !matches!(url.scheme(), "http" | "https") => {
                result.add_error(format!("public_base_url must use http or https: {}", base));
            }
            Ok(url) if url.path() != "/" || url.query().is_some() => {
                result.add_error(format!(
                    "public_base_url must be an origin without path or query: {}",
                    base
                ));
            }
            Ok(_) => {}
            Err(e) => {
                result.add_error(format!("Invalid public_base_url {}: {}", base, e));
            }
        }
    }

    fn validate_logging(&self, result: &mut ValidationResult) {
        let Some(targets) = self.config.logging.as_ref().and_then(|l| l.targets.as_ref()) else {
            return;
        };

        for target in targets {
            if target.output_type == LogOutputType::File && target.path.is_none() {
                result.add_error("File log target requires a path".to_string());
            }
        }
    }
}
