use crate::config::{LogFormat, LogLevel, LogOutputType, LogTarget, LoggingConfig};
use crate::error::ProxyError;
use chrono::{DateTime, Utc};
use log::{LevelFilter, Metadata, Record};
use serde_json::json;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::sync::Mutex;

pub struct CustomLogger {
    targets: Vec<(LevelFilter, Mutex<BufWriter<Box<dyn Write + Send>>>)>,
    format: LogFormat,
}

impl CustomLogger {
    pub fn new(config: LoggingConfig) -> Result<Self, ProxyError> {
        let format = config.format.unwrap_or_default();
        let default_level = config.level.unwrap_or_default();

        let mut targets = Vec::new();
        for target in config.targets.unwrap_or_else(stdout_target) {
            let writer: Box<dyn Write + Send> = match target.output_type {
                LogOutputType::Stdout => Box::new(std::io::stdout()),
                LogOutputType::File => {
                    let path = target.path.as_ref().ok_or_else(|| {
                        ProxyError::Config("File output type requires path".to_string())
                    })?;
                    let file = OpenOptions::new().create(true).append(true).open(path)?;
                    Box::new(file)
                }
            };
            let level = target.level.unwrap_or(default_level).to_level_filter();
            targets.push((level, Mutex::new(BufWriter::new(writer))));
        }

        Ok(Self { targets, format })
    }

    pub fn init(config: LoggingConfig) -> Result<(), ProxyError> {
        let logger = Self::new(config)?;
        let max_level = logger.max_level();
        log::set_boxed_logger(Box::new(logger))
            .map_err(|e| ProxyError::Config(format!("Failed to install logger: {}", e)))?;
        log::set_max_level(max_level);
        Ok(())
    }

    /// Most verbose level any target accepts.
    pub fn max_level(&self) -> LevelFilter {
        self.targets
            .iter()
            .map(|(level, _)| *level)
            .max()
            .unwrap_or(LevelFilter::Off)
    }

    fn format_text(&self, record: &Record) -> String {
        let timestamp: DateTime<Utc> = Utc::now();
        format!(
            "{} [{}] [{}] {}",
            timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    }

    fn format_json(&self, record: &Record) -> String {
        json_line(record)
    }
}

fn stdout_target() -> Vec<LogTarget> {
    vec![LogTarget {
        output_type: LogOutputType::Stdout,
        path: None,
        level: None,
    }]
}

fn json_line(record: &Record) -> String {
    let timestamp: DateTime<Utc> = Utc::now();
    json!({
        "timestamp": timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        "level": record.level().to_string().to_lowercase(),
        "target": record.target(),
        "module": record.module_path().unwrap_or("unknown"),
        "line": record.line().unwrap_or(0),
        "message": record.args().to_string(),
    })
    .to_string()
}

impl log::Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.targets.iter().any(|(level, _)| metadata.level() <= *level)
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let message = match self.format {
            LogFormat::Text => self.format_text(record),
            LogFormat::Json => self.format_json(record),
        };

        for (level, writer) in &self.targets {
            if record.level() > *level {
                continue;
            }
            if let Ok(mut writer) = writer.lock() {
                let _ = writeln!(writer, "{}", message);
                let _ = writer.flush();
            }
        }
    }

    fn flush(&self) {
        for (_, writer) in &self.targets {
            if let Ok(mut w) = writer.lock() {
                let _ = w.flush();
            }
        }
    }
}

/// env_logger setup used when the config carries no logging block.
/// `RUST_LOG` still overrides the given level.
pub fn init_fallback(log_level: LogLevel, log_format: LogFormat) -> Result<(), ProxyError> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level.to_string()));

    if log_format == LogFormat::Json {
        builder.format(|buf, record| writeln!(buf, "{}", json_line(record)));
    }

    builder
        .try_init()
        .map_err(|e| ProxyError::Config(format!("Failed to install logger: {}", e)))
}

pub fn parse_log_level(s: &str) -> Result<LogLevel, ProxyError> {
    match s.to_lowercase().as_str() {
        "trace" => Ok(LogLevel::Trace),
        "debug" => Ok(LogLevel::Debug),
        "info" => Ok(LogLevel::Info),
        "warn" => Ok(LogLevel::Warn),
        "error" => Ok(LogLevel::Error),
        _ => Err(ProxyError::Config(format!(
            "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
            s
        ))),
    }
}

pub fn parse_log_format(s: &str) -> Result<LogFormat, ProxyError> {
    match s.to_lowercase().as_str() {
        "text" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        _ => Err(ProxyError::Config(format!(
            "Invalid log format: {}. Must be one of: text, json",
            s
        ))),
    }
}
