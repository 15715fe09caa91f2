use clap::Parser;
use edge_relay::config::{Config, LoggingConfig};
use edge_relay::config_validation::ConfigValidator;
use edge_relay::logging::{init_fallback, parse_log_format, parse_log_level, CustomLogger};
use edge_relay::RelayServer;
use log::{error, info, warn};
use std::path::Path;
use tokio::signal;

#[derive(Parser)]
#[clap(
    version,
    about = "Edge relay that fetches /{target-url} and rewrites links in HTML and CSS to stay on the relay"
)]
struct Args {
    #[clap(short, long, value_name = "ADDR", help = "Listen address (e.g., 127.0.0.1:8080)")]
    listen: Option<String>,

    #[clap(short, long, value_name = "FILE", help = "Configuration file path")]
    config: Option<String>,

    #[clap(long, value_name = "URL", help = "Public origin of the relay used in rewritten links")]
    public_base_url: Option<String>,

    #[clap(long, value_name = "SECONDS", help = "Origin connect timeout in seconds")]
    connect_timeout: Option<u64>,

    #[clap(long, value_name = "SECONDS", help = "Origin request timeout in seconds")]
    request_timeout: Option<u64>,

    #[clap(long, value_name = "NUM", help = "Maximum redirects to follow (0 disables following)")]
    max_redirects: Option<usize>,

    #[clap(long, value_name = "NUM", help = "Maximum concurrent client connections")]
    max_connections: Option<usize>,

    #[clap(long, value_name = "BYTES", help = "Largest HTML/CSS body that is rewritten")]
    max_rewrite_body_bytes: Option<usize>,

    #[clap(long, value_name = "BYTES", help = "Largest request body accepted from clients")]
    max_request_body_bytes: Option<usize>,

    #[clap(long, value_name = "LEVEL", help = "Log level: trace, debug, info, warn, error")]
    log_level: Option<String>,

    #[clap(long, value_name = "FORMAT", help = "Log format: text or json")]
    log_format: Option<String>,

    #[clap(long, value_name = "FILE", help = "Generate a sample configuration file")]
    generate_config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(config_file) = &args.generate_config {
        generate_sample_config(config_file)?;
        println!("Sample configuration file generated: {}", config_file);
        return Ok(());
    }

    let mut config = if let Some(config_file) = &args.config {
        if !Path::new(config_file).exists() {
            return Err(format!("Configuration file not found: {}", config_file).into());
        }
        Config::from_file(config_file)?
    } else {
        Config::default()
    };
    apply_args(&mut config, &args)?;

    init_logging(&config, &args)?;

    validate_config(&config)?;

    info!("Starting edge relay...");
    let server = RelayServer::from_config(&config);

    let mut server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!("Server error: {}", e);
        }
    });

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            server_handle.abort();
        }
        result = &mut server_handle => {
            if let Err(e) = result {
                error!("Server task error: {}", e);
            }
        }
    }

    info!("Edge relay stopped");
    Ok(())
}

fn generate_sample_config(file_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let sample = Config {
        public_base_url: Some("https://relay.example.com".to_string()),
        logging: Some(LoggingConfig::default()),
        ..Config::default()
    };
    sample.to_file(file_path)?;
    Ok(())
}

/// CLI flags override values from the config file.
fn apply_args(config: &mut Config, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(listen) = &args.listen {
        config.listen_addr = listen
            .parse()
            .map_err(|e| format!("Invalid listen address '{}': {}", listen, e))?;
    }
    if let Some(base) = &args.public_base_url {
        config.public_base_url = Some(base.clone());
    }
    if let Some(secs) = args.connect_timeout {
        config.connect_timeout_secs = secs;
    }
    if let Some(secs) = args.request_timeout {
        config.request_timeout_secs = secs;
    }
    if let Some(max) = args.max_redirects {
        config.max_redirects = max;
    }
    if let Some(max) = args.max_connections {
        config.max_connections = max;
    }
    if let Some(max) = args.max_rewrite_body_bytes {
        config.max_rewrite_body_bytes = max;
    }
    if let Some(max) = args.max_request_body_bytes {
        config.max_request_body_bytes = max;
    }
    Ok(())
}

fn init_logging(config: &Config, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let level = args.log_level.as_deref().map(parse_log_level).transpose()?;
    let format = args.log_format.as_deref().map(parse_log_format).transpose()?;

    match &config.logging {
        Some(logging) => {
            let mut logging = logging.clone();
            if level.is_some() {
                logging.level = level;
            }
            if format.is_some() {
                logging.format = format;
            }
            CustomLogger::init(logging)?;
        }
        None => init_fallback(level.unwrap_or_default(), format.unwrap_or_default())?,
    }
    Ok(())
}

fn validate_config(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let result = ConfigValidator::new(config).validate();

    for warning in &result.warnings {
        warn!("{}", warning);
    }
    for suggestion in &result.suggestions {
        info!("{}", suggestion);
    }
    if !result.is_valid {
        for e in &result.errors {
            error!("{}", e);
        }
        return Err(format!("Invalid configuration: {}", result.errors.join("; ")).into());
    }
    Ok(())
}
