use anyhow::{bail, Context};
use clap::Parser;
use log::{info, warn};
use socks_relay::config::{Config, ConfigOverrides, ProxyRuleConfig};
use socks_relay::config_validation::ConfigValidator;
use socks_relay::logging::{self, CustomLogger};
use socks_relay::ProxyServer;
use std::path::Path;
use tokio::signal;

#[derive(Parser)]
#[clap(
    version,
    about = "HTTP proxy that forwards requests directly or through SOCKS5 upstreams chosen by hostname rules"
)]
struct Args {
    #[clap(short, long, value_name = "SOCKS", help = "Upstream socks proxy line, default: 127.0.0.1:1080")]
    socks: Option<String>,

    #[clap(short, long, value_name = "PORT", help = "Listening port of the http proxy server, default: 8080")]
    port: Option<u16>,

    #[clap(short = 'l', long, value_name = "HOST", help = "Listening host of the http proxy server, default: 127.0.0.1")]
    host: Option<String>,

    #[clap(short, long, value_name = "CONFIG", help = "Path to a json config file or the json config as string")]
    config: Option<String>,

    #[clap(long, value_name = "LEVEL", help = "Log level: trace, debug, info, warn, error")]
    level: Option<String>,

    #[clap(long, value_name = "SECONDS", help = "Upstream connect/handshake timeout in seconds, 0 disables it")]
    connect_timeout: Option<u64>,

    #[clap(long, value_name = "FILE", help = "Generate a sample configuration file")]
    generate_config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Some(config_file) = &args.generate_config {
        generate_sample_config(config_file)?;
        println!("Sample configuration file generated: {}", config_file);
        return Ok(());
    }

    let config = load_config(&args)?;

    init_logging(&config)?;

    let validation = ConfigValidator::validate(&config);
    for warning in &validation.warnings {
        warn!("{}", warning);
    }
    if !validation.is_valid {
        bail!("Invalid configuration:\n  {}", validation.errors.join("\n  "));
    }

    for proxy in &config.proxies {
        info!(
            "socks target: {}, whitelist: '{}', blacklist: '{}'",
            proxy.socks,
            proxy.whitelist.as_deref().unwrap_or_default().join(","),
            proxy.blacklist.as_deref().unwrap_or_default().join(",")
        );
    }

    let server = ProxyServer::from_config(&config).context("Failed to build routing rules")?;
    let server_handle = tokio::spawn(server.run());

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
        result = server_handle => {
            result.context("Server task failed")??;
        }
    }

    info!("Proxy server stopped");
    Ok(())
}

/// Defaults, then command-line options, then the config file on top.
fn load_config(args: &Args) -> anyhow::Result<Config> {
    let level = args
        .level
        .as_deref()
        .map(logging::parse_log_level)
        .transpose()
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    let cli = ConfigOverrides {
        host: args.host.clone(),
        port: args.port,
        proxies: args.socks.clone().map(|line| vec![ProxyRuleConfig::socks(line)]),
        level,
        connect_timeout_secs: args.connect_timeout,
        logging: None,
    };

    let overrides = match &args.config {
        Some(value) => {
            if !value.trim_start().starts_with('{') && !Path::new(value).exists() {
                bail!("Configuration file not found: {}", value);
            }
            cli.merge(Config::load_overrides(value)?)
        }
        None => cli,
    };

    Ok(overrides.into_config())
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
    let result = match &config.logging {
        Some(logging_config) => CustomLogger::init(logging_config.clone(), &config.level),
        None => logging::init_fallback(&config.level),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

fn generate_sample_config(file_path: &str) -> anyhow::Result<()> {
    Config::sample()
        .to_file(file_path)
        .with_context(|| format!("Failed to write {}", file_path))
}
