use crate::error::ProxyError;
use crate::rules::RuleSet;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        LogFormat::Text
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutputType {
    Stdout,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogTarget {
    #[serde(rename = "type")]
    pub output_type: LogOutputType,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub level: Option<LogLevel>,
}

/// Optional structured logging block; without it env_logger is used.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: Option<LogLevel>,
    #[serde(default)]
    pub format: Option<LogFormat>,
    #[serde(default)]
    pub targets: Option<Vec<LogTarget>>,
}

/// One routing rule as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyRuleConfig {
    /// Proxy line: `host:port`, `host:port:user:pass` or `user:pass@host:port`
    pub socks: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whitelist: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blacklist: Option<Vec<String>>,
}

impl ProxyRuleConfig {
    pub fn socks(line: impl Into<String>) -> Self {
        Self {
            socks: line.into(),
            whitelist: None,
            blacklist: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_proxies() -> Vec<ProxyRuleConfig> {
    vec![ProxyRuleConfig::socks("127.0.0.1:1080")]
}

fn default_connect_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_proxies")]
    pub proxies: Vec<ProxyRuleConfig>,
    #[serde(default)]
    pub level: LogLevel,
    // 0 disables the upstream connect/handshake timeout
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            proxies: default_proxies(),
            level: LogLevel::default(),
            connect_timeout_secs: default_connect_timeout(),
            logging: None,
        }
    }
}

/// Values that may come from the command line. Every field is optional so a
/// config file can be layered on top.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxies: Option<Vec<ProxyRuleConfig>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

impl ConfigOverrides {
    /// Fields set in `other` win.
    pub fn merge(mut self, other: ConfigOverrides) -> Self {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.proxies.is_some() {
            self.proxies = other.proxies;
        }
        if other.level.is_some() {
            self.level = other.level;
        }
        if other.connect_timeout_secs.is_some() {
            self.connect_timeout_secs = other.connect_timeout_secs;
        }
        if other.logging.is_some() {
            self.logging = other.logging;
        }
        self
    }

    pub fn into_config(self) -> Config {
        let defaults = Config::default();
        Config {
            host: self.host.unwrap_or(defaults.host),
            port: self.port.unwrap_or(defaults.port),
            proxies: self.proxies.unwrap_or(defaults.proxies),
            level: self.level.unwrap_or(defaults.level),
            connect_timeout_secs: self.connect_timeout_secs.unwrap_or(defaults.connect_timeout_secs),
            logging: self.logging.or(defaults.logging),
        }
    }
}

impl Config {
    /// Reads `value` as inline JSON when it starts with `{`, otherwise as a
    /// path to a JSON file.
    pub fn load_overrides(value: &str) -> Result<ConfigOverrides, ProxyError> {
        let content = if value.trim_start().starts_with('{') {
            value.to_string()
        } else {
            std::fs::read_to_string(value)
                .map_err(|e| ProxyError::Config(format!("Failed to read config file {}: {}", value, e)))?
        };

        serde_json::from_str(&content)
            .map_err(|e| ProxyError::Config(format!("invalid json content: {}", e)))
    }

    pub fn from_file(path: &str) -> Result<Self, ProxyError> {
        Ok(Self::load_overrides(path)?.into_config())
    }

    pub fn to_file(&self, path: &str) -> Result<(), ProxyError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Configuration written by `--generate-config`.
    pub fn sample() -> Self {
        Self {
            proxies: vec![
                ProxyRuleConfig {
                    socks: "127.0.0.1:1080".to_string(),
                    whitelist: Some(vec!["google\\.com$".to_string(), "\\.org$".to_string()]),
                    blacklist: None,
                },
                ProxyRuleConfig {
                    socks: "user:password@10.0.0.2:1080".to_string(),
                    whitelist: None,
                    blacklist: Some(vec!["^github\\.com$".to_string()]),
                },
            ],
            ..Self::default()
        }
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ProxyError> {
        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        let ip: IpAddr = match host {
            "localhost" => Ipv4Addr::LOCALHOST.into(),
            other => other
                .parse()
                .map_err(|_| ProxyError::Config(format!("Invalid listen host: {}", self.host)))?,
        };
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        match self.connect_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn rule_set(&self) -> Result<RuleSet, ProxyError> {
        RuleSet::from_config(&self.proxies)
    }
}
