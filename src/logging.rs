use crate::config::{LogFormat, LogLevel, LogOutputType, LogTarget, LoggingConfig};
use chrono::{DateTime, Local, Utc};
use log::Record;
use serde_json::json;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::sync::Mutex;

/// Sink for the routing and forwarding events reported by the engine.
pub trait EventLog: Send + Sync {
    fn info(&self, message: &str);
    fn error(&self, message: &str);
}

/// Forwards engine events to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogFacade;

impl EventLog for LogFacade {
    fn info(&self, message: &str) {
        log::info!(target: "socks_relay", "{}", message);
    }

    fn error(&self, message: &str) {
        log::error!(target: "socks_relay", "{}", message);
    }
}

impl From<&LogLevel> for log::LevelFilter {
    fn from(level: &LogLevel) -> Self {
        match level {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

pub struct CustomLogger {
    targets: Vec<LogTarget>,
    default_level: log::LevelFilter,
    format: LogFormat,
    writers: Vec<Mutex<BufWriter<Box<dyn Write + Send>>>>,
}

impl CustomLogger {
    pub fn new(config: LoggingConfig, default_level: &LogLevel) -> Result<Self, Box<dyn std::error::Error>> {
        let format = config.format.unwrap_or_default();
        let targets = config.targets.unwrap_or_else(|| {
            vec![LogTarget {
                output_type: LogOutputType::Stdout,
                path: None,
                level: None,
            }]
        });

        let mut writers = Vec::new();

        for target in &targets {
            let writer: Box<dyn Write + Send> = match target.output_type {
                LogOutputType::Stdout => Box::new(std::io::stdout()),
                LogOutputType::File => {
                    let path = target.path.as_ref()
                        .ok_or("File output type requires path")?;
                    let file = OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(path)?;
                    Box::new(file)
                }
            };
            writers.push(Mutex::new(BufWriter::new(writer)));
        }

        Ok(Self {
            targets,
            default_level: config.level.as_ref().unwrap_or(default_level).into(),
            format,
            writers,
        })
    }

    pub fn init(config: LoggingConfig, default_level: &LogLevel) -> Result<(), Box<dyn std::error::Error>> {
        let logger = Self::new(config, default_level)?;
        let max_level = logger.max_level();
        log::set_boxed_logger(Box::new(logger))?;
        log::set_max_level(max_level);
        Ok(())
    }

    fn target_level(&self, target: &LogTarget) -> log::LevelFilter {
        target.level.as_ref().map(log::LevelFilter::from).unwrap_or(self.default_level)
    }

    fn max_level(&self) -> log::LevelFilter {
        self.targets
            .iter()
            .map(|target| self.target_level(target))
            .max()
            .unwrap_or(self.default_level)
    }

    fn format_text(&self, record: &Record) -> String {
        let timestamp: DateTime<Local> = Local::now();
        format!(
            "{} - {} {}",
            timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.level().to_string().to_lowercase(),
            record.args()
        )
    }

    fn format_json(&self, record: &Record) -> String {
        let timestamp: DateTime<Utc> = Utc::now();
        let log_entry = json!({
            "timestamp": timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            "level": record.level().to_string().to_lowercase(),
            "target": record.target(),
            "message": record.args().to_string(),
        });

        serde_json::to_string(&log_entry).unwrap_or_else(|_| {
            json!({"error": "Failed to serialize log entry", "raw_message": record.args().to_string()})
                .to_string()
        })
    }
}

impl log::Log for CustomLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let message = match self.format {
            LogFormat::Text => self.format_text(record),
            LogFormat::Json => self.format_json(record),
        };

        for (i, target) in self.targets.iter().enumerate() {
            if record.level() <= self.target_level(target) {
                if let Ok(mut writer) = self.writers[i].lock() {
                    let _ = writeln!(writer, "{}", message);
                    let _ = writer.flush();
                }
            }
        }
    }

    fn flush(&self) {
        for writer in &self.writers {
            if let Ok(mut w) = writer.lock() {
                let _ = w.flush();
            }
        }
    }
}

/// env_logger based setup used when no `logging` block is configured.
/// `RUST_LOG` still takes precedence over `level`.
pub fn init_fallback(level: &LogLevel) -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level.to_string()))
        .format(|buf, record| {
            let timestamp: DateTime<Local> = Local::now();
            writeln!(
                buf,
                "{} - {} {}",
                timestamp.format("%Y-%m-%d %H:%M:%S"),
                record.level().as_str().to_lowercase(),
                record.args()
            )
        })
        .try_init()?;

    Ok(())
}

pub fn parse_log_level(s: &str) -> Result<LogLevel, Box<dyn std::error::Error>> {
    match s.to_lowercase().as_str() {
        "trace" => Ok(LogLevel::Trace),
        "debug" => Ok(LogLevel::Debug),
        "info" => Ok(LogLevel::Info),
        "warn" => Ok(LogLevel::Warn),
        "error" => Ok(LogLevel::Error),
        _ => Err(format!("Invalid log level: {}. Must be one of: trace, debug, info, warn, error", s).into()),
    }
}

pub fn parse_log_format(s: &str) -> Result<LogFormat, Box<dyn std::error::Error>> {
    match s.to_lowercase().as_str() {
        "text" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        _ => Err(format!("Invalid log format: {}. Must be one of: text, json", s).into()),
    }
}
