use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use txlog_services::cached_writer::{
    DEFAULT_BATCH_SIZE, DEFAULT_INTERVAL, DEFAULT_RETRIES, UnknownShutdownMode,
};
use txlog_services::{ConnConfig, ShutdownMode, WriterSettings};

const UNIX_PREFIX: &str = "unix:";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable must be set")]
    Missing(&'static str),
    #[error("invalid {name} value {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error(transparent)]
    ShutdownMode(#[from] UnknownShutdownMode),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    Tcp(String),
    Unix(PathBuf),
}

impl ListenAddr {
    fn parse(raw: &str) -> Self {
        if let Some(path) = raw.strip_prefix(UNIX_PREFIX) {
            ListenAddr::Unix(PathBuf::from(path))
        } else if raw.starts_with(':') {
            ListenAddr::Tcp(format!("0.0.0.0{raw}"))
        } else {
            ListenAddr::Tcp(raw.to_string())
        }
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenAddr::Tcp(addr) => write!(f, "{addr}"),
            ListenAddr::Unix(path) => write!(f, "{UNIX_PREFIX}{}", path.display()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen: ListenAddr,
    pub db: ConnConfig,
    pub dialect: Option<String>,
    pub req_failed_file: PathBuf,
    pub db_failed_file: PathBuf,
    pub log_file_mode: u32,
    pub debug: bool,
    pub writer: WriterSettings,
    pub shutdown_mode: ShutdownMode,
    pub shutdown_grace: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| env::var(name).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| var(name).filter(|v| !v.trim().is_empty());

        let listen = ListenAddr::parse(&var("LISTEN").unwrap_or_else(|| ":80".to_string()));

        let driver = var("DB_DRIVER").ok_or(ConfigError::Missing("DB_DRIVER"))?;
        let dsn = var("DB_DSN").ok_or(ConfigError::Missing("DB_DSN"))?;

        let log_file_mode = match var("LOG_FILE_MODE") {
            Some(raw) => u32::from_str_radix(raw.trim().trim_start_matches("0o"), 8).map_err(|_| {
                ConfigError::Invalid {
                    name: "LOG_FILE_MODE",
                    value: raw.clone(),
                }
            })?,
            None => 0o644,
        };

        let debug = match var("LOG_DEBUG") {
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "LOG_DEBUG",
                        value: raw,
                    });
                }
            },
            None => false,
        };

        let writer = WriterSettings {
            retries: parse_or(&var, "MAX_RETRIES", DEFAULT_RETRIES)?,
            interval: Duration::from_secs(parse_or(&var, "INTERVAL", DEFAULT_INTERVAL.as_secs())?),
            batch_size: parse_or(&var, "BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            ..WriterSettings::default()
        };
        if writer.interval.is_zero() {
            return Err(ConfigError::Invalid {
                name: "INTERVAL",
                value: "0".into(),
            });
        }

        let shutdown_mode = match var("SHUTDOWN_MODE") {
            Some(raw) => raw.parse()?,
            None => ShutdownMode::default(),
        };

        Ok(Self {
            listen,
            db: ConnConfig::new(driver, dsn),
            dialect: var("DB_DIALECT"),
            req_failed_file: var("REQ_FAILED_FILE")
                .unwrap_or_else(|| "failed_req.log".to_string())
                .into(),
            db_failed_file: var("DB_FAILED_FILE")
                .unwrap_or_else(|| "failed_db.log".to_string())
                .into(),
            log_file_mode,
            debug,
            writer,
            shutdown_mode,
            shutdown_grace: Duration::from_secs(parse_or(&var, "SHUTDOWN_GRACE", 10)?),
        })
    }
}

fn parse_or<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match var(name) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { name, value: raw }),
        None => Ok(default),
    }
}
