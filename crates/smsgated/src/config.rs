//! Daemon configuration.
//!
//! Settings come from four layers, highest first: command line, environment,
//! an optional TOML file (`--config`), built-in defaults. Clap resolves the
//! first two; [`Config::load`] merges the rest.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use thiserror::Error;

use crate::gateway::GatewaySettings;
use crate::service::codes::DEFAULT_STORE_TIMEOUT;

pub const DEFAULT_PORT: u16 = 5051;
pub const DEFAULT_REDIS_HOST: &str = "127.0.0.1";
pub const DEFAULT_REDIS_PORT: u16 = 6379;
pub const DEFAULT_ALLOWED_ORIGINS: [&str; 2] = ["http://localhost", "http://95.85.97.202"];
pub const DEFAULT_HEADER_READ_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Code store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Redis,
    /// In-process map; codes do not survive a restart
    Memory,
}

/// smsgate daemon - one-time codes and SMS relay to delivery workers
#[derive(Parser, Debug, Default)]
#[command(name = "smsgated", version, about)]
pub struct Args {
    /// TOML config file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, env = "SMSGATE_BIND")]
    pub bind: Option<IpAddr>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Redis host
    #[arg(long, env = "REDIS_HOST")]
    pub redis_host: Option<String>,

    /// Redis port
    #[arg(long, env = "REDIS_PORT")]
    pub redis_port: Option<u16>,

    /// Redis password
    #[arg(long, env = "REDIS_PASSWORD", hide_env_values = true)]
    pub redis_password: Option<String>,

    /// Code store backend
    #[arg(long, env = "SMSGATE_STORE", value_enum)]
    pub store: Option<StoreBackend>,

    /// Deadline for a single store call, in milliseconds
    #[arg(long)]
    pub store_timeout_ms: Option<u64>,

    /// Origin allowed to open realtime connections (repeatable)
    #[arg(
        long = "allowed-origin",
        env = "SMSGATE_ALLOWED_ORIGINS",
        value_delimiter = ','
    )]
    pub allowed_origins: Vec<String>,

    /// Interval between websocket pings, in seconds
    #[arg(long)]
    pub ping_interval_secs: Option<u64>,

    /// Silence tolerated after a ping, in seconds
    #[arg(long)]
    pub ping_timeout_secs: Option<u64>,

    /// How long a long-poll request waits, in seconds
    #[arg(long)]
    pub poll_timeout_secs: Option<u64>,

    /// Per-connection outbox size
    #[arg(long)]
    pub outbox_capacity: Option<usize>,

    /// Emit logs as JSON lines (`--json-logs=false` overrides the file)
    #[arg(
        long,
        env = "SMSGATE_JSON_LOGS",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    pub json_logs: Option<bool>,
}

/// Contents of the optional TOML file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub bind: Option<IpAddr>,
    pub port: Option<u16>,
    pub store: Option<StoreBackend>,
    pub store_timeout_ms: Option<u64>,
    pub allowed_origins: Option<Vec<String>>,
    pub json_logs: Option<bool>,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub redis: RedisSection,
    #[serde(default)]
    pub realtime: RealtimeSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpSection {
    pub header_read_timeout_secs: Option<u64>,
    pub shutdown_grace_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RealtimeSection {
    pub ping_interval_secs: Option<u64>,
    pub ping_timeout_secs: Option<u64>,
    pub poll_timeout_secs: Option<u64>,
    pub outbox_capacity: Option<usize>,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Redis connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

impl RedisSettings {
    /// Connection URL, e.g. `redis://:secret@127.0.0.1:6379/`.
    pub fn url(&self) -> String {
        match self.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => format!("redis://:{password}@{}:{}/", self.host, self.port),
            None => format!("redis://{}:{}/", self.host, self.port),
        }
    }
}

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: IpAddr,
    pub port: u16,
    pub redis: RedisSettings,
    pub store: StoreBackend,
    pub store_timeout: Duration,
    pub allowed_origins: Vec<String>,
    pub gateway: GatewaySettings,
    pub json_logs: bool,

    /// Max time for a client to send a full request head
    pub header_read_timeout: Duration,

    /// How long shutdown waits for in-flight requests before dropping them
    pub shutdown_grace: Duration,
}

impl Config {
    /// Resolves `args` against the config file it names, if any.
    pub fn load(args: Args) -> Result<Self, ConfigError> {
        let file = match &args.config {
            Some(path) => FileConfig::from_file(path)?,
            None => FileConfig::default(),
        };
        Self::resolve(args, file)
    }

    /// Merges command line/env values over file values over defaults.
    pub fn resolve(args: Args, file: FileConfig) -> Result<Self, ConfigError> {
        let defaults = GatewaySettings::default();
        let realtime = file.realtime;

        let gateway = GatewaySettings {
            ping_interval: args
                .ping_interval_secs
                .or(realtime.ping_interval_secs)
                .map_or(defaults.ping_interval, Duration::from_secs),
            ping_timeout: args
                .ping_timeout_secs
                .or(realtime.ping_timeout_secs)
                .map_or(defaults.ping_timeout, Duration::from_secs),
            poll_timeout: args
                .poll_timeout_secs
                .or(realtime.poll_timeout_secs)
                .map_or(defaults.poll_timeout, Duration::from_secs),
            outbox_capacity: args
                .outbox_capacity
                .or(realtime.outbox_capacity)
                .unwrap_or(defaults.outbox_capacity),
        };

        let allowed_origins = if !args.allowed_origins.is_empty() {
            args.allowed_origins
        } else if let Some(origins) = file.allowed_origins {
            origins
        } else {
            DEFAULT_ALLOWED_ORIGINS.iter().map(|o| o.to_string()).collect()
        };

        let config = Self {
            bind: args
                .bind
                .or(file.bind)
                .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            port: args.port.or(file.port).unwrap_or(DEFAULT_PORT),
            redis: RedisSettings {
                host: args
                    .redis_host
                    .or(file.redis.host)
                    .unwrap_or_else(|| DEFAULT_REDIS_HOST.to_string()),
                port: args
                    .redis_port
                    .or(file.redis.port)
                    .unwrap_or(DEFAULT_REDIS_PORT),
                password: args.redis_password.or(file.redis.password),
            },
            store: args.store.or(file.store).unwrap_or_default(),
            store_timeout: args
                .store_timeout_ms
                .or(file.store_timeout_ms)
                .map_or(DEFAULT_STORE_TIMEOUT, Duration::from_millis),
            allowed_origins,
            gateway,
            json_logs: args.json_logs.or(file.json_logs).unwrap_or(false),
            header_read_timeout: file
                .http
                .header_read_timeout_secs
                .map_or(DEFAULT_HEADER_READ_TIMEOUT, Duration::from_secs),
            shutdown_grace: file
                .http
                .shutdown_grace_secs
                .map_or(DEFAULT_SHUTDOWN_GRACE, Duration::from_secs),
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.ping_interval.is_zero() {
            return Err(ConfigError::Invalid("ping interval must be positive".into()));
        }
        if self.gateway.outbox_capacity == 0 {
            return Err(ConfigError::Invalid("outbox capacity must be positive".into()));
        }
        if self.store_timeout.is_zero() {
            return Err(ConfigError::Invalid("store timeout must be positive".into()));
        }
        if self.header_read_timeout.is_zero() {
            return Err(ConfigError::Invalid("header read timeout must be positive".into()));
        }
        // A pending poll must return before the reaper considers it silent.
        if self.gateway.poll_timeout >= self.gateway.idle_timeout() {
            return Err(ConfigError::Invalid(format!(
                "poll timeout {:?} must be shorter than ping interval + ping timeout ({:?})",
                self.gateway.poll_timeout,
                self.gateway.idle_timeout()
            )));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

/// Errors that can occur loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
