//! Bridge configuration from `HAX_BRIDGE_*` environment variables
//!
//! Every setting has a default, so an empty environment yields a working
//! bridge listening on `0.0.0.0:8080`.

use crate::bridge::worker::{CollaboratorFailurePolicy, EntrypointPolicy, RelayWorkerConfig};
use crate::server::ingestion::{DecodeFailurePolicy, IngestionConfig, DEFAULT_MAX_BODY_BYTES};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use thiserror::Error;
use tracing_subscriber::{fmt, EnvFilter};

pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue { var: &'static str, reason: String },
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected 'pretty' or 'json', got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl LoggingConfig {
    /// Install the global tracing subscriber
    pub fn init(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        match self.format {
            LogFormat::Json => fmt().json().with_env_filter(filter).init(),
            LogFormat::Pretty => fmt().with_env_filter(filter).init(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub listen_addr: SocketAddr,
    pub ingestion: IngestionConfig,
    pub worker: RelayWorkerConfig,
    pub logging: LoggingConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            ingestion: IngestionConfig::default(),
            worker: RelayWorkerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read the configuration through `lookup`, which maps a variable name to its value
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let bind: IpAddr = parse_var(&lookup, "HAX_BRIDGE_BIND")?
            .unwrap_or_else(|| defaults.listen_addr.ip());
        let port: u16 = parse_var(&lookup, "HAX_BRIDGE_PORT")?.unwrap_or(DEFAULT_PORT);

        let max_body_bytes: usize =
            parse_var(&lookup, "HAX_BRIDGE_MAX_BODY_BYTES")?.unwrap_or(DEFAULT_MAX_BODY_BYTES);
        if max_body_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                var: "HAX_BRIDGE_MAX_BODY_BYTES",
                reason: "must be greater than zero".to_string(),
            });
        }

        let decode_failure: DecodeFailurePolicy =
            parse_var(&lookup, "HAX_BRIDGE_DECODE_FAILURE")?.unwrap_or_default();
        let entrypoint_policy: EntrypointPolicy =
            parse_var(&lookup, "HAX_BRIDGE_ENTRYPOINT_POLICY")?.unwrap_or_default();
        let failure_policy: CollaboratorFailurePolicy =
            parse_var(&lookup, "HAX_BRIDGE_COLLABORATOR_FAILURE")?.unwrap_or_default();

        let level = lookup("HAX_BRIDGE_LOG_LEVEL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.logging.level);
        let format: LogFormat = parse_var(&lookup, "HAX_BRIDGE_LOG_FORMAT")?.unwrap_or_default();

        Ok(Self {
            listen_addr: SocketAddr::new(bind, port),
            ingestion: IngestionConfig {
                max_body_bytes,
                decode_failure,
            },
            worker: RelayWorkerConfig {
                entrypoint_policy,
                failure_policy,
            },
            logging: LoggingConfig { level, format },
        })
    }
}

/// Parse an optional variable; unset or blank means "use the default"
fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                var,
                reason: e.to_string(),
            }),
        _ => Ok(None),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
