use crate::error::{RelayError, Result};
use crate::relay::{MalformedPolicy, OverflowPolicy, DEFAULT_QUEUE_CAPACITY};
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Listener configuration
    pub server: ServerConfig,
    /// Relay behavior
    pub relay: RelayConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Port to bind to (default: 8080)
    pub port: u16,
}

impl ServerConfig {
    /// Get the listener address
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Outbound queue slots per client (default: 10)
    pub queue_capacity: usize,
    /// What a full queue does with new payloads
    pub overflow_policy: OverflowPolicy,
    /// What happens after a frame fails to decode
    pub malformed_policy: MalformedPolicy,
    /// Whether a sender receives its own messages
    pub echo_to_sender: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow_policy: OverflowPolicy::default(),
            malformed_policy: MalformedPolicy::default(),
            echo_to_sender: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let queue_capacity: usize = get_env_or("RELAY_QUEUE_CAPACITY", "10")
            .parse()
            .map_err(|_| {
                RelayError::InvalidConfig("RELAY_QUEUE_CAPACITY must be a valid number".into())
            })?;
        if queue_capacity == 0 {
            return Err(RelayError::InvalidConfig(
                "RELAY_QUEUE_CAPACITY must be at least 1".into(),
            ));
        }

        let overflow_raw = get_env_or("RELAY_OVERFLOW_POLICY", "drop_oldest");
        let overflow_policy = OverflowPolicy::from_str(&overflow_raw).ok_or_else(|| {
            RelayError::InvalidConfig(format!(
                "RELAY_OVERFLOW_POLICY has unsupported value: {}",
                overflow_raw
            ))
        })?;

        let malformed_raw = get_env_or("RELAY_MALFORMED_POLICY", "disconnect");
        let malformed_policy = MalformedPolicy::from_str(&malformed_raw).ok_or_else(|| {
            RelayError::InvalidConfig(format!(
                "RELAY_MALFORMED_POLICY has unsupported value: {}",
                malformed_raw
            ))
        })?;

        let log_format = get_env_or("LOG_FORMAT", "json").to_lowercase();
        if log_format != "json" && log_format != "pretty" {
            return Err(RelayError::InvalidConfig(format!(
                "LOG_FORMAT must be json or pretty, got: {}",
                log_format
            )));
        }

        Ok(Config {
            server: ServerConfig {
                host: get_env_or("RELAY_HOST", "0.0.0.0"),
                port: get_env_or("RELAY_PORT", "8080").parse().map_err(|_| {
                    RelayError::InvalidConfig("RELAY_PORT must be a valid port number".into())
                })?,
            },
            relay: RelayConfig {
                queue_capacity,
                overflow_policy,
                malformed_policy,
                echo_to_sender: get_env_or("RELAY_ECHO_TO_SENDER", "true")
                    .parse()
                    .map_err(|_| {
                        RelayError::InvalidConfig("RELAY_ECHO_TO_SENDER must be true or false".into())
                    })?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: log_format,
            },
        })
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
