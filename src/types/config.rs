//! Configuration structures.
//!
//! Every section has serde defaults, so an empty JSON object is a valid config.
//! `Config::load` reads an optional JSON file named by `MASTER_CONFIG`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::errors::{Error, Result};

/// Environment variable naming an optional JSON config file.
pub const CONFIG_PATH_ENV: &str = "MASTER_CONFIG";

const REDACTED: &str = "********";

/// Global master configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Human-readable cluster name advertised on `/info`.
    #[serde(default)]
    pub cluster_name: String,

    /// Network listener configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// TLS material and API credentials.
    #[serde(default)]
    pub security: SecurityConfig,

    /// Binary RPC transport configuration.
    #[serde(default)]
    pub rpc: RpcConfig,

    /// Actor runtime timeouts.
    #[serde(default)]
    pub actors: ActorConfig,

    /// Telemetry advertisement.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// SAML single-sign-on advertisement.
    #[serde(default)]
    pub saml: SamlConfig,

    /// Trial log batching.
    #[serde(default)]
    pub trial_logger: TrialLoggerConfig,

    /// Number of master log entries retained in memory.
    #[serde(default = "default_log_buffer_capacity")]
    pub log_buffer_capacity: usize,

    /// Add permissive CORS headers to HTTP responses.
    #[serde(default)]
    pub enable_cors: bool,
}

fn default_log_buffer_capacity() -> usize {
    25_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster_name: String::new(),
            server: ServerConfig::default(),
            security: SecurityConfig::default(),
            rpc: RpcConfig::default(),
            actors: ActorConfig::default(),
            telemetry: TelemetryConfig::default(),
            saml: SamlConfig::default(),
            trial_logger: TrialLoggerConfig::default(),
            log_buffer_capacity: default_log_buffer_capacity(),
            enable_cors: false,
        }
    }
}

impl Config {
    /// Load from the file named by `MASTER_CONFIG`, or fall back to defaults.
    pub fn load() -> Result<Self> {
        match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::from_file(PathBuf::from(path)),
            None => Ok(Self::default()),
        }
    }

    /// Parse a JSON config file.
    pub fn from_file(path: PathBuf) -> Result<Self> {
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            Error::internal(format!("could not read config {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that parse but cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.trial_logger.flush_interval.is_zero() {
            return Err(Error::bad_request(
                "trial_logger.flush_interval must be greater than zero",
            ));
        }
        Ok(())
    }

    /// JSON view of the config with credentials redacted.
    pub fn printable(&self) -> Result<serde_json::Value> {
        let mut value = serde_json::to_value(self)?;
        if let Some(tokens) = value
            .pointer_mut("/security/api_tokens")
            .and_then(|v| v.as_array_mut())
        {
            for token in tokens.iter_mut() {
                *token = serde_json::Value::String(REDACTED.to_string());
            }
        }
        if let Some(key) = value.pointer_mut("/telemetry/segment_webui_key") {
            if key.as_str().is_some_and(|k| !k.is_empty()) {
                *key = serde_json::Value::String(REDACTED.to_string());
            }
        }
        Ok(value)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host/interface to bind.
    pub bind_host: String,

    /// TCP port shared by the RPC and HTTP servers.
    pub port: u16,

    /// How long a new connection may take to reveal its protocol
    /// (including the TLS handshake).
    #[serde(with = "humantime_serde")]
    pub sniff_timeout: Duration,

    /// Upper bound on bytes buffered while sniffing a connection.
    pub max_sniff_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 8080,
            sniff_timeout: Duration::from_secs(10),
            max_sniff_bytes: 8 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }
}

/// Security configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecurityConfig {
    /// TLS certificate and key; TLS is enabled when both are set.
    #[serde(default)]
    pub tls: TlsConfig,

    /// Bearer tokens accepted on authenticated routes.
    #[serde(default)]
    pub api_tokens: Vec<String>,
}

/// PEM file locations for TLS termination.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TlsConfig {
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

impl TlsConfig {
    pub fn enabled(&self) -> bool {
        self.cert.is_some() && self.key.is_some()
    }
}

/// Binary RPC transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Maximum frame payload size in bytes.
    pub max_frame_bytes: u32,

    /// Maximum concurrent RPC connections. Connections beyond this limit
    /// are closed immediately.
    pub max_connections: usize,

    /// Idle read timeout per frame.
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,

    /// Write timeout per frame.
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 5 * 1024 * 1024,
            max_connections: 1000,
            read_timeout: Duration::from_secs(300),
            write_timeout: Duration::from_secs(10),
        }
    }
}

/// Actor runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorConfig {
    /// Default bound for request/response asks.
    #[serde(with = "humantime_serde")]
    pub ask_timeout: Duration,

    /// Bound on how long a lock session waits in the queue before giving up.
    #[serde(with = "humantime_serde")]
    pub lock_ask_timeout: Duration,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            ask_timeout: Duration::from_secs(2),
            lock_ask_timeout: Duration::from_secs(2),
        }
    }
}

/// Telemetry advertisement.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    #[serde(default)]
    pub segment_webui_key: String,
}

/// SAML advertisement.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SamlConfig {
    pub enabled: bool,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub idp_recipient_url: String,
}

/// Trial log batching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialLoggerConfig {
    /// Flush once this many records are buffered.
    pub batch_size: usize,

    /// Flush at least this often.
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,
}

impl Default for TrialLoggerConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            flush_interval: Duration::from_secs(1),
        }
    }
}
