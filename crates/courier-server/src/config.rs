//! Server configuration.
//!
//! Configuration is layered:
//! - TOML configuration file (first one found on the search path)
//! - Environment variables (`COURIER_*`, `__` separates nesting)

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use courier_core::{GatewayConfig, HmacTokenValidator, HubConfig, Identity, MemoryKeyDirectory};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Secret used when none is configured. Never use it in production.
pub const DEVELOPMENT_SECRET: &str = "courier-development-secret";

const CONFIG_PATHS: [&str; 3] = [
    "courier.toml",
    "/etc/courier/courier.toml",
    "~/.config/courier/courier.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Token validation.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Public keys served by `/keys`, identity -> base64 key.
    #[serde(default)]
    pub keys: HashMap<String, String>,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Outbound queue capacity per session. A recipient whose queue fills
    /// up is disconnected.
    #[serde(default = "default_session_queue_capacity")]
    pub session_queue_capacity: usize,

    /// Capacity of the hub event queue.
    #[serde(default = "default_hub_event_capacity")]
    pub hub_event_capacity: usize,
}

/// Authentication configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 signing secret.
    #[serde(default = "default_secret")]
    pub secret: String,

    /// Lifetime of issued tokens in seconds.
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    100_000
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_session_queue_capacity() -> usize {
    courier_core::session::DEFAULT_QUEUE_CAPACITY
}

fn default_hub_event_capacity() -> usize {
    courier_core::hub::DEFAULT_EVENT_CAPACITY
}

fn default_secret() -> String {
    DEVELOPMENT_SECRET.to_string()
}

fn default_token_ttl() -> u64 {
    courier_core::auth::DEFAULT_TOKEN_TTL.as_secs()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            auth: AuthConfig::default(),
            keys: HashMap::new(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
            session_queue_capacity: default_session_queue_capacity(),
            hub_event_capacity: default_hub_event_capacity(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: default_secret(),
            token_ttl_secs: default_token_ttl(),
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &"[redacted]")
            .field("token_ttl_secs", &self.token_ttl_secs)
            .finish()
    }
}

impl AuthConfig {
    /// Whether the built-in development secret is in use.
    #[must_use]
    pub fn uses_development_secret(&self) -> bool {
        self.secret == DEVELOPMENT_SECRET
    }

    /// Token lifetime.
    #[must_use]
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    /// Build the token validator.
    #[must_use]
    pub fn validator(&self) -> HmacTokenValidator {
        HmacTokenValidator::new(&self.secret)
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first file on the search path, with
    /// `COURIER_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// override has the wrong type.
    pub fn load() -> Result<Self> {
        Self::load_from(Self::find_file().as_deref())
    }

    /// Load configuration from an optional file, with environment overrides.
    ///
    /// The `keys` table is taken from the file verbatim: identities are
    /// case-sensitive and the layered loader folds map keys to lowercase.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        let mut config: Config = builder
            .add_source(
                config::Environment::with_prefix("COURIER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        if let Some(path) = path {
            config.keys = Self::from_file(path)?.keys;
        }

        Ok(config)
    }

    /// Load configuration from a specific file, without environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    fn find_file() -> Option<PathBuf> {
        CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Hub settings.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            event_capacity: self.limits.hub_event_capacity,
        }
    }

    /// Gateway settings.
    #[must_use]
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            session_queue_capacity: self.limits.session_queue_capacity,
        }
    }

    /// Build the key directory from the `keys` table.
    ///
    /// # Errors
    ///
    /// Returns an error if a key is not valid base64.
    pub fn key_directory(&self) -> Result<MemoryKeyDirectory> {
        let directory = MemoryKeyDirectory::new();
        for (identity, key) in &self.keys {
            let identity = Identity::from(identity.as_str());
            if key.is_empty() {
                directory.enroll(identity);
                continue;
            }
            let key = STANDARD
                .decode(key)
                .with_context(|| format!("Invalid base64 public key for {}", identity))?;
            directory.publish(identity, key);
        }
        Ok(directory)
    }
}
