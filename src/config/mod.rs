use alloy::primitives::Address;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

use crate::onchain::parse_address;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required env var: {0}")]
    MissingEnv(String),
    #[error("invalid address for {field}: {value:?}")]
    InvalidAddress { field: &'static str, value: String },
    #[error("invalid bind address {0:?}")]
    InvalidBind(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Node WebSocket endpoint, used for calls and log subscriptions.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// ArbiterRegistry contract - env ARBITER_REGISTRY_ADDRESS
    #[serde(default)]
    pub arbiter_registry: String,
    /// EscrowFactory contract - env ESCROW_FACTORY_ADDRESS
    #[serde(default)]
    pub escrow_factory: String,
    /// UserProfile contract - env USER_PROFILE_ADDRESS. Not read yet.
    #[serde(default)]
    pub user_profile: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Create missing tables and indexes at startup.
    #[serde(default = "default_true")]
    pub ensure_schema: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// How long in-flight requests may take to finish after shutdown starts.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Run a full arbiter and deal sync in the background at startup.
    #[serde(default = "default_true")]
    pub on_startup: bool,
    #[serde(default = "default_probe_limit")]
    pub arbiter_probe_limit: u64,
    /// Skip (true) or abort on (false) a single entity failing during a sync.
    #[serde(default = "default_true")]
    pub continue_on_entity_error: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_ws_url() -> String {
    "ws://127.0.0.1:8545".to_string()
}
fn default_backend() -> StoreBackend {
    StoreBackend::Postgres
}
fn default_database_url() -> String {
    "postgres://postgres@localhost:5432/postgres".to_string()
}
fn default_max_connections() -> u32 {
    10
}
fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_shutdown_grace() -> u64 {
    30
}
fn default_channel_capacity() -> usize {
    100
}
fn default_probe_limit() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            arbiter_registry: String::new(),
            escrow_factory: String::new(),
            user_profile: String::new(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: default_database_url(),
            max_connections: default_max_connections(),
            ensure_schema: true,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            on_startup: true,
            arbiter_probe_limit: default_probe_limit(),
            continue_on_entity_error: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Contract and socket addresses after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAddresses {
    pub arbiter_registry: Address,
    pub escrow_factory: Address,
    pub user_profile: Address,
    pub bind: SocketAddr,
}

impl Config {
    /// Load config from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.apply_env();
        Ok(config)
    }

    /// Defaults plus environment variables (no file needed).
    pub fn from_env() -> Self {
        let mut config = Config {
            chain: ChainConfig::default(),
            database: DatabaseConfig::default(),
            api: ApiConfig::default(),
            events: EventsConfig::default(),
            sync: SyncConfig::default(),
            logging: LoggingConfig::default(),
        };
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("WS_URL") {
            self.chain.ws_url = url;
        }
        if let Ok(addr) = std::env::var("ARBITER_REGISTRY_ADDRESS") {
            self.chain.arbiter_registry = addr;
        }
        if let Ok(addr) = std::env::var("ESCROW_FACTORY_ADDRESS") {
            self.chain.escrow_factory = addr;
        }
        if let Ok(addr) = std::env::var("USER_PROFILE_ADDRESS") {
            self.chain.user_profile = addr;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(bind) = std::env::var("API_BIND") {
            self.api.bind = bind;
        }
    }

    /// Validate the contract addresses and the bind address. The registry and
    /// factory are required; the profile contract defaults to zero.
    pub fn resolve(&self) -> Result<ResolvedAddresses, ConfigError> {
        let arbiter_registry = required_address(
            "ARBITER_REGISTRY_ADDRESS",
            &self.chain.arbiter_registry,
        )?;
        let escrow_factory =
            required_address("ESCROW_FACTORY_ADDRESS", &self.chain.escrow_factory)?;

        let user_profile = if self.chain.user_profile.trim().is_empty() {
            Address::ZERO
        } else {
            parse_address(self.chain.user_profile.trim()).ok_or_else(|| ConfigError::InvalidAddress {
                field: "USER_PROFILE_ADDRESS",
                value: self.chain.user_profile.clone(),
            })?
        };

        let bind = self
            .api
            .bind
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidBind(self.api.bind.clone()))?;

        Ok(ResolvedAddresses {
            arbiter_registry,
            escrow_factory,
            user_profile,
            bind,
        })
    }
}

fn required_address(field: &'static str, value: &str) -> Result<Address, ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingEnv(field.to_string()));
    }
    parse_address(value.trim()).ok_or_else(|| ConfigError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}
