//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files, environment variables and flags.

mod cli;
mod client;
mod server;
mod storage;

pub use cli::{CliArgs, DATABASE_DSN_ENV_VAR, SERVER_ADDRESS_ENV_VAR};
pub use client::{AccrualConfig, WorkerConfig};
pub use server::{AuthConfig, ServerConfig, MAX_TOKEN_TTL_HOURS};
pub use storage::StorageConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "LOYALTY_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "LOYALTY";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "LOYALTY_LOG";

use serde::Deserialize;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration.
    pub server: ServerConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Session token configuration.
    pub auth: AuthConfig,
    /// Accrual service client configuration.
    pub accrual: AccrualConfig,
    /// Background worker configuration.
    pub worker: WorkerConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. Environment variables with `CONFIG_ENV_PREFIX` prefix, e.g.
    ///    `LOYALTY__STORAGE__URI`
    ///
    /// Command-line flags are applied afterwards by [`Config::from_args`].
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// Load configuration and overlay command-line flags.
    pub fn from_args(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config = Self::load(args.config.as_deref())?;
        args.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the server cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.address.trim().is_empty() {
            return Err(ConfigError::Invalid("server.address is empty".to_string()));
        }
        if self.storage.uri.trim().is_empty() {
            return Err(ConfigError::Invalid("storage.uri is empty".to_string()));
        }
        if self.accrual.address.trim().is_empty() {
            return Err(ConfigError::Invalid("accrual.address is empty".to_string()));
        }
        if self.auth.secret_key.is_empty() {
            return Err(ConfigError::Invalid("auth.secret_key is empty".to_string()));
        }
        if self.auth.token_ttl_hours <= 0 {
            return Err(ConfigError::Invalid(
                "auth.token_ttl_hours must be positive".to_string(),
            ));
        }
        if self.auth.token_ttl_hours > MAX_TOKEN_TTL_HOURS {
            return Err(ConfigError::Invalid(format!(
                "auth.token_ttl_hours must not exceed {}",
                MAX_TOKEN_TTL_HOURS
            )));
        }
        Ok(())
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self {
            storage: StorageConfig::in_memory(),
            auth: AuthConfig {
                secret_key: "test-secret".to_string(),
                ..Default::default()
            },
            worker: WorkerConfig {
                enabled: false,
                poll_interval_secs: 1,
            },
            ..Default::default()
        }
    }
}
