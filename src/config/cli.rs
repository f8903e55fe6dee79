//! Command-line flags.
//!
//! Flags win over every other source. Each flag also reads the legacy
//! environment variable the deployment scripts use.

use clap::Parser;

use super::{Config, CONFIG_ENV_VAR};

/// Legacy alias for `RUN_ADDRESS`.
pub const SERVER_ADDRESS_ENV_VAR: &str = "SERVER_ADDRESS";
/// Legacy alias for `DATABASE_URI`.
pub const DATABASE_DSN_ENV_VAR: &str = "DATABASE_DSN";

#[derive(Debug, Clone, Default, Parser)]
#[command(name = "loyalty-server", about = "Loyalty points service", version)]
pub struct CliArgs {
    /// YAML configuration file.
    #[arg(long, env = CONFIG_ENV_VAR)]
    pub config: Option<String>,

    /// Listen address (host:port).
    #[arg(short = 'a', long = "address", env = "RUN_ADDRESS")]
    pub address: Option<String>,

    /// Database connection URI.
    #[arg(short = 'd', long = "database-uri", env = "DATABASE_URI")]
    pub database_uri: Option<String>,

    /// Accrual service base address.
    #[arg(short = 'r', long = "accrual-address", env = "ACCRUAL_SYSTEM_ADDRESS")]
    pub accrual_address: Option<String>,
}

impl CliArgs {
    /// Fill unset flags from the secondary legacy variables.
    pub fn with_legacy_env(mut self) -> Self {
        if self.address.is_none() {
            self.address = non_empty_env(SERVER_ADDRESS_ENV_VAR);
        }
        if self.database_uri.is_none() {
            self.database_uri = non_empty_env(DATABASE_DSN_ENV_VAR);
        }
        self
    }

    /// Overlay the flags onto a loaded configuration.
    pub fn apply(&self, config: &mut Config) {
        if let Some(address) = &self.address {
            config.server.address = address.clone();
        }
        if let Some(uri) = &self.database_uri {
            config.storage.uri = uri.clone();
        }
        if let Some(accrual) = &self.accrual_address {
            config.accrual.address = accrual.clone();
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
