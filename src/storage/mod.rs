//! Storage implementations.

use std::str::FromStr;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::config::StorageConfig;
use crate::interfaces::store::{LoyaltyStore, Result};

pub mod mock;
pub mod schema;
pub mod sqlite;

pub use mock::MockLoyaltyStore;
pub use sqlite::SqliteLoyaltyStore;

/// Open a SQLite pool for the configured URI.
///
/// File databases run in WAL mode. In-memory databases live inside a single
/// connection, so the pool is pinned to exactly one that never expires.
pub async fn open_pool(config: &StorageConfig) -> Result<SqlitePool> {
    let mut options = SqliteConnectOptions::from_str(&config.uri)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(config.busy_timeout());

    let mut pool_options = SqlitePoolOptions::new();
    if config.is_in_memory() {
        pool_options = pool_options
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    } else {
        options = options.journal_mode(SqliteJournalMode::Wal);
        pool_options = pool_options.max_connections(config.max_connections.max(1));
    }

    Ok(pool_options.connect_with(options).await?)
}

/// Apply the embedded `migrations/sqlite` set.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations/sqlite").run(pool).await?;
    Ok(())
}

/// Initialize storage based on configuration.
pub async fn init_storage(config: &StorageConfig) -> Result<Arc<dyn LoyaltyStore>> {
    info!(uri = %config.uri, "Storage: sqlite");

    let pool = open_pool(config).await?;
    if config.run_migrations {
        run_migrations(&pool).await?;
        info!("Storage migrations applied");
    }

    Ok(Arc::new(SqliteLoyaltyStore::new(pool)))
}
