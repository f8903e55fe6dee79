//! Storage configuration types.

use std::time::Duration;

use serde::Deserialize;

/// SQLite storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// sqlx connection URI, e.g. `sqlite:loyalty.db?mode=rwc` or `sqlite::memory:`.
    pub uri: String,
    /// Pool size. Forced to 1 for in-memory databases.
    pub max_connections: u32,
    /// Apply `migrations/sqlite` at startup.
    pub run_migrations: bool,
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            uri: "sqlite:loyalty.db?mode=rwc".to_string(),
            max_connections: 5,
            run_migrations: true,
            busy_timeout_secs: 30,
        }
    }
}

impl StorageConfig {
    /// In-memory database, for tests.
    pub fn in_memory() -> Self {
        Self {
            uri: "sqlite::memory:".to_string(),
            max_connections: 1,
            ..Self::default()
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.uri.contains(":memory:") || self.uri.contains("mode=memory")
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }
}
