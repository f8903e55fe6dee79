//! Accrual service and worker configuration types.

use std::time::Duration;

use serde::Deserialize;

/// Accrual service client configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AccrualConfig {
    /// Base URL of the accrual service.
    pub address: String,
    /// Timeout for one status request.
    pub request_timeout_secs: u64,
    /// Upper bound on a honoured `Retry-After` pause.
    pub max_retry_after_secs: u64,
}

impl Default for AccrualConfig {
    fn default() -> Self {
        Self {
            address: "http://localhost:8081".to_string(),
            request_timeout_secs: 5,
            max_retry_after_secs: 60,
        }
    }
}

impl AccrualConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn max_retry_after(&self) -> Duration {
        Duration::from_secs(self.max_retry_after_secs)
    }

    /// Address with a scheme, without a trailing slash.
    ///
    /// Bare `host:port` values are treated as plain HTTP.
    pub fn base_url(&self) -> String {
        let trimmed = self.address.trim().trim_end_matches('/');
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else {
            format!("http://{}", trimmed)
        }
    }
}

/// Accrual worker configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Start the background worker with the server.
    pub enabled: bool,
    /// Seconds between ticks.
    pub poll_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 5,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}
