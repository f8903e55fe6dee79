//! Accrual service client interface.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::model::OrderStatus;

/// Result type for accrual lookups.
pub type Result<T> = std::result::Result<T, AccrualError>;

/// Errors from one accrual lookup. None of them change local order state.
#[derive(Debug, thiserror::Error)]
pub enum AccrualError {
    /// The service answered 429. The caller has already waited out
    /// `retry_after` (if one was given) when it sees this error.
    #[error("Rate limited by accrual service (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Accrual service returned status {0}")]
    UnexpectedStatus(u16),

    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Body of a 200 answer from `GET /api/orders/{number}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AccrualResponse {
    pub order: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub accrual: Option<f64>,
}

/// Looks up the accrual state of a single order number.
#[async_trait]
pub trait AccrualClient: Send + Sync {
    /// `Ok(None)` means the service has nothing for this order yet and the
    /// caller must leave it as it is.
    async fn fetch_order(&self, number: &str) -> Result<Option<AccrualResponse>>;
}
