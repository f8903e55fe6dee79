//! HTTP client for the external accrual service.
//!
//! One GET per order number against `{base}/api/orders/{number}`. The client
//! never retries on its own; the worker picks the order up again next tick.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::config::AccrualConfig;
use crate::interfaces::accrual::{AccrualClient, AccrualError, AccrualResponse, Result};

/// Accrual client backed by reqwest.
pub struct HttpAccrualClient {
    client: Client,
    base_url: String,
    max_retry_after: Duration,
}

impl HttpAccrualClient {
    /// Create a client with the configured request timeout.
    pub fn new(config: &AccrualConfig) -> Result<Self> {
        if config.address.trim().is_empty() {
            return Err(AccrualError::Config(
                "accrual address not configured".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url(),
            max_retry_after: config.max_retry_after(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn order_url(&self, number: &str) -> String {
        format!("{}/api/orders/{}", self.base_url, number)
    }
}

/// Parse an integer-seconds `Retry-After`, capped at `max`.
///
/// HTTP-date values and garbage are treated as absent.
pub fn parse_retry_after(headers: &HeaderMap, max: Duration) -> Option<Duration> {
    let secs: u64 = headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()?;
    Some(Duration::from_secs(secs).min(max))
}

#[async_trait]
impl AccrualClient for HttpAccrualClient {
    async fn fetch_order(&self, number: &str) -> Result<Option<AccrualResponse>> {
        let url = self.order_url(number);
        let response = self.client.get(&url).send().await?;
        let status = response.status();

        match status {
            StatusCode::OK => {
                let body = response.bytes().await?;
                let parsed: AccrualResponse = serde_json::from_slice(&body)?;
                debug!(order = %number, status = %parsed.status, accrual = ?parsed.accrual, "Accrual answer");
                Ok(Some(parsed))
            }
            StatusCode::NO_CONTENT => {
                debug!(order = %number, "Accrual service has no data for order");
                Ok(None)
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = parse_retry_after(response.headers(), self.max_retry_after);
                warn!(order = %number, retry_after = ?retry_after, "Accrual service rate limited");
                if let Some(delay) = retry_after {
                    tokio::time::sleep(delay).await;
                }
                Err(AccrualError::RateLimited { retry_after })
            }
            other => {
                warn!(order = %number, status = %other, "Unexpected accrual service status");
                Err(AccrualError::UnexpectedStatus(other.as_u16()))
            }
        }
    }
}
