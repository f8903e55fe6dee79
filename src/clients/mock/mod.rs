//! Mock accrual client for testing.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::interfaces::accrual::{AccrualClient, AccrualError, AccrualResponse, Result};
use crate::model::OrderStatus;

/// Scripted answer for one order number.
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    /// 200 with the given status and accrual.
    Status {
        status: OrderStatus,
        accrual: Option<f64>,
    },
    /// 204.
    NoContent,
    /// 429 with an optional Retry-After.
    RateLimited(Option<Duration>),
    /// Any other HTTP status.
    Failure(u16),
}

impl MockReply {
    pub fn processed(accrual: f64) -> Self {
        MockReply::Status {
            status: OrderStatus::Processed,
            accrual: Some(accrual),
        }
    }

    pub fn invalid() -> Self {
        MockReply::Status {
            status: OrderStatus::Invalid,
            accrual: None,
        }
    }

    pub fn pending(status: OrderStatus) -> Self {
        MockReply::Status {
            status,
            accrual: None,
        }
    }
}

/// Accrual client that answers from a script and counts calls.
///
/// Unscripted numbers answer 204.
#[derive(Default)]
pub struct MockAccrualClient {
    replies: RwLock<HashMap<String, MockReply>>,
    calls: RwLock<HashMap<String, u32>>,
    delay: RwLock<Option<Duration>>,
}

impl MockAccrualClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_reply(&self, number: &str, reply: MockReply) {
        self.replies.write().await.insert(number.to_string(), reply);
    }

    /// Delay every answer, to keep requests in flight.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = Some(delay);
    }

    pub async fn call_count(&self, number: &str) -> u32 {
        self.calls.read().await.get(number).copied().unwrap_or(0)
    }

    pub async fn total_calls(&self) -> u32 {
        self.calls.read().await.values().sum()
    }
}

#[async_trait]
impl AccrualClient for MockAccrualClient {
    async fn fetch_order(&self, number: &str) -> Result<Option<AccrualResponse>> {
        *self
            .calls
            .write()
            .await
            .entry(number.to_string())
            .or_insert(0) += 1;

        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self
            .replies
            .read()
            .await
            .get(number)
            .cloned()
            .unwrap_or(MockReply::NoContent);

        match reply {
            MockReply::Status { status, accrual } => Ok(Some(AccrualResponse {
                order: number.to_string(),
                status,
                accrual,
            })),
            MockReply::NoContent => Ok(None),
            MockReply::RateLimited(retry_after) => {
                if let Some(wait) = retry_after {
                    tokio::time::sleep(wait).await;
                }
                Err(AccrualError::RateLimited { retry_after })
            }
            MockReply::Failure(code) => Err(AccrualError::UnexpectedStatus(code)),
        }
    }
}
