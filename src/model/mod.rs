//! Domain records: users, orders, balances and withdrawals.

mod luhn;

pub use luhn::is_valid_luhn;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order lifecycle state.
///
/// Locally an order moves NEW → PROCESSING → {PROCESSED, INVALID}.
/// `Registered` only ever arrives from the accrual service and is treated
/// as another pending state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    Registered,
    Processing,
    Invalid,
    Processed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Registered => "REGISTERED",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
        }
    }

    /// PROCESSED and INVALID accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Processed | OrderStatus::Invalid)
    }

    /// Statuses meaning "the accrual is not known yet".
    pub fn is_pending(&self) -> bool {
        !self.is_terminal()
    }

    /// Map an upstream status onto the local lifecycle.
    ///
    /// Once the worker has claimed an order, every pending answer keeps it
    /// in PROCESSING.
    pub fn normalized(self) -> Self {
        match self {
            OrderStatus::New | OrderStatus::Registered => OrderStatus::Processing,
            other => other,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown order status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(OrderStatus::New),
            "REGISTERED" => Ok(OrderStatus::Registered),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "INVALID" => Ok(OrderStatus::Invalid),
            "PROCESSED" => Ok(OrderStatus::Processed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A registered account.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub login: String,
    /// Hex-encoded one-way hash of the password.
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// An order number submitted by a user for accrual.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Luhn-valid numeric string, unique across all users.
    pub number: String,
    pub status: OrderStatus,
    /// Reward amount; only meaningful once PROCESSED.
    pub accrual: f64,
    pub uploaded_at: DateTime<Utc>,
}

impl Order {
    /// A freshly submitted order in NEW state.
    pub fn new(user_id: Uuid, number: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            number: number.into(),
            status: OrderStatus::New,
            accrual: 0.0,
            uploaded_at: Utc::now(),
        }
    }
}

/// Spendable and withdrawn totals for one user.
#[derive(Debug, Clone, PartialEq)]
pub struct UserBalance {
    pub user_id: Uuid,
    pub current: f64,
    pub withdrawn: f64,
}

impl UserBalance {
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            current: 0.0,
            withdrawn: 0.0,
        }
    }

    /// Copy with negative totals floored at zero.
    pub fn clamped(&self) -> Self {
        Self {
            user_id: self.user_id,
            current: self.current.max(0.0),
            withdrawn: self.withdrawn.max(0.0),
        }
    }
}

/// A debit against a user's balance. Never modified after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct Withdrawal {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Order number the points were spent on; kept for audit only.
    pub order_number: String,
    pub sum: f64,
    pub processed_at: DateTime<Utc>,
}
