//! Order/balance storage interface.

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{Order, OrderStatus, User, UserBalance, Withdrawal};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("User already exists: login={0}")]
    UserExists(String),

    #[error("Order already exists: number={0}")]
    OrderExists(String),

    #[error("Order not found: id={0}")]
    OrderNotFound(Uuid),

    #[error("Insufficient funds: requested={requested}, available={available}")]
    InsufficientFunds { requested: f64, available: f64 },

    #[error("Invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Invalid order status: {0}")]
    InvalidStatus(#[from] crate::model::UnknownStatus),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Whether retrying the same write may succeed.
    ///
    /// Covers lock contention and connection pool exhaustion; constraint
    /// violations and business rejections are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Database(sqlx::Error::PoolTimedOut) => true,
            StorageError::Database(sqlx::Error::Io(_)) => true,
            StorageError::Database(sqlx::Error::Database(db)) => {
                // SQLITE_BUSY (5) and SQLITE_LOCKED (6), including extended codes
                matches!(
                    db.code().as_deref().and_then(|c| c.parse::<i32>().ok()).map(|c| c & 0xff),
                    Some(5) | Some(6)
                )
            }
            StorageError::Unavailable(_) => true,
            _ => false,
        }
    }
}

/// Repository contract for users, orders, balances and withdrawals.
///
/// Implementations:
/// - `SqliteLoyaltyStore`: SQLite storage
/// - `MockLoyaltyStore`: in-memory storage for tests
///
/// `apply_accrual` and `withdraw` each touch two records and must commit
/// both or neither. Balance mutations for one user are serialized.
#[async_trait]
pub trait LoyaltyStore: Send + Sync {
    /// Insert a user. Fails with `UserExists` when the login is taken.
    async fn create_user(&self, user: &User) -> Result<()>;

    async fn get_user_by_login(&self, login: &str) -> Result<Option<User>>;

    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Insert an order. Fails with `OrderExists` when the number is taken
    /// by anyone, including the same user.
    async fn create_order(&self, order: &Order) -> Result<()>;

    async fn get_order_by_id(&self, id: Uuid) -> Result<Option<Order>>;

    async fn get_order_by_number(&self, number: &str) -> Result<Option<Order>>;

    /// All orders of a user, newest upload first.
    async fn get_user_orders(&self, user_id: Uuid) -> Result<Vec<Order>>;

    /// All orders currently in `status`, oldest upload first.
    async fn get_orders_by_status(&self, status: OrderStatus) -> Result<Vec<Order>>;

    /// Overwrite status and accrual of one order.
    async fn update_order_status(&self, id: Uuid, status: OrderStatus, accrual: f64) -> Result<()>;

    /// Record an accrual result atomically.
    ///
    /// Writes `status` and `accrual` to the order and, when `status` is
    /// PROCESSED with a positive accrual, credits the owner's balance in the
    /// same transaction. An order already in a terminal state is returned
    /// unchanged.
    async fn apply_accrual(&self, order_id: Uuid, status: OrderStatus, accrual: f64) -> Result<Order>;

    /// Current balance of a user, created empty on first access.
    async fn get_user_balance(&self, user_id: Uuid) -> Result<UserBalance>;

    /// Debit `sum` and append a withdrawal atomically.
    ///
    /// Fails with `InsufficientFunds` (and writes nothing) when the current
    /// balance is below `sum`.
    async fn withdraw(&self, user_id: Uuid, order_number: &str, sum: f64) -> Result<Withdrawal>;

    /// All withdrawals of a user, newest first.
    async fn get_user_withdrawals(&self, user_id: Uuid) -> Result<Vec<Withdrawal>>;

    /// Check that the backing store answers.
    async fn ping(&self) -> Result<()>;
}
