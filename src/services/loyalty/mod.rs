//! Order service: accounts, order submission, accrual results and balances.
//!
//! All durable state goes through [`LoyaltyStore`]. The two writes that touch
//! more than one record (accrual credit, withdrawal) are delegated to the
//! store's atomic operations.

use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::interfaces::store::{LoyaltyStore, StorageError};
use crate::model::{is_valid_luhn, Order, OrderStatus, User, UserBalance, Withdrawal};

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Business and infrastructure errors surfaced by [`LoyaltyService`].
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("User not found: {0}")]
    UserNotFound(Uuid),

    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("Login already taken: {0}")]
    UserExists(String),

    #[error("Order {0} was uploaded by another user")]
    OrderConflict(String),

    #[error("Invalid login or password")]
    InvalidCredentials,

    #[error("Insufficient funds: requested={requested}, available={available}")]
    InsufficientFunds { requested: f64, available: f64 },

    #[error("Invalid order number: {0}")]
    InvalidOrderNumber(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(f64),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl ServiceError {
    /// Whether the same call may succeed if repeated.
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Storage(e) if e.is_transient())
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::UserExists(login) => ServiceError::UserExists(login),
            StorageError::OrderNotFound(id) => ServiceError::OrderNotFound(id),
            StorageError::InsufficientFunds {
                requested,
                available,
            } => ServiceError::InsufficientFunds {
                requested,
                available,
            },
            other => ServiceError::Storage(other),
        }
    }
}

/// Outcome of a successful order submission.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderSubmission {
    /// New order stored in NEW state.
    Accepted(Order),
    /// The caller had already uploaded this number; nothing was written.
    AlreadyUploaded(Order),
}

impl OrderSubmission {
    pub fn order(&self) -> &Order {
        match self {
            OrderSubmission::Accepted(order) | OrderSubmission::AlreadyUploaded(order) => order,
        }
    }
}

/// Hex-encoded SHA-256 of a password.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Loyalty business operations over a [`LoyaltyStore`].
#[derive(Clone)]
pub struct LoyaltyService {
    store: Arc<dyn LoyaltyStore>,
}

impl LoyaltyService {
    pub fn new(store: Arc<dyn LoyaltyStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn LoyaltyStore> {
        &self.store
    }

    /// Create an account. Fails with `UserExists` if the login is taken.
    pub async fn register(&self, login: &str, password: &str) -> Result<User> {
        let login = login.trim();
        if login.is_empty() || password.is_empty() {
            return Err(ServiceError::InvalidInput(
                "login and password are required".to_string(),
            ));
        }

        let user = User {
            id: Uuid::new_v4(),
            login: login.to_string(),
            password_hash: hash_password(password),
            created_at: Utc::now(),
        };
        self.store.create_user(&user).await?;

        info!(user_id = %user.id, login = %user.login, "User registered");
        Ok(user)
    }

    /// Check credentials. Unknown logins and wrong passwords look the same.
    pub async fn login(&self, login: &str, password: &str) -> Result<User> {
        let user = self
            .store
            .get_user_by_login(login.trim())
            .await?
            .ok_or(ServiceError::InvalidCredentials)?;

        if user.password_hash != hash_password(password) {
            debug!(login = %user.login, "Password mismatch");
            return Err(ServiceError::InvalidCredentials);
        }
        Ok(user)
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<User> {
        self.store
            .get_user_by_id(user_id)
            .await?
            .ok_or(ServiceError::UserNotFound(user_id))
    }

    /// Submit an order number for accrual.
    ///
    /// A number already uploaded by the same user is reported as
    /// `AlreadyUploaded`; one owned by someone else is an `OrderConflict`.
    pub async fn create_order(&self, user_id: Uuid, number: &str) -> Result<OrderSubmission> {
        let number = number.trim();
        if !is_valid_luhn(number) {
            return Err(ServiceError::InvalidOrderNumber(number.to_string()));
        }

        if let Some(existing) = self.store.get_order_by_number(number).await? {
            return Self::resolve_existing(user_id, existing);
        }

        let order = Order::new(user_id, number);
        match self.store.create_order(&order).await {
            Ok(()) => {
                info!(user_id = %user_id, order = %number, "Order accepted");
                Ok(OrderSubmission::Accepted(order))
            }
            Err(StorageError::OrderExists(_)) => {
                // Lost a race with a concurrent upload of the same number.
                let existing = self
                    .store
                    .get_order_by_number(number)
                    .await?
                    .ok_or_else(|| ServiceError::OrderConflict(number.to_string()))?;
                Self::resolve_existing(user_id, existing)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn resolve_existing(user_id: Uuid, existing: Order) -> Result<OrderSubmission> {
        if existing.user_id == user_id {
            Ok(OrderSubmission::AlreadyUploaded(existing))
        } else {
            warn!(order = %existing.number, user_id = %user_id, "Order owned by another user");
            Err(ServiceError::OrderConflict(existing.number))
        }
    }

    /// Orders of a user, newest first.
    pub async fn get_user_orders(&self, user_id: Uuid) -> Result<Vec<Order>> {
        Ok(self.store.get_user_orders(user_id).await?)
    }

    /// Orders currently in `status`, oldest first.
    pub async fn orders_with_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        Ok(self.store.get_orders_by_status(status).await?)
    }

    /// Mark a NEW order as picked up by the worker.
    pub async fn start_processing(&self, order: &Order) -> Result<()> {
        self.store
            .update_order_status(order.id, OrderStatus::Processing, order.accrual)
            .await?;
        Ok(())
    }

    /// Record an accrual result for an order.
    ///
    /// Status, accrual and (for PROCESSED with a positive accrual) the
    /// balance credit are committed together. Pending upstream statuses are
    /// stored as PROCESSING. A terminal order is returned unchanged.
    pub async fn process_order(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        accrual: f64,
    ) -> Result<Order> {
        if !accrual.is_finite() || accrual < 0.0 {
            return Err(ServiceError::InvalidAmount(accrual));
        }

        let order = self
            .store
            .get_order_by_id(order_id)
            .await?
            .ok_or(ServiceError::OrderNotFound(order_id))?;

        let status = status.normalized();
        let updated = self.store.apply_accrual(order.id, status, accrual).await?;

        if updated.status == status {
            info!(order = %updated.number, status = %status, accrual, "Order updated");
        }
        Ok(updated)
    }

    /// Balance with negative totals reported as zero.
    pub async fn get_user_balance(&self, user_id: Uuid) -> Result<UserBalance> {
        Ok(self.store.get_user_balance(user_id).await?.clamped())
    }

    /// Spend `sum` points against `order_number`.
    pub async fn withdraw_balance(
        &self,
        user_id: Uuid,
        order_number: &str,
        sum: f64,
    ) -> Result<Withdrawal> {
        let order_number = order_number.trim();
        if !is_valid_luhn(order_number) {
            return Err(ServiceError::InvalidOrderNumber(order_number.to_string()));
        }
        if !sum.is_finite() || sum <= 0.0 {
            return Err(ServiceError::InvalidAmount(sum));
        }

        let withdrawal = self.store.withdraw(user_id, order_number, sum).await?;
        info!(user_id = %user_id, order = %order_number, sum, "Withdrawal recorded");
        Ok(withdrawal)
    }

    /// Withdrawals of a user, newest first.
    pub async fn get_user_withdrawals(&self, user_id: Uuid) -> Result<Vec<Withdrawal>> {
        Ok(self.store.get_user_withdrawals(user_id).await?)
    }

    /// A single order, visible only to its owner.
    pub async fn get_order_by_number(&self, user_id: Uuid, number: &str) -> Result<Option<Order>> {
        let number = number.trim();
        if !is_valid_luhn(number) {
            return Err(ServiceError::InvalidOrderNumber(number.to_string()));
        }
        Ok(self
            .store
            .get_order_by_number(number)
            .await?
            .filter(|order| order.user_id == user_id))
    }

    pub async fn ping(&self) -> Result<()> {
        Ok(self.store.ping().await?)
    }
}
