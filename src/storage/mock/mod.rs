//! Mock storage implementation for testing.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::interfaces::store::{LoyaltyStore, Result, StorageError};
use crate::model::{Order, OrderStatus, User, UserBalance, Withdrawal};

#[derive(Default)]
struct MockState {
    users: HashMap<Uuid, User>,
    orders: HashMap<Uuid, Order>,
    balances: HashMap<Uuid, UserBalance>,
    withdrawals: Vec<Withdrawal>,
}

/// In-memory store. Every mutation runs under one write lock, which
/// serializes balance updates the same way a single-writer database does.
#[derive(Default)]
pub struct MockLoyaltyStore {
    state: RwLock<MockState>,
    fail_on_read: RwLock<bool>,
    fail_on_write: RwLock<bool>,
    /// Number of upcoming writes that fail with a transient error.
    transient_write_failures: RwLock<u32>,
    write_attempts: RwLock<u32>,
}

impl MockLoyaltyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_read(&self, fail: bool) {
        *self.fail_on_read.write().await = fail;
    }

    pub async fn set_fail_on_write(&self, fail: bool) {
        *self.fail_on_write.write().await = fail;
    }

    pub async fn fail_next_writes(&self, count: u32) {
        *self.transient_write_failures.write().await = count;
    }

    /// Writes attempted so far, including failed ones.
    pub async fn write_attempts(&self) -> u32 {
        *self.write_attempts.read().await
    }

    /// Seed a balance directly.
    pub async fn set_balance(&self, user_id: Uuid, current: f64, withdrawn: f64) {
        self.state.write().await.balances.insert(
            user_id,
            UserBalance {
                user_id,
                current,
                withdrawn,
            },
        );
    }

    pub async fn withdrawal_count(&self) -> usize {
        self.state.read().await.withdrawals.len()
    }

    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    async fn check_read(&self) -> Result<()> {
        if *self.fail_on_read.read().await {
            return Err(StorageError::Database(sqlx::Error::RowNotFound));
        }
        Ok(())
    }

    async fn check_write(&self) -> Result<()> {
        *self.write_attempts.write().await += 1;
        if *self.fail_on_write.read().await {
            return Err(StorageError::Database(sqlx::Error::RowNotFound));
        }
        let mut remaining = self.transient_write_failures.write().await;
        if *remaining > 0 {
            *remaining -= 1;
            return Err(StorageError::Unavailable("database is locked".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LoyaltyStore for MockLoyaltyStore {
    async fn create_user(&self, user: &User) -> Result<()> {
        self.check_write().await?;
        let mut state = self.state.write().await;
        if state.users.values().any(|u| u.login == user.login) {
            return Err(StorageError::UserExists(user.login.clone()));
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user_by_login(&self, login: &str) -> Result<Option<User>> {
        self.check_read().await?;
        let state = self.state.read().await;
        Ok(state.users.values().find(|u| u.login == login).cloned())
    }

    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        self.check_read().await?;
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn create_order(&self, order: &Order) -> Result<()> {
        self.check_write().await?;
        let mut state = self.state.write().await;
        if state.orders.values().any(|o| o.number == order.number) {
            return Err(StorageError::OrderExists(order.number.clone()));
        }
        state.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get_order_by_id(&self, id: Uuid) -> Result<Option<Order>> {
        self.check_read().await?;
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn get_order_by_number(&self, number: &str) -> Result<Option<Order>> {
        self.check_read().await?;
        let state = self.state.read().await;
        Ok(state.orders.values().find(|o| o.number == number).cloned())
    }

    async fn get_user_orders(&self, user_id: Uuid) -> Result<Vec<Order>> {
        self.check_read().await?;
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(orders)
    }

    async fn get_orders_by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        self.check_read().await?;
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.status == status)
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at));
        Ok(orders)
    }

    async fn update_order_status(&self, id: Uuid, status: OrderStatus, accrual: f64) -> Result<()> {
        self.check_write().await?;
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or(StorageError::OrderNotFound(id))?;
        order.status = status;
        order.accrual = accrual;
        Ok(())
    }

    async fn apply_accrual(&self, order_id: Uuid, status: OrderStatus, accrual: f64) -> Result<Order> {
        self.check_write().await?;
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(StorageError::OrderNotFound(order_id))?;

        if order.status.is_terminal() {
            return Ok(order.clone());
        }

        order.status = status;
        order.accrual = accrual;
        let updated = order.clone();

        if status == OrderStatus::Processed && accrual > 0.0 {
            state
                .balances
                .entry(updated.user_id)
                .or_insert_with(|| UserBalance::empty(updated.user_id))
                .current += accrual;
        }

        Ok(updated)
    }

    async fn get_user_balance(&self, user_id: Uuid) -> Result<UserBalance> {
        self.check_read().await?;
        let mut state = self.state.write().await;
        Ok(state
            .balances
            .entry(user_id)
            .or_insert_with(|| UserBalance::empty(user_id))
            .clone())
    }

    async fn withdraw(&self, user_id: Uuid, order_number: &str, sum: f64) -> Result<Withdrawal> {
        self.check_write().await?;
        let mut state = self.state.write().await;
        let balance = state
            .balances
            .entry(user_id)
            .or_insert_with(|| UserBalance::empty(user_id));

        if balance.current < sum {
            return Err(StorageError::InsufficientFunds {
                requested: sum,
                available: balance.current,
            });
        }

        balance.current -= sum;
        balance.withdrawn += sum;

        let withdrawal = Withdrawal {
            id: Uuid::new_v4(),
            user_id,
            order_number: order_number.to_string(),
            sum,
            processed_at: Utc::now(),
        };
        state.withdrawals.push(withdrawal.clone());
        Ok(withdrawal)
    }

    async fn get_user_withdrawals(&self, user_id: Uuid) -> Result<Vec<Withdrawal>> {
        self.check_read().await?;
        let state = self.state.read().await;
        let mut withdrawals: Vec<Withdrawal> = state
            .withdrawals
            .iter()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect();
        withdrawals.sort_by(|a, b| b.processed_at.cmp(&a.processed_at));
        Ok(withdrawals)
    }

    async fn ping(&self) -> Result<()> {
        self.check_read().await
    }
}
