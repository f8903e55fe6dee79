//! SQLite LoyaltyStore implementation.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sea_query::{Expr, OnConflict, Order as SortOrder, Query, SelectStatement, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::interfaces::store::{LoyaltyStore, Result, StorageError};
use crate::model::{Order, OrderStatus, User, UserBalance, Withdrawal};
use crate::storage::schema::{Orders, UserBalances, Users, Withdrawals};

/// Opens a transaction that takes the database write lock up front.
const WRITE_TX: &str = "BEGIN IMMEDIATE";

/// SQLite implementation of LoyaltyStore.
///
/// Multi-record writes run inside `BEGIN IMMEDIATE` transactions, so every
/// balance mutation holds the database write lock from its read to its
/// commit. A transaction dropped before `commit` is rolled back when its
/// connection returns to the pool.
pub struct SqliteLoyaltyStore {
    pool: SqlitePool,
}

impl SqliteLoyaltyStore {
    /// Create a new SQLite loyalty store over a migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn select_orders() -> SelectStatement {
        Query::select()
            .columns([
                Orders::Id,
                Orders::UserId,
                Orders::Number,
                Orders::Status,
                Orders::Accrual,
                Orders::UploadedAt,
            ])
            .from(Orders::Table)
            .to_owned()
    }

    async fn fetch_order(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<Order>> {
        let query = Self::select_orders()
            .and_where(Expr::col(Orders::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
        row.as_ref().map(order_from_row).transpose()
    }

    /// Insert an empty balance row unless one exists.
    async fn ensure_balance(conn: &mut SqliteConnection, user_id: Uuid) -> Result<()> {
        let query = Query::insert()
            .into_table(UserBalances::Table)
            .columns([UserBalances::UserId, UserBalances::Current, UserBalances::Withdrawn])
            .values_panic([user_id.to_string().into(), 0.0_f64.into(), 0.0_f64.into()])
            .on_conflict(OnConflict::column(UserBalances::UserId).do_nothing().to_owned())
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&mut *conn).await?;
        Ok(())
    }

    async fn fetch_balance(conn: &mut SqliteConnection, user_id: Uuid) -> Result<UserBalance> {
        let query = Query::select()
            .columns([UserBalances::UserId, UserBalances::Current, UserBalances::Withdrawn])
            .from(UserBalances::Table)
            .and_where(Expr::col(UserBalances::UserId).eq(user_id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
        match row {
            Some(row) => balance_from_row(&row),
            None => Ok(UserBalance::empty(user_id)),
        }
    }

    /// Order update plus optional credit, on an open transaction.
    async fn apply_accrual_in_tx(
        conn: &mut SqliteConnection,
        order_id: Uuid,
        status: OrderStatus,
        accrual: f64,
    ) -> Result<Order> {
        let mut order = Self::fetch_order(conn, order_id)
            .await?
            .ok_or(StorageError::OrderNotFound(order_id))?;

        if order.status.is_terminal() {
            debug!(order_id = %order_id, status = %order.status, "order already terminal, ignoring accrual");
            return Ok(order);
        }

        let query = Query::update()
            .table(Orders::Table)
            .values([
                (Orders::Status, status.as_str().into()),
                (Orders::Accrual, accrual.into()),
            ])
            .and_where(Expr::col(Orders::Id).eq(order_id.to_string()))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&mut *conn).await?;

        if status == OrderStatus::Processed && accrual > 0.0 {
            let credit = Query::insert()
                .into_table(UserBalances::Table)
                .columns([UserBalances::UserId, UserBalances::Current, UserBalances::Withdrawn])
                .values_panic([order.user_id.to_string().into(), accrual.into(), 0.0_f64.into()])
                .on_conflict(
                    OnConflict::column(UserBalances::UserId)
                        .value(UserBalances::Current, Expr::col(UserBalances::Current).add(accrual))
                        .to_owned(),
                )
                .to_string(SqliteQueryBuilder);
            sqlx::query(&credit).execute(&mut *conn).await?;
        }

        order.status = status;
        order.accrual = accrual;
        Ok(order)
    }

    /// Balance check, debit and withdrawal insert, on an open transaction.
    async fn withdraw_in_tx(
        conn: &mut SqliteConnection,
        user_id: Uuid,
        order_number: &str,
        sum: f64,
    ) -> Result<Withdrawal> {
        Self::ensure_balance(conn, user_id).await?;
        let balance = Self::fetch_balance(conn, user_id).await?;

        if balance.current < sum {
            return Err(StorageError::InsufficientFunds {
                requested: sum,
                available: balance.current,
            });
        }

        let debit = Query::update()
            .table(UserBalances::Table)
            .values([
                (UserBalances::Current, Expr::col(UserBalances::Current).sub(sum).into()),
                (UserBalances::Withdrawn, Expr::col(UserBalances::Withdrawn).add(sum).into()),
            ])
            .and_where(Expr::col(UserBalances::UserId).eq(user_id.to_string()))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&debit).execute(&mut *conn).await?;

        let withdrawal = Withdrawal {
            id: Uuid::new_v4(),
            user_id,
            order_number: order_number.to_string(),
            sum,
            processed_at: Utc::now(),
        };

        let insert = Query::insert()
            .into_table(Withdrawals::Table)
            .columns([
                Withdrawals::Id,
                Withdrawals::UserId,
                Withdrawals::OrderNumber,
                Withdrawals::Sum,
                Withdrawals::ProcessedAt,
            ])
            .values_panic([
                withdrawal.id.to_string().into(),
                user_id.to_string().into(),
                order_number.into(),
                sum.into(),
                format_timestamp(&withdrawal.processed_at).into(),
            ])
            .to_string(SqliteQueryBuilder);
        sqlx::query(&insert).execute(&mut *conn).await?;

        Ok(withdrawal)
    }
}

#[async_trait]
impl LoyaltyStore for SqliteLoyaltyStore {
    async fn create_user(&self, user: &User) -> Result<()> {
        let query = Query::insert()
            .into_table(Users::Table)
            .columns([Users::Id, Users::Login, Users::PasswordHash, Users::CreatedAt])
            .values_panic([
                user.id.to_string().into(),
                user.login.as_str().into(),
                user.password_hash.as_str().into(),
                format_timestamp(&user.created_at).into(),
            ])
            .to_string(SqliteQueryBuilder);

        match sqlx::query(&query).execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StorageError::UserExists(user.login.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_user_by_login(&self, login: &str) -> Result<Option<User>> {
        let query = Query::select()
            .columns([Users::Id, Users::Login, Users::PasswordHash, Users::CreatedAt])
            .from(Users::Table)
            .and_where(Expr::col(Users::Login).eq(login))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let query = Query::select()
            .columns([Users::Id, Users::Login, Users::PasswordHash, Users::CreatedAt])
            .from(Users::Table)
            .and_where(Expr::col(Users::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn create_order(&self, order: &Order) -> Result<()> {
        let query = Query::insert()
            .into_table(Orders::Table)
            .columns([
                Orders::Id,
                Orders::UserId,
                Orders::Number,
                Orders::Status,
                Orders::Accrual,
                Orders::UploadedAt,
            ])
            .values_panic([
                order.id.to_string().into(),
                order.user_id.to_string().into(),
                order.number.as_str().into(),
                order.status.as_str().into(),
                order.accrual.into(),
                format_timestamp(&order.uploaded_at).into(),
            ])
            .to_string(SqliteQueryBuilder);

        match sqlx::query(&query).execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StorageError::OrderExists(order.number.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_order_by_id(&self, id: Uuid) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_order(&mut conn, id).await
    }

    async fn get_order_by_number(&self, number: &str) -> Result<Option<Order>> {
        let query = Self::select_orders()
            .and_where(Expr::col(Orders::Number).eq(number))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn get_user_orders(&self, user_id: Uuid) -> Result<Vec<Order>> {
        let query = Self::select_orders()
            .and_where(Expr::col(Orders::UserId).eq(user_id.to_string()))
            .order_by(Orders::UploadedAt, SortOrder::Desc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(order_from_row).collect()
    }

    async fn get_orders_by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        let query = Self::select_orders()
            .and_where(Expr::col(Orders::Status).eq(status.as_str()))
            .order_by(Orders::UploadedAt, SortOrder::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(order_from_row).collect()
    }

    async fn update_order_status(&self, id: Uuid, status: OrderStatus, accrual: f64) -> Result<()> {
        let query = Query::update()
            .table(Orders::Table)
            .values([
                (Orders::Status, status.as_str().into()),
                (Orders::Accrual, accrual.into()),
            ])
            .and_where(Expr::col(Orders::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::OrderNotFound(id));
        }
        Ok(())
    }

    async fn apply_accrual(&self, order_id: Uuid, status: OrderStatus, accrual: f64) -> Result<Order> {
        let mut tx = self.pool.begin_with(WRITE_TX).await?;
        let order = Self::apply_accrual_in_tx(&mut *tx, order_id, status, accrual).await?;
        tx.commit().await?;
        Ok(order)
    }

    async fn get_user_balance(&self, user_id: Uuid) -> Result<UserBalance> {
        let mut conn = self.pool.acquire().await?;
        Self::ensure_balance(&mut conn, user_id).await?;
        Self::fetch_balance(&mut conn, user_id).await
    }

    async fn withdraw(&self, user_id: Uuid, order_number: &str, sum: f64) -> Result<Withdrawal> {
        let mut tx = self.pool.begin_with(WRITE_TX).await?;
        let withdrawal = Self::withdraw_in_tx(&mut *tx, user_id, order_number, sum).await?;
        tx.commit().await?;
        Ok(withdrawal)
    }

    async fn get_user_withdrawals(&self, user_id: Uuid) -> Result<Vec<Withdrawal>> {
        let query = Query::select()
            .columns([
                Withdrawals::Id,
                Withdrawals::UserId,
                Withdrawals::OrderNumber,
                Withdrawals::Sum,
                Withdrawals::ProcessedAt,
            ])
            .from(Withdrawals::Table)
            .and_where(Expr::col(Withdrawals::UserId).eq(user_id.to_string()))
            .order_by(Withdrawals::ProcessedAt, SortOrder::Desc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(withdrawal_from_row).collect()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Fixed-width RFC 3339 so lexical order matches time order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidTimestamp(format!("{}: {}", raw, e)))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    let id: String = row.get("id");
    let created_at: String = row.get("created_at");
    Ok(User {
        id: Uuid::parse_str(&id)?,
        login: row.get("login"),
        password_hash: row.get("password_hash"),
        created_at: parse_timestamp(&created_at)?,
    })
}

fn order_from_row(row: &SqliteRow) -> Result<Order> {
    let id: String = row.get("id");
    let user_id: String = row.get("user_id");
    let status: String = row.get("status");
    let uploaded_at: String = row.get("uploaded_at");
    Ok(Order {
        id: Uuid::parse_str(&id)?,
        user_id: Uuid::parse_str(&user_id)?,
        number: row.get("number"),
        status: status.parse()?,
        accrual: row.get("accrual"),
        uploaded_at: parse_timestamp(&uploaded_at)?,
    })
}

fn balance_from_row(row: &SqliteRow) -> Result<UserBalance> {
    let user_id: String = row.get("user_id");
    Ok(UserBalance {
        user_id: Uuid::parse_str(&user_id)?,
        current: row.get("current"),
        withdrawn: row.get("withdrawn"),
    })
}

fn withdrawal_from_row(row: &SqliteRow) -> Result<Withdrawal> {
    let id: String = row.get("id");
    let user_id: String = row.get("user_id");
    let processed_at: String = row.get("processed_at");
    Ok(Withdrawal {
        id: Uuid::parse_str(&id)?,
        user_id: Uuid::parse_str(&user_id)?,
        order_number: row.get("order_number"),
        sum: row.get("sum"),
        processed_at: parse_timestamp(&processed_at)?,
    })
}
