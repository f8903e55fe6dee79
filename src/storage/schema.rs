//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.
//! Tables themselves are created by `migrations/sqlite`.

use sea_query::Iden;

/// Users table schema.
#[derive(Iden)]
pub enum Users {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "login"]
    Login,
    #[iden = "password_hash"]
    PasswordHash,
    #[iden = "created_at"]
    CreatedAt,
}

/// Orders table schema.
#[derive(Iden)]
pub enum Orders {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "user_id"]
    UserId,
    #[iden = "number"]
    Number,
    #[iden = "status"]
    Status,
    #[iden = "accrual"]
    Accrual,
    #[iden = "uploaded_at"]
    UploadedAt,
}

/// User balances table schema. One row per user, created lazily.
#[derive(Iden)]
pub enum UserBalances {
    Table,
    #[iden = "user_id"]
    UserId,
    #[iden = "current"]
    Current,
    #[iden = "withdrawn"]
    Withdrawn,
}

/// Withdrawals table schema. Append-only.
#[derive(Iden)]
pub enum Withdrawals {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "user_id"]
    UserId,
    #[iden = "order_number"]
    OrderNumber,
    #[iden = "sum"]
    Sum,
    #[iden = "processed_at"]
    ProcessedAt,
}
