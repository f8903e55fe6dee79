//! SQLite storage integration tests.
//!
//! Run with: cargo test --test storage_sqlite
//!
//! Uses an in-memory database for the shared contract and a temporary file
//! database for the concurrency tests. No external dependencies required.

mod storage;

use std::sync::Arc;
use std::time::Duration;

use loyalty::config::StorageConfig;
use loyalty::interfaces::{LoyaltyStore, StorageError};
use loyalty::model::{Order, OrderStatus};
use loyalty::storage::{open_pool, run_migrations, SqliteLoyaltyStore};

use storage::loyalty_store_tests::{make_order, make_user, unique_number};

async fn connect_and_migrate(config: &StorageConfig) -> SqliteLoyaltyStore {
    let pool = open_pool(config).await.expect("Failed to open SQLite pool");
    run_migrations(&pool).await.expect("Failed to run migrations");
    SqliteLoyaltyStore::new(pool)
}

fn file_config(dir: &tempfile::TempDir) -> StorageConfig {
    StorageConfig {
        uri: format!("sqlite:{}?mode=rwc", dir.path().join("loyalty.db").display()),
        max_connections: 8,
        ..StorageConfig::default()
    }
}

#[tokio::test]
async fn test_sqlite_loyalty_store() {
    println!("=== SQLite LoyaltyStore Tests ===");

    let store = connect_and_migrate(&StorageConfig::in_memory()).await;

    run_loyalty_store_tests!(&store);

    println!("=== All SQLite LoyaltyStore tests PASSED ===");
}

#[tokio::test]
async fn test_sqlite_order_requires_existing_user() {
    let store = connect_and_migrate(&StorageConfig::in_memory()).await;

    let orphan = Order::new(uuid::Uuid::new_v4(), unique_number());
    let err = store
        .create_order(&orphan)
        .await
        .expect_err("order for unknown user must fail");

    assert!(matches!(err, StorageError::Database(_)));
    assert!(store.get_order_by_id(orphan.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_sqlite_file_database_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(&dir);

    let (user_id, order_id) = {
        let store = connect_and_migrate(&config).await;
        let user = make_user(&store).await;
        let order = make_order(&store, user.id).await;
        store
            .apply_accrual(order.id, OrderStatus::Processed, 12.5)
            .await
            .unwrap();
        store.pool().close().await;
        (user.id, order.id)
    };

    let store = connect_and_migrate(&config).await;
    let order = store.get_order_by_id(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Processed);
    assert_eq!(store.get_user_balance(user_id).await.unwrap().current, 12.5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_concurrent_withdrawals_never_overdraw() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(connect_and_migrate(&file_config(&dir)).await);

    let user = make_user(store.as_ref()).await;
    let order = make_order(store.as_ref(), user.id).await;
    store
        .apply_accrual(order.id, OrderStatus::Processed, 100.0)
        .await
        .unwrap();

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..10 {
        let store = store.clone();
        tasks.spawn(async move { store.withdraw(user.id, "2377225624", 30.0).await });
    }

    let mut succeeded = 0;
    let mut rejected = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.expect("task panicked") {
            Ok(_) => succeeded += 1,
            Err(StorageError::InsufficientFunds { .. }) => rejected += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(succeeded, 3);
    assert_eq!(rejected, 7);

    let balance = store.get_user_balance(user.id).await.unwrap();
    assert_eq!(balance.current, 10.0);
    assert_eq!(balance.withdrawn, 90.0);
    assert_eq!(store.get_user_withdrawals(user.id).await.unwrap().len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_interleaved_credits_and_withdrawals_conserve_points() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(connect_and_migrate(&file_config(&dir)).await);

    let user = make_user(store.as_ref()).await;
    let mut orders = Vec::new();
    for _ in 0..5 {
        orders.push(make_order(store.as_ref(), user.id).await);
    }

    let mut credits = tokio::task::JoinSet::new();
    for order in &orders {
        let store = store.clone();
        let id = order.id;
        credits.spawn(async move { store.apply_accrual(id, OrderStatus::Processed, 10.0).await });
    }

    let mut debits = tokio::task::JoinSet::new();
    for _ in 0..5 {
        let store = store.clone();
        debits.spawn(async move { store.withdraw(user.id, "2377225624", 10.0).await });
    }

    while let Some(joined) = credits.join_next().await {
        joined.expect("task panicked").expect("credit should succeed");
    }

    let mut withdrawn_ok = 0;
    while let Some(joined) = debits.join_next().await {
        match joined.expect("task panicked") {
            Ok(_) => withdrawn_ok += 1,
            Err(StorageError::InsufficientFunds { .. }) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    let balance = store.get_user_balance(user.id).await.unwrap();
    assert!(balance.current >= 0.0);
    assert_eq!(balance.withdrawn, 10.0 * withdrawn_ok as f64);
    assert_eq!(balance.current + balance.withdrawn, 50.0);
    assert_eq!(
        store.get_user_withdrawals(user.id).await.unwrap().len(),
        withdrawn_ok
    );
}

#[tokio::test]
async fn test_sqlite_cancelled_writes_do_not_leak_transactions() {
    let store = connect_and_migrate(&StorageConfig::in_memory()).await;

    let user = make_user(&store).await;
    let order = make_order(&store, user.id).await;
    store
        .apply_accrual(order.id, OrderStatus::Processed, 1000.0)
        .await
        .unwrap();

    // Drop writes at different points between BEGIN and COMMIT.
    for micros in [1, 10, 50, 100, 500, 1000] {
        let _ = tokio::time::timeout(
            Duration::from_micros(micros),
            store.withdraw(user.id, "79927398713", 1.0),
        )
        .await;

        let pending = make_order(&store, user.id).await;
        let _ = tokio::time::timeout(
            Duration::from_micros(micros),
            store.apply_accrual(pending.id, OrderStatus::Processed, 0.0),
        )
        .await;
    }

    store
        .withdraw(user.id, "79927398713", 1.0)
        .await
        .expect("withdraw after cancelled writes should succeed");
    let late = make_order(&store, user.id).await;
    store
        .apply_accrual(late.id, OrderStatus::Processed, 5.0)
        .await
        .expect("apply_accrual after cancelled writes should succeed");

    let balance = store.get_user_balance(user.id).await.unwrap();
    let withdrawals = store.get_user_withdrawals(user.id).await.unwrap();
    assert_eq!(balance.current + balance.withdrawn, 1005.0);
    assert_eq!(balance.withdrawn, withdrawals.len() as f64);
}
