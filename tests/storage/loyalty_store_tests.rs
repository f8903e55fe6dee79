//! LoyaltyStore interface tests.
//!
//! These tests verify the contract of the LoyaltyStore trait.
//! Each storage implementation should run these tests. Every test creates
//! its own users and order numbers, so they can share one store.

use chrono::{Duration, Utc};
use uuid::Uuid;

use loyalty::interfaces::{LoyaltyStore, StorageError};
use loyalty::model::{Order, OrderStatus, User};

/// Create and persist a user with a unique login.
pub async fn make_user<S: LoyaltyStore>(store: &S) -> User {
    let id = Uuid::new_v4();
    let user = User {
        id,
        login: format!("user-{}", id),
        password_hash: "hash".to_string(),
        created_at: Utc::now(),
    };
    store.create_user(&user).await.expect("create_user should succeed");
    user
}

/// Order number no other test uses.
pub fn unique_number() -> String {
    Uuid::new_v4().as_u128().to_string()
}

/// Create and persist a NEW order.
pub async fn make_order<S: LoyaltyStore>(store: &S, user_id: Uuid) -> Order {
    let order = Order::new(user_id, unique_number());
    store.create_order(&order).await.expect("create_order should succeed");
    order
}

// =============================================================================
// Users
// =============================================================================

pub async fn test_user_round_trip<S: LoyaltyStore>(store: &S) {
    let user = make_user(store).await;

    let by_login = store
        .get_user_by_login(&user.login)
        .await
        .expect("get_user_by_login should succeed")
        .expect("user should exist");
    assert_eq!(by_login.id, user.id);
    assert_eq!(by_login.password_hash, user.password_hash);

    let by_id = store
        .get_user_by_id(user.id)
        .await
        .expect("get_user_by_id should succeed")
        .expect("user should exist");
    assert_eq!(by_id.login, user.login);

    assert!(store
        .get_user_by_login("no-such-login")
        .await
        .expect("lookup should succeed")
        .is_none());
}

pub async fn test_duplicate_login<S: LoyaltyStore>(store: &S) {
    let user = make_user(store).await;
    let clash = User {
        id: Uuid::new_v4(),
        ..user.clone()
    };

    let err = store.create_user(&clash).await.expect_err("duplicate login must fail");
    assert!(matches!(err, StorageError::UserExists(login) if login == user.login));
}

// =============================================================================
// Orders
// =============================================================================

pub async fn test_order_round_trip<S: LoyaltyStore>(store: &S) {
    let user = make_user(store).await;
    let order = make_order(store, user.id).await;

    let by_id = store
        .get_order_by_id(order.id)
        .await
        .expect("get_order_by_id should succeed")
        .expect("order should exist");
    assert_eq!(by_id.number, order.number);
    assert_eq!(by_id.status, OrderStatus::New);
    assert_eq!(by_id.accrual, 0.0);
    assert_eq!(
        by_id.uploaded_at.timestamp_micros(),
        order.uploaded_at.timestamp_micros()
    );

    let by_number = store
        .get_order_by_number(&order.number)
        .await
        .expect("get_order_by_number should succeed")
        .expect("order should exist");
    assert_eq!(by_number.id, order.id);
}

pub async fn test_order_number_unique_across_users<S: LoyaltyStore>(store: &S) {
    let owner = make_user(store).await;
    let other = make_user(store).await;
    let order = make_order(store, owner.id).await;

    let err = store
        .create_order(&Order::new(other.id, order.number.clone()))
        .await
        .expect_err("duplicate number must fail");
    assert!(matches!(err, StorageError::OrderExists(_)));
    assert!(store
        .get_user_orders(other.id)
        .await
        .expect("get_user_orders should succeed")
        .is_empty());
}

pub async fn test_user_orders_newest_first<S: LoyaltyStore>(store: &S) {
    let user = make_user(store).await;
    let mut older = Order::new(user.id, unique_number());
    older.uploaded_at = Utc::now() - Duration::hours(1);
    let newer = Order::new(user.id, unique_number());
    store.create_order(&newer).await.expect("create newer");
    store.create_order(&older).await.expect("create older");

    let orders = store
        .get_user_orders(user.id)
        .await
        .expect("get_user_orders should succeed");
    let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
    assert_eq!(ids, vec![newer.id, older.id]);
}

pub async fn test_orders_by_status_oldest_first<S: LoyaltyStore>(store: &S) {
    let user = make_user(store).await;
    let mut older = Order::new(user.id, unique_number());
    older.uploaded_at = Utc::now() - Duration::hours(2);
    let newer = Order::new(user.id, unique_number());
    store.create_order(&newer).await.expect("create newer");
    store.create_order(&older).await.expect("create older");

    let ids: Vec<Uuid> = store
        .get_orders_by_status(OrderStatus::New)
        .await
        .expect("get_orders_by_status should succeed")
        .into_iter()
        .filter(|o| o.user_id == user.id)
        .map(|o| o.id)
        .collect();
    assert_eq!(ids, vec![older.id, newer.id]);
}

pub async fn test_update_order_status<S: LoyaltyStore>(store: &S) {
    let user = make_user(store).await;
    let order = make_order(store, user.id).await;

    store
        .update_order_status(order.id, OrderStatus::Processing, 0.0)
        .await
        .expect("update should succeed");
    let stored = store.get_order_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Processing);

    let in_status = store
        .get_orders_by_status(OrderStatus::Processing)
        .await
        .expect("get_orders_by_status should succeed");
    assert!(in_status.iter().any(|o| o.id == order.id));

    let err = store
        .update_order_status(Uuid::new_v4(), OrderStatus::Processing, 0.0)
        .await
        .expect_err("unknown order must fail");
    assert!(matches!(err, StorageError::OrderNotFound(_)));
}

// =============================================================================
// Accrual
// =============================================================================

pub async fn test_apply_accrual_credits_balance<S: LoyaltyStore>(store: &S) {
    let user = make_user(store).await;
    let first = make_order(store, user.id).await;
    let second = make_order(store, user.id).await;

    store
        .apply_accrual(first.id, OrderStatus::Processed, 100.0)
        .await
        .expect("apply_accrual should succeed");
    store
        .apply_accrual(second.id, OrderStatus::Processed, 50.5)
        .await
        .expect("apply_accrual should succeed");

    let balance = store.get_user_balance(user.id).await.unwrap();
    assert_eq!(balance.current, 150.5);
    assert_eq!(balance.withdrawn, 0.0);

    let stored = store.get_order_by_id(first.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Processed);
    assert_eq!(stored.accrual, 100.0);
}

pub async fn test_apply_accrual_without_credit<S: LoyaltyStore>(store: &S) {
    let user = make_user(store).await;
    let zero = make_order(store, user.id).await;
    let invalid = make_order(store, user.id).await;
    let pending = make_order(store, user.id).await;

    store
        .apply_accrual(zero.id, OrderStatus::Processed, 0.0)
        .await
        .unwrap();
    store
        .apply_accrual(invalid.id, OrderStatus::Invalid, 0.0)
        .await
        .unwrap();
    let still_pending = store
        .apply_accrual(pending.id, OrderStatus::Processing, 0.0)
        .await
        .unwrap();

    assert_eq!(still_pending.status, OrderStatus::Processing);
    assert_eq!(store.get_user_balance(user.id).await.unwrap().current, 0.0);
}

pub async fn test_apply_accrual_terminal_is_final<S: LoyaltyStore>(store: &S) {
    let user = make_user(store).await;
    let order = make_order(store, user.id).await;

    store
        .apply_accrual(order.id, OrderStatus::Processed, 10.0)
        .await
        .unwrap();
    let again = store
        .apply_accrual(order.id, OrderStatus::Processed, 10.0)
        .await
        .unwrap();
    let flipped = store
        .apply_accrual(order.id, OrderStatus::Invalid, 0.0)
        .await
        .unwrap();

    assert_eq!(again.accrual, 10.0);
    assert_eq!(flipped.status, OrderStatus::Processed);
    assert_eq!(store.get_user_balance(user.id).await.unwrap().current, 10.0);
}

pub async fn test_apply_accrual_unknown_order<S: LoyaltyStore>(store: &S) {
    let err = store
        .apply_accrual(Uuid::new_v4(), OrderStatus::Processed, 1.0)
        .await
        .expect_err("unknown order must fail");
    assert!(matches!(err, StorageError::OrderNotFound(_)));
}

// =============================================================================
// Balance and withdrawals
// =============================================================================

pub async fn test_balance_created_lazily<S: LoyaltyStore>(store: &S) {
    let user = make_user(store).await;

    let balance = store.get_user_balance(user.id).await.unwrap();
    assert_eq!(balance.user_id, user.id);
    assert_eq!(balance.current, 0.0);
    assert_eq!(balance.withdrawn, 0.0);
}

pub async fn test_withdraw<S: LoyaltyStore>(store: &S) {
    let user = make_user(store).await;
    let order = make_order(store, user.id).await;
    store
        .apply_accrual(order.id, OrderStatus::Processed, 100.0)
        .await
        .unwrap();

    let withdrawal = store
        .withdraw(user.id, "2377225624", 40.0)
        .await
        .expect("withdraw should succeed");
    assert_eq!(withdrawal.sum, 40.0);
    assert_eq!(withdrawal.order_number, "2377225624");

    let balance = store.get_user_balance(user.id).await.unwrap();
    assert_eq!(balance.current, 60.0);
    assert_eq!(balance.withdrawn, 40.0);

    let history = store.get_user_withdrawals(user.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, withdrawal.id);
}

pub async fn test_withdraw_insufficient_funds<S: LoyaltyStore>(store: &S) {
    let user = make_user(store).await;
    let order = make_order(store, user.id).await;
    store
        .apply_accrual(order.id, OrderStatus::Processed, 10.0)
        .await
        .unwrap();

    let err = store
        .withdraw(user.id, "2377225624", 10.01)
        .await
        .expect_err("overdraw must fail");
    assert!(matches!(
        err,
        StorageError::InsufficientFunds { available, .. } if available == 10.0
    ));

    let balance = store.get_user_balance(user.id).await.unwrap();
    assert_eq!(balance.current, 10.0);
    assert_eq!(balance.withdrawn, 0.0);
    assert!(store.get_user_withdrawals(user.id).await.unwrap().is_empty());
}

pub async fn test_withdraw_exact_balance<S: LoyaltyStore>(store: &S) {
    let user = make_user(store).await;
    let order = make_order(store, user.id).await;
    store
        .apply_accrual(order.id, OrderStatus::Processed, 25.0)
        .await
        .unwrap();

    store.withdraw(user.id, "2377225624", 25.0).await.unwrap();
    assert_eq!(store.get_user_balance(user.id).await.unwrap().current, 0.0);
}

pub async fn test_withdrawals_newest_first<S: LoyaltyStore>(store: &S) {
    let user = make_user(store).await;
    let order = make_order(store, user.id).await;
    store
        .apply_accrual(order.id, OrderStatus::Processed, 100.0)
        .await
        .unwrap();

    let first = store.withdraw(user.id, "2377225624", 1.0).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = store.withdraw(user.id, "9278923470", 2.0).await.unwrap();

    let ids: Vec<Uuid> = store
        .get_user_withdrawals(user.id)
        .await
        .unwrap()
        .into_iter()
        .map(|w| w.id)
        .collect();
    assert_eq!(ids, vec![second.id, first.id]);
}

pub async fn test_ping<S: LoyaltyStore>(store: &S) {
    store.ping().await.expect("ping should succeed");
}

// =============================================================================
// Test runner macro
// =============================================================================

/// Run all LoyaltyStore interface tests against a store implementation.
#[macro_export]
macro_rules! run_loyalty_store_tests {
    ($store:expr) => {
        use $crate::storage::loyalty_store_tests::*;

        test_user_round_trip($store).await;
        println!("  test_user_round_trip: PASSED");

        test_duplicate_login($store).await;
        println!("  test_duplicate_login: PASSED");

        test_order_round_trip($store).await;
        println!("  test_order_round_trip: PASSED");

        test_order_number_unique_across_users($store).await;
        println!("  test_order_number_unique_across_users: PASSED");

        test_user_orders_newest_first($store).await;
        println!("  test_user_orders_newest_first: PASSED");

        test_orders_by_status_oldest_first($store).await;
        println!("  test_orders_by_status_oldest_first: PASSED");

        test_update_order_status($store).await;
        println!("  test_update_order_status: PASSED");

        test_apply_accrual_credits_balance($store).await;
        println!("  test_apply_accrual_credits_balance: PASSED");

        test_apply_accrual_without_credit($store).await;
        println!("  test_apply_accrual_without_credit: PASSED");

        test_apply_accrual_terminal_is_final($store).await;
        println!("  test_apply_accrual_terminal_is_final: PASSED");

        test_apply_accrual_unknown_order($store).await;
        println!("  test_apply_accrual_unknown_order: PASSED");

        test_balance_created_lazily($store).await;
        println!("  test_balance_created_lazily: PASSED");

        test_withdraw($store).await;
        println!("  test_withdraw: PASSED");

        test_withdraw_insufficient_funds($store).await;
        println!("  test_withdraw_insufficient_funds: PASSED");

        test_withdraw_exact_balance($store).await;
        println!("  test_withdraw_exact_balance: PASSED");

        test_withdrawals_newest_first($store).await;
        println!("  test_withdrawals_newest_first: PASSED");

        test_ping($store).await;
        println!("  test_ping: PASSED");
    };
}
