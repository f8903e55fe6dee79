//! Retry utilities: backoff builders and retryable error classification.
//!
//! Uses `backon` for exponential backoff with jitter.

use std::time::Duration;

use backon::ExponentialBuilder;

use crate::interfaces::StorageError;

/// Backoff for worker store writes hitting a busy database.
///
/// - Min delay: 10ms
/// - Max delay: 1s
/// - Max attempts: 5
/// - Jitter enabled
pub fn store_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(10))
        .with_max_delay(Duration::from_secs(1))
        .with_max_times(5)
        .with_jitter()
}

/// Backoff for opening storage at startup.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 10
/// - Jitter enabled
pub fn startup_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(10)
        .with_jitter()
}

/// Determines if a storage error is worth retrying.
///
/// Retryable: lock contention, pool exhaustion, I/O.
/// Non-retryable: constraint violations, missing rows and business
/// rejections such as insufficient funds.
pub fn is_retryable_storage(err: &StorageError) -> bool {
    err.is_transient()
}
