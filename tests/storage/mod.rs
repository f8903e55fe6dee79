//! Shared storage integration tests.
//!
//! Tests the LoyaltyStore interface against all implementations.
//! Each implementation module imports these test functions and runs them.

pub mod loyalty_store_tests;
