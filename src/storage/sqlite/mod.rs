//! SQLite implementations of storage interfaces.

mod store;

pub use store::SqliteLoyaltyStore;
