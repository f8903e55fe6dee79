//! Abstract interfaces for loyalty components.
//!
//! These traits define the contracts for:
//! - Order, balance and withdrawal storage (persistence)
//! - Accrual service lookups (external HTTP collaborator)

pub mod accrual;
pub mod store;

pub use accrual::{AccrualClient, AccrualError, AccrualResponse};
pub use store::{LoyaltyStore, StorageError};
