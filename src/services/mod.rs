//! Business services.

pub mod accrual_worker;
pub mod loyalty;

pub use accrual_worker::{AccrualWorker, AccrualWorkerHandle, TickSummary};
pub use loyalty::{hash_password, LoyaltyService, OrderSubmission, ServiceError};
