//! Loyalty - points backend
//!
//! Users register, upload order numbers and spend the points an external
//! accrual service awards for them. A background worker reconciles pending
//! orders with that service.

pub mod clients;
pub mod config;
pub mod handlers;
pub mod interfaces;
pub mod model;
pub mod services;
pub mod storage;
pub mod utils;
