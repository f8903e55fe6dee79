//! HTTP transport: session auth and the REST router.

pub mod auth;
pub mod rest;

pub use auth::{AuthError, AuthUser, TokenIssuer};
pub use rest::{router, serve, ApiError, AppState};
