//! REST API for the loyalty service.
//!
//! Endpoints:
//! - `POST /api/user/register`, `POST /api/user/login`: sessions
//! - `POST|GET /api/user/orders`: submit and list orders
//! - `GET /api/user/balance`, `POST /api/user/balance/withdraw`: points
//! - `GET /api/user/withdrawals`: spending history
//! - `GET /api/orders/:number`: accrual state of one own order
//! - `GET /api/health`: store liveness

use std::future::Future;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRef, Path, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::compression::CompressionLayer;
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::auth::{AuthError, AuthUser, TokenIssuer};
use crate::model::{Order, OrderStatus};
use crate::services::{LoyaltyService, OrderSubmission, ServiceError};

/// Shared state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: LoyaltyService,
    pub tokens: TokenIssuer,
}

impl FromRef<AppState> for TokenIssuer {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}

/// Start the REST server on an already bound listener.
///
/// Returns once `shutdown` resolves and in-flight requests have drained.
pub async fn serve<F>(
    state: AppState,
    listener: tokio::net::TcpListener,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state);
    info!(address = %listener.local_addr()?, "REST API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Build the axum router (separated for testing).
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/user/register", post(register))
        .route("/api/user/login", post(login))
        .route("/api/user/orders", post(submit_order).get(list_orders))
        .route("/api/user/balance", get(balance))
        .route("/api/user/balance/withdraw", post(withdraw))
        .route("/api/user/withdrawals", get(withdrawals))
        .route("/api/orders/:number", get(order_accrual))
        .route("/api/health", get(health))
        .layer(CompressionLayer::new())
        .layer(RequestDecompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Errors
// ============================================================================

/// Handler error mapped onto a status code and a JSON body.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Service(ServiceError),
    Auth(AuthError),
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError::Service(err)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Auth(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => error_body(StatusCode::BAD_REQUEST, &message),
            ApiError::Auth(err) => err.into_response(),
            ApiError::Service(err) => match err {
                ServiceError::UserExists(_) => {
                    error_body(StatusCode::CONFLICT, "User already exists")
                }
                ServiceError::OrderConflict(_) => error_body(
                    StatusCode::CONFLICT,
                    "Order already uploaded by another user",
                ),
                ServiceError::InvalidCredentials => {
                    error_body(StatusCode::UNAUTHORIZED, "Invalid credentials")
                }
                ServiceError::UserNotFound(_) => {
                    error_body(StatusCode::UNAUTHORIZED, "Unauthorized")
                }
                ServiceError::InsufficientFunds { .. } => {
                    error_body(StatusCode::PAYMENT_REQUIRED, "Insufficient funds")
                }
                ServiceError::InvalidOrderNumber(_) => {
                    error_body(StatusCode::UNPROCESSABLE_ENTITY, "Invalid order number")
                }
                ServiceError::InvalidAmount(_) => {
                    error_body(StatusCode::BAD_REQUEST, "Sum must be positive")
                }
                ServiceError::InvalidInput(message) => {
                    error_body(StatusCode::BAD_REQUEST, &message)
                }
                ServiceError::OrderNotFound(_) => StatusCode::NO_CONTENT.into_response(),
                ServiceError::Storage(e) => {
                    error!(error = %e, "Request failed on storage");
                    error_body(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
                }
            },
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct Credentials {
    login: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct WithdrawRequest {
    order: String,
    sum: f64,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Serialize)]
struct OrderResponse {
    number: String,
    status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    accrual: Option<f64>,
    uploaded_at: String,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            accrual: visible_accrual(&order),
            number: order.number,
            status: order.status,
            uploaded_at: rfc3339(&order.uploaded_at),
        }
    }
}

#[derive(Debug, Serialize)]
struct OrderAccrualResponse {
    order: String,
    status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    accrual: Option<f64>,
}

#[derive(Debug, Serialize)]
struct BalanceResponse {
    current: f64,
    withdrawn: f64,
}

#[derive(Debug, Serialize)]
struct WithdrawalResponse {
    order: String,
    sum: f64,
    processed_at: String,
}

/// Accrual is only reported once the order is PROCESSED.
fn visible_accrual(order: &Order) -> Option<f64> {
    (order.status == OrderStatus::Processed).then_some(order.accrual)
}

fn rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, false)
}

// ============================================================================
// Handlers
// ============================================================================

fn session_response(tokens: &TokenIssuer, user_id: Uuid) -> ApiResult<Response> {
    let token = tokens.issue(user_id)?;
    Ok((
        StatusCode::OK,
        [
            (AUTHORIZATION, format!("Bearer {}", token)),
            (SET_COOKIE, tokens.session_cookie(&token)),
        ],
        Json(TokenResponse { token }),
    )
        .into_response())
}

fn credentials(body: Result<Json<Credentials>, JsonRejection>) -> ApiResult<Credentials> {
    let Json(creds) = body?;
    if creds.login.trim().is_empty() || creds.password.is_empty() {
        return Err(ApiError::BadRequest(
            "login and password are required".to_string(),
        ));
    }
    Ok(creds)
}

async fn register(
    State(state): State<AppState>,
    body: Result<Json<Credentials>, JsonRejection>,
) -> ApiResult<Response> {
    let creds = credentials(body)?;
    let user = state.service.register(&creds.login, &creds.password).await?;
    session_response(&state.tokens, user.id)
}

async fn login(
    State(state): State<AppState>,
    body: Result<Json<Credentials>, JsonRejection>,
) -> ApiResult<Response> {
    let creds = credentials(body)?;
    let user = state.service.login(&creds.login, &creds.password).await?;
    session_response(&state.tokens, user.id)
}

async fn submit_order(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let is_text = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/plain"));
    if !is_text {
        return Err(ApiError::BadRequest(
            "Content-Type must be text/plain".to_string(),
        ));
    }

    let number = std::str::from_utf8(&body)
        .map_err(|_| ApiError::BadRequest("Invalid request body".to_string()))?
        .trim();
    if number.is_empty() {
        return Err(ApiError::BadRequest("Order number is required".to_string()));
    }

    match state.service.create_order(user_id, number).await? {
        OrderSubmission::Accepted(_) => Ok(StatusCode::ACCEPTED),
        OrderSubmission::AlreadyUploaded(_) => Ok(StatusCode::OK),
    }
}

async fn list_orders(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<Response> {
    let orders = state.service.get_user_orders(user_id).await?;
    if orders.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    let body: Vec<OrderResponse> = orders.into_iter().map(OrderResponse::from).collect();
    Ok(Json(body).into_response())
}

async fn balance(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<Json<BalanceResponse>> {
    let balance = state.service.get_user_balance(user_id).await?;
    Ok(Json(BalanceResponse {
        current: balance.current,
        withdrawn: balance.withdrawn,
    }))
}

async fn withdraw(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    body: Result<Json<WithdrawRequest>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(request) = body?;
    state
        .service
        .withdraw_balance(user_id, &request.order, request.sum)
        .await?;
    Ok(StatusCode::OK)
}

async fn withdrawals(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<Response> {
    let withdrawals = state.service.get_user_withdrawals(user_id).await?;
    if withdrawals.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    let body: Vec<WithdrawalResponse> = withdrawals
        .into_iter()
        .map(|w| WithdrawalResponse {
            processed_at: rfc3339(&w.processed_at),
            order: w.order_number,
            sum: w.sum,
        })
        .collect();
    Ok(Json(body).into_response())
}

async fn order_accrual(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(number): Path<String>,
) -> ApiResult<Response> {
    match state.service.get_order_by_number(user_id, &number).await? {
        Some(order) => Ok(Json(OrderAccrualResponse {
            accrual: visible_accrual(&order),
            order: order.number,
            status: order.status,
        })
        .into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

async fn health(State(state): State<AppState>) -> StatusCode {
    match state.service.ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            warn!(error = %e, "Health check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
