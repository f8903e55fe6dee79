//! Session tokens and the authenticated-user extractor.
//!
//! Tokens are HS256 JWTs carrying the user id. Clients send them back either
//! in the session cookie or as `Authorization: Bearer <token>`; the cookie
//! wins when both are present.

use axum::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::config::{AuthConfig, MAX_TOKEN_TTL_HOURS};

/// Authentication failures. All of them answer 401.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing session token")]
    MissingToken,

    #[error("Invalid session token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        debug!(error = %self, "Rejected unauthenticated request");
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Unauthorized" })),
        )
            .into_response()
    }
}

/// JWT payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub exp: i64,
    pub iat: i64,
}

/// Signs and verifies session tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: chrono::Duration,
    cookie_name: String,
}

impl TokenIssuer {
    pub fn new(config: &AuthConfig) -> Self {
        let secret = config.secret_key.as_bytes();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
            ttl: chrono::Duration::hours(
                config
                    .token_ttl_hours
                    .clamp(-MAX_TOKEN_TTL_HOURS, MAX_TOKEN_TTL_HOURS),
            ),
            cookie_name: config.cookie_name.clone(),
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn issue(&self, user_id: Uuid) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            user_id,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    pub fn verify(&self, token: &str) -> Result<Uuid, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)?;
        Ok(data.claims.user_id)
    }

    /// `Set-Cookie` value carrying `token`.
    pub fn session_cookie(&self, token: &str) -> String {
        format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.cookie_name,
            token,
            self.ttl.num_seconds()
        )
    }

    /// Token from the session cookie, falling back to a bearer header.
    pub fn token_from_headers(&self, headers: &HeaderMap) -> Option<String> {
        let from_cookie = headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, value)| *name == self.cookie_name && !value.is_empty())
            .map(|(_, value)| value.to_string());

        from_cookie.or_else(|| {
            headers
                .get(AUTHORIZATION)?
                .to_str()
                .ok()?
                .strip_prefix("Bearer ")
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty())
        })
    }
}

/// Id of the user making the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    TokenIssuer: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let tokens = TokenIssuer::from_ref(state);
        let token = tokens
            .token_from_headers(&parts.headers)
            .ok_or(AuthError::MissingToken)?;
        Ok(AuthUser(tokens.verify(&token)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(&AuthConfig {
            secret_key: "test-secret".to_string(),
            ..AuthConfig::default()
        })
    }

    #[test]
    fn test_issue_then_verify() {
        let tokens = issuer();
        let user_id = Uuid::new_v4();
        let token = tokens.issue(user_id).unwrap();
        assert_eq!(tokens.verify(&token).unwrap(), user_id);
    }

    #[test]
    fn test_foreign_signature_rejected() {
        let other = TokenIssuer::new(&AuthConfig {
            secret_key: "another-secret".to_string(),
            ..AuthConfig::default()
        });
        let token = other.issue(Uuid::new_v4()).unwrap();
        assert!(matches!(
            issuer().verify(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        let tokens = TokenIssuer::new(&AuthConfig {
            secret_key: "test-secret".to_string(),
            token_ttl_hours: -1,
            ..AuthConfig::default()
        });
        let token = tokens.issue(Uuid::new_v4()).unwrap();
        assert!(tokens.verify(&token).is_err());
    }

    #[test]
    fn test_oversized_ttl_is_capped() {
        let tokens = TokenIssuer::new(&AuthConfig {
            secret_key: "test-secret".to_string(),
            token_ttl_hours: i64::MAX,
            ..AuthConfig::default()
        });
        let user_id = Uuid::new_v4();
        let token = tokens.issue(user_id).unwrap();
        assert_eq!(tokens.verify(&token).unwrap(), user_id);
        assert!(tokens
            .session_cookie(&token)
            .ends_with(&format!("Max-Age={}", MAX_TOKEN_TTL_HOURS * 3600)));
    }

    #[test]
    fn test_token_from_cookie() {
        let tokens = issuer();
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; auth_token=abc.def.ghi"),
        );
        assert_eq!(
            tokens.token_from_headers(&headers).as_deref(),
            Some("abc.def.ghi")
        );
    }

    #[test]
    fn test_token_from_bearer() {
        let tokens = issuer();
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(
            tokens.token_from_headers(&headers).as_deref(),
            Some("abc.def.ghi")
        );

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwdw=="));
        assert!(tokens.token_from_headers(&headers).is_none());
    }

    #[test]
    fn test_session_cookie_format() {
        let cookie = issuer().session_cookie("tok");
        assert!(cookie.starts_with("auth_token=tok;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=2592000"));
    }
}
