//! Auth API endpoints
//!
//! Provides REST API endpoints for authentication:
//! - POST /auth/register - Register a new user
//! - POST /auth/login - Login and get tokens
//! - POST /auth/token/refresh - Redeem a refresh token for a new pair
//! - POST /auth/logout - Revoke the current session (and optionally a refresh token)
//! - GET /users/me - Get current user info
//! - GET /health - Liveness check

use axum::{
    Json, Router,
    body::Bytes,
    extract::{ConnectInfo, FromRequestParts, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::core::auth::{
    AuthError, AuthService, ClientInfo, LoginRequest, LogoutRequest, RefreshRequest,
    RegisterRequest, TokenPair,
};
use crate::core::db::models::UserResponse;

/// Auth API state containing the auth service
#[derive(Clone)]
pub struct AuthApiState {
    pub auth_service: AuthService,
    /// Read the client address from proxy headers instead of the peer
    pub trust_proxy_headers: bool,
}

impl AuthApiState {
    pub fn new(auth_service: AuthService) -> Self {
        Self {
            auth_service,
            trust_proxy_headers: false,
        }
    }

    pub fn trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }
}

/// API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
}

impl ApiError {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
        }
    }
}

/// Convert AuthError to API response
impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AuthError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AuthError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS"),
            AuthError::InvalidRefreshToken | AuthError::RefreshTokenExpired => {
                (StatusCode::UNAUTHORIZED, "INVALID_REFRESH_TOKEN")
            }
            AuthError::TokenTypeMismatch => (StatusCode::UNAUTHORIZED, "INVALID_TOKEN_TYPE"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "INVALID_TOKEN"),
            AuthError::TokenExpired => (StatusCode::UNAUTHORIZED, "TOKEN_EXPIRED"),
            AuthError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AuthError::EmailAlreadyExists => (StatusCode::CONFLICT, "EMAIL_EXISTS"),
            AuthError::TooManyAttempts => (StatusCode::TOO_MANY_REQUESTS, "TOO_MANY_ATTEMPTS"),
            AuthError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let message = match &self {
            AuthError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal error while handling auth request");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(ApiError::new(message, code))).into_response()
    }
}

impl From<JsonRejection> for AuthError {
    fn from(rejection: JsonRejection) -> Self {
        AuthError::Validation(rejection.body_text())
    }
}

/// Token pair as returned to clients
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

impl TokenResponse {
    fn new(pair: TokenPair, expires_in: i64) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: pair.token_type,
            expires_in,
        }
    }
}

/// Client address and user agent.
///
/// The address comes from the TCP peer unless the state trusts proxy headers,
/// in which case the first `X-Forwarded-For` hop, then `X-Real-IP`, win.
impl FromRequestParts<Arc<AuthApiState>> for ClientInfo {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AuthApiState>,
    ) -> Result<Self, Self::Rejection> {
        Ok(client_info_from_parts(parts, state.trust_proxy_headers))
    }
}

fn client_info_from_parts(parts: &Parts, trust_proxy_headers: bool) -> ClientInfo {
    let header_value = |name: &str| {
        parts
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let peer = || {
        parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
    };

    let ip_address = if trust_proxy_headers {
        let forwarded = header_value("x-forwarded-for").and_then(|v| {
            v.split(',')
                .next()
                .map(|hop| hop.trim().to_string())
                .filter(|hop| !hop.is_empty())
        });
        forwarded.or_else(|| header_value("x-real-ip")).or_else(peer)
    } else {
        peer()
    };

    ClientInfo {
        ip_address,
        user_agent: header_value(header::USER_AGENT.as_str()),
    }
}

/// Create the auth API router
pub fn auth_api_router(state: AuthApiState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/auth/register", post(register_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/token/refresh", post(refresh_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/users/me", get(me_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// POST /auth/register
/// Register a new user
async fn register_handler(
    State(state): State<Arc<AuthApiState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UserResponse>), AuthError> {
    let Json(request) = payload?;

    let user = state.auth_service.register(request).await?;

    Ok((StatusCode::CREATED, Json(user)))
}

/// POST /auth/login
/// Login and get access/refresh tokens
async fn login_handler(
    State(state): State<Arc<AuthApiState>>,
    client: ClientInfo,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, AuthError> {
    let Json(request) = payload?;

    let tokens = state.auth_service.login(request, &client).await?;
    let expires_in = state.auth_service.jwt().access_token_ttl().num_seconds();

    Ok(Json(TokenResponse::new(tokens, expires_in)))
}

/// POST /auth/token/refresh
/// Redeem a refresh token
async fn refresh_handler(
    State(state): State<Arc<AuthApiState>>,
    client: ClientInfo,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, AuthError> {
    let Json(request) = payload?;

    let tokens = state.auth_service.refresh(request, &client).await?;
    let expires_in = state.auth_service.jwt().access_token_ttl().num_seconds();

    Ok(Json(TokenResponse::new(tokens, expires_in)))
}

/// POST /auth/logout
/// Revoke the bearer token's session; the JSON body is optional
async fn logout_handler(
    State(state): State<Arc<AuthApiState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AuthError> {
    let token = extract_bearer_token(&headers).ok_or(AuthError::InvalidToken)?;

    let request = parse_logout_body(&body)?;

    state.auth_service.logout(&token, request).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// An absent or blank body means "no refresh token", whatever the content type
fn parse_logout_body(body: &[u8]) -> Result<LogoutRequest, AuthError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(LogoutRequest::default());
    }

    serde_json::from_slice(body)
        .map_err(|e| AuthError::Validation(format!("Invalid logout body: {e}")))
}

/// GET /users/me
/// Get current user info from access token
async fn me_handler(
    State(state): State<Arc<AuthApiState>>,
    headers: HeaderMap,
) -> Result<Json<UserResponse>, AuthError> {
    let token = extract_bearer_token(&headers).ok_or(AuthError::InvalidToken)?;

    let user = state.auth_service.current_user(&token).await?;

    Ok(Json(user))
}

/// GET /health
async fn health_handler() -> &'static str {
    "OK"
}

/// Extract the token from an `Authorization: Bearer <token>` header.
///
/// The scheme is case-insensitive; anything other than exactly two
/// space-separated parts with a non-empty token yields `None`.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())?;

    let parts: Vec<&str> = auth_header.split(' ').collect();
    if parts.len() != 2 || !parts[0].eq_ignore_ascii_case("bearer") || parts[1].is_empty() {
        return None;
    }

    Some(parts[1].to_string())
}
