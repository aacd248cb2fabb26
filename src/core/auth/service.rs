//! Authentication service
//!
//! Provides business logic for user registration, login, logout, and token refresh.
//! Coordinates between the stores, the credential verifier, the token issuer
//! and the refresh rotator.

use std::sync::Arc;

use chrono::Utc;

use crate::core::auth::attempts::{FailReason, LoginAttemptRecorder, LoginThrottle};
use crate::core::auth::issuer::{ClientInfo, TokenIssuer};
use crate::core::auth::jwt::{JwtError, JwtService, TokenPair};
use crate::core::auth::password::{CredentialVerifier, MAX_PASSWORD_BYTES, PasswordError};
use crate::core::auth::rotator::RefreshRotator;
use crate::core::db::models::{CreateUser, User, UserResponse};
use crate::core::db::repositories::{
    AuthStores, LoginAttemptRepositoryError, RefreshTokenRepositoryError, RefreshTokenStore,
    SessionRepositoryError, SessionStore, UserRepositoryError, UserStore,
};

const DEFAULT_MAX_LOGIN_ATTEMPTS: u32 = 5;
const DEFAULT_LOGIN_ATTEMPT_WINDOW_MINUTES: i64 = 15;

/// Authentication service error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Invalid or expired refresh token")]
    InvalidRefreshToken,

    #[error("Invalid or expired refresh token")]
    RefreshTokenExpired,

    #[error("Invalid token type")]
    TokenTypeMismatch,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("User not found")]
    NotFound,

    #[error("Email already registered")]
    EmailAlreadyExists,

    #[error("Too many login attempts, try again later")]
    TooManyAttempts,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<UserRepositoryError> for AuthError {
    fn from(err: UserRepositoryError) -> Self {
        match err {
            UserRepositoryError::NotFound => AuthError::NotFound,
            UserRepositoryError::EmailAlreadyExists => AuthError::EmailAlreadyExists,
            UserRepositoryError::DatabaseError(_) => AuthError::Internal(err.to_string()),
        }
    }
}

impl From<SessionRepositoryError> for AuthError {
    fn from(err: SessionRepositoryError) -> Self {
        AuthError::Internal(err.to_string())
    }
}

impl From<RefreshTokenRepositoryError> for AuthError {
    fn from(err: RefreshTokenRepositoryError) -> Self {
        AuthError::Internal(err.to_string())
    }
}

impl From<LoginAttemptRepositoryError> for AuthError {
    fn from(err: LoginAttemptRepositoryError) -> Self {
        AuthError::Internal(err.to_string())
    }
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => AuthError::TokenExpired,
            JwtError::InvalidToken => AuthError::InvalidToken,
            JwtError::InvalidTokenType => AuthError::TokenTypeMismatch,
            JwtError::EncodingError(_) => AuthError::Internal(err.to_string()),
        }
    }
}

impl From<PasswordError> for AuthError {
    fn from(err: PasswordError) -> Self {
        AuthError::Internal(err.to_string())
    }
}

/// Registration request data
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Login request data
#[derive(Debug, Clone, serde::Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Token refresh request
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Logout request; the refresh token is optional
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct LogoutRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    verifier: CredentialVerifier,
    issuer: TokenIssuer,
    rotator: RefreshRotator,
    recorder: LoginAttemptRecorder,
    throttle: LoginThrottle,
}

impl AuthService {
    /// Create a new authentication service with the default login throttle
    pub fn new(stores: AuthStores, jwt_service: JwtService, verifier: CredentialVerifier) -> Self {
        let issuer = TokenIssuer::new(
            jwt_service,
            stores.sessions.clone(),
            stores.refresh_tokens.clone(),
        );
        let rotator = RefreshRotator::new(
            issuer.clone(),
            stores.users.clone(),
            stores.sessions.clone(),
            stores.refresh_tokens.clone(),
        );

        Self {
            users: stores.users,
            sessions: stores.sessions,
            refresh_tokens: stores.refresh_tokens,
            verifier,
            issuer,
            rotator,
            recorder: LoginAttemptRecorder::new(stores.login_attempts.clone()),
            throttle: LoginThrottle::new(
                stores.login_attempts,
                DEFAULT_MAX_LOGIN_ATTEMPTS,
                DEFAULT_LOGIN_ATTEMPT_WINDOW_MINUTES,
            ),
        }
    }

    /// Replace the login throttle settings (`max_attempts == 0` disables it)
    pub fn with_login_throttle(mut self, max_attempts: u32, window_minutes: i64) -> Self {
        self.throttle = self.throttle.with_limits(max_attempts, window_minutes);
        self
    }

    pub fn jwt(&self) -> &JwtService {
        self.issuer.jwt()
    }

    fn normalize_email(email: &str) -> String {
        email.trim().to_lowercase()
    }

    /// Validate email format
    fn validate_email(email: &str) -> Result<(), AuthError> {
        let invalid = || AuthError::Validation("Invalid email format".to_string());

        if email.is_empty() {
            return Err(invalid());
        }

        // Check for valid structure: something@something.something
        let parts: Vec<&str> = email.split('@').collect();
        if parts.len() != 2 {
            return Err(invalid());
        }

        let local = parts[0];
        let domain = parts[1];

        if local.is_empty() || domain.is_empty() || !domain.contains('.') {
            return Err(invalid());
        }

        // Check domain has something after every dot
        if domain.split('.').any(|p| p.is_empty()) {
            return Err(invalid());
        }

        Ok(())
    }

    /// Validate username format
    fn validate_username(username: &str) -> Result<(), AuthError> {
        let invalid = || {
            AuthError::Validation(
                "Username must be 3-50 characters, start with a letter and contain only \
                 letters, digits, '_' or '-'"
                    .to_string(),
            )
        };

        if username.len() < 3 || username.len() > 50 {
            return Err(invalid());
        }

        if !username
            .chars()
            .next()
            .map(|c| c.is_alphabetic())
            .unwrap_or(false)
        {
            return Err(invalid());
        }

        if !username
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
        {
            return Err(invalid());
        }

        Ok(())
    }

    /// Passwords must be non-empty and fit bcrypt's input limit
    fn validate_password(password: &str) -> Result<(), AuthError> {
        if password.is_empty() {
            return Err(AuthError::Validation("Password is required".to_string()));
        }

        if password.len() > MAX_PASSWORD_BYTES {
            return Err(AuthError::Validation(format!(
                "Password must be at most {MAX_PASSWORD_BYTES} bytes"
            )));
        }

        Ok(())
    }

    /// Register a new user. No tokens are issued.
    pub async fn register(&self, request: RegisterRequest) -> Result<UserResponse, AuthError> {
        let email = Self::normalize_email(&request.email);
        let username = request.username.trim().to_string();

        Self::validate_email(&email)?;
        Self::validate_username(&username)?;
        Self::validate_password(&request.password)?;

        let password_hash = self.verifier.hash(&request.password)?;

        let user = self
            .users
            .create(&CreateUser {
                username,
                email,
                password_hash,
            })
            .await?;

        tracing::info!(user_id = %user.id, email = %user.email, "User registered");

        Ok(user.into())
    }

    /// Login an existing user
    ///
    /// Every credential failure surfaces as [`AuthError::InvalidCredentials`];
    /// the specific reason only lands in the audit record.
    pub async fn login(
        &self,
        request: LoginRequest,
        client: &ClientInfo,
    ) -> Result<TokenPair, AuthError> {
        let email = Self::normalize_email(&request.email);
        if email.is_empty() || request.password.is_empty() {
            return Err(AuthError::Validation(
                "Email and password are required".to_string(),
            ));
        }

        let ip = client.ip_address.clone();

        if self.throttle.is_throttled(&email).await {
            tracing::warn!(email = %email, "Login throttled");
            self.recorder
                .record_failure(&email, ip, FailReason::TooManyAttempts);
            return Err(AuthError::TooManyAttempts);
        }

        let user = match self.users.find_by_email(&email).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                self.verifier.verify_missing(&request.password);
                self.recorder
                    .record_failure(&email, ip, FailReason::InvalidEmail);
                return Err(AuthError::InvalidCredentials);
            }
            Err(e) => {
                self.recorder.record_failure(&email, ip, FailReason::Internal);
                return Err(e.into());
            }
        };

        match self.authenticate(&user, &request.password, client).await {
            Ok(tokens) => {
                self.recorder.record_success(&email, ip);
                tracing::info!(user_id = %user.id, "User logged in");
                Ok(tokens)
            }
            Err((reason, err)) => {
                self.recorder.record_failure(&email, ip, reason);
                Err(err)
            }
        }
    }

    /// Check credentials for a known user and issue their first token pair.
    ///
    /// `last_login_at` only moves once the pair exists; if stamping it fails
    /// the new session and refresh token are revoked again.
    async fn authenticate(
        &self,
        user: &User,
        password: &str,
        client: &ClientInfo,
    ) -> Result<TokenPair, (FailReason, AuthError)> {
        let internal = |err: AuthError| (FailReason::Internal, err);

        if !self
            .verifier
            .verify(&user.password_hash, password)
            .map_err(|e| internal(e.into()))?
        {
            return Err((FailReason::InvalidPassword, AuthError::InvalidCredentials));
        }

        if !user.is_active {
            return Err((FailReason::AccountInactive, AuthError::InvalidCredentials));
        }

        let tokens = self
            .issuer
            .issue_token_pair(user, client)
            .await
            .map_err(internal)?;

        if let Err(e) = self.users.record_login(user.id, Utc::now()).await {
            if let Err(revoke_err) = self.sessions.revoke_by_token(&tokens.access_token).await {
                tracing::error!(
                    user_id = %user.id,
                    error = %revoke_err,
                    "Failed to revoke session of aborted login"
                );
            }
            if let Err(revoke_err) = self
                .refresh_tokens
                .revoke_by_token(&tokens.refresh_token)
                .await
            {
                tracing::error!(
                    user_id = %user.id,
                    error = %revoke_err,
                    "Failed to revoke refresh token of aborted login"
                );
            }
            return Err(internal(e.into()));
        }

        Ok(tokens)
    }

    /// Refresh access token using a single-use refresh token
    pub async fn refresh(
        &self,
        request: RefreshRequest,
        client: &ClientInfo,
    ) -> Result<TokenPair, AuthError> {
        if request.refresh_token.is_empty() {
            return Err(AuthError::InvalidRefreshToken);
        }

        self.rotator.rotate(&request.refresh_token, client).await
    }

    /// Get current user from access token
    ///
    /// The token must still have an active session, so logout and rotation
    /// take effect before the token's `exp`.
    pub async fn current_user(&self, access_token: &str) -> Result<UserResponse, AuthError> {
        let claims = self.issuer.jwt().validate_access_token(access_token)?;

        let session = self
            .sessions
            .find_by_token(access_token)
            .await?
            .filter(|s| s.user_id == claims.sub)
            .ok_or(AuthError::InvalidToken)?;

        if !session.is_valid() {
            return Err(if session.is_expired() {
                AuthError::TokenExpired
            } else {
                AuthError::InvalidToken
            });
        }

        let user = self
            .users
            .find_by_id(claims.sub)
            .await?
            .ok_or(AuthError::NotFound)?;

        Ok(user.into())
    }

    /// Revoke the session behind `access_token` and, when it belongs to the
    /// same user, the given refresh token
    pub async fn logout(
        &self,
        access_token: &str,
        request: LogoutRequest,
    ) -> Result<(), AuthError> {
        let claims = self.issuer.jwt().validate_access_token(access_token)?;

        self.sessions.revoke_by_token(access_token).await?;

        if let Some(refresh_token) = request.refresh_token.as_deref() {
            match self.refresh_tokens.find_by_token(refresh_token).await? {
                Some(record) if record.user_id == claims.sub => {
                    self.refresh_tokens.revoke_by_token(refresh_token).await?;
                    if let Some(session_id) = record.session_id {
                        self.sessions.revoke(session_id).await?;
                    }
                }
                Some(_) => {
                    tracing::warn!(user_id = %claims.sub, "Logout with another user's refresh token");
                }
                None => {}
            }
        }

        tracing::info!(user_id = %claims.sub, "User logged out");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========================================================================
    // Validation Tests
    // ========================================================================

    #[test]
    fn test_validate_email_valid() {
        assert!(AuthService::validate_email("user@example.com").is_ok());
        assert!(AuthService::validate_email("user.name@example.com").is_ok());
        assert!(AuthService::validate_email("user+tag@example.co.uk").is_ok());
        assert!(AuthService::validate_email("a@b.co").is_ok());
    }

    #[test]
    fn test_validate_email_invalid() {
        assert!(AuthService::validate_email("").is_err());
        assert!(AuthService::validate_email("invalid").is_err());
        assert!(AuthService::validate_email("@example.com").is_err());
        assert!(AuthService::validate_email("user@").is_err());
        assert!(AuthService::validate_email("user@example").is_err());
        assert!(AuthService::validate_email("user@@example.com").is_err());
        assert!(AuthService::validate_email("user@.com").is_err());
        assert!(AuthService::validate_email("user@example.").is_err());
    }

    #[test]
    fn test_validate_username_valid() {
        assert!(AuthService::validate_username("alice").is_ok());
        assert!(AuthService::validate_username("user123").is_ok());
        assert!(AuthService::validate_username("user_name").is_ok());
        assert!(AuthService::validate_username("user-name").is_ok());
    }

    #[test]
    fn test_validate_username_invalid() {
        assert!(AuthService::validate_username("").is_err()); // empty
        assert!(AuthService::validate_username("ab").is_err()); // too short
        assert!(AuthService::validate_username("a".repeat(51).as_str()).is_err()); // too long
        assert!(AuthService::validate_username("123user").is_err()); // starts with number
        assert!(AuthService::validate_username("_user").is_err()); // starts with underscore
        assert!(AuthService::validate_username("user name").is_err()); // contains space
        assert!(AuthService::validate_username("user@name").is_err()); // contains @
    }

    #[test]
    fn test_validate_password() {
        assert!(AuthService::validate_password("pw123").is_ok());
        assert!(AuthService::validate_password(&"a".repeat(72)).is_ok());

        assert!(matches!(
            AuthService::validate_password(""),
            Err(AuthError::Validation(_))
        ));
        assert!(matches!(
            AuthService::validate_password(&"a".repeat(73)),
            Err(AuthError::Validation(_))
        ));
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(
            AuthService::normalize_email("  Alice@Example.COM "),
            "alice@example.com"
        );
    }

    // ========================================================================
    // Error Conversion Tests
    // ========================================================================

    #[test]
    fn test_auth_error_display() {
        assert_eq!(
            format!("{}", AuthError::InvalidCredentials),
            "Invalid email or password"
        );
        assert_eq!(
            AuthError::InvalidRefreshToken.to_string(),
            AuthError::RefreshTokenExpired.to_string()
        );
        assert_eq!(format!("{}", AuthError::InvalidToken), "Invalid token");
        assert_eq!(format!("{}", AuthError::TokenExpired), "Token expired");
        assert_eq!(
            format!("{}", AuthError::EmailAlreadyExists),
            "Email already registered"
        );
    }

    #[test]
    fn test_auth_error_from_user_repository_error() {
        let err: AuthError = UserRepositoryError::NotFound.into();
        assert!(matches!(err, AuthError::NotFound));

        let err: AuthError = UserRepositoryError::EmailAlreadyExists.into();
        assert!(matches!(err, AuthError::EmailAlreadyExists));

        let err: AuthError = UserRepositoryError::DatabaseError(sqlx::Error::PoolTimedOut).into();
        assert!(matches!(err, AuthError::Internal(_)));
    }

    #[test]
    fn test_auth_error_from_jwt_error() {
        let err: AuthError = JwtError::Expired.into();
        assert!(matches!(err, AuthError::TokenExpired));

        let err: AuthError = JwtError::InvalidToken.into();
        assert!(matches!(err, AuthError::InvalidToken));

        let err: AuthError = JwtError::InvalidTokenType.into();
        assert!(matches!(err, AuthError::TokenTypeMismatch));

        let err: AuthError = JwtError::EncodingError("bad key".to_string()).into();
        assert!(matches!(err, AuthError::Internal(_)));
    }

    #[test]
    fn test_auth_error_from_password_error() {
        let err: AuthError = PasswordError::MalformedHash("bad".to_string()).into();
        assert!(matches!(err, AuthError::Internal(_)));
    }

    // ========================================================================
    // Request Deserialization Tests
    // ========================================================================

    #[test]
    fn test_register_request_deserialization() {
        let json = r#"{
            "username": "alice",
            "email": "alice@x.com",
            "password": "pw123"
        }"#;

        let request: RegisterRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.username, "alice");
        assert_eq!(request.email, "alice@x.com");
        assert_eq!(request.password, "pw123");
    }

    #[test]
    fn test_refresh_request_deserialization() {
        let json = r#"{
            "refresh_token": "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9..."
        }"#;

        let request: RefreshRequest = serde_json::from_str(json).unwrap();
        assert!(request.refresh_token.starts_with("eyJ"));
    }

    #[test]
    fn test_logout_request_refresh_token_is_optional() {
        let request: LogoutRequest = serde_json::from_str("{}").unwrap();
        assert!(request.refresh_token.is_none());

        let request: LogoutRequest =
            serde_json::from_str(r#"{"refresh_token": "abc"}"#).unwrap();
        assert_eq!(request.refresh_token.as_deref(), Some("abc"));
    }
}
