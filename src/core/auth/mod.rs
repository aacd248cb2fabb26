//! Authentication module for Gatehouse
//!
//! This module provides authentication functionality including:
//! - Password hashing and verification
//! - JWT token generation and validation
//! - Token pair issuance and single-use refresh token rotation
//! - Login attempt auditing and throttling
//! - REST API endpoints for auth operations

pub mod api;
pub mod attempts;
pub mod issuer;
pub mod jwt;
pub mod password;
pub mod rotator;
pub mod service;


pub use api::{AuthApiState, auth_api_router, extract_bearer_token};
pub use attempts::{FailReason, LoginAttemptRecorder, LoginThrottle};
pub use issuer::{ClientInfo, TokenIssuer};
pub use jwt::{Claims, JwtConfig, JwtError, JwtService, SignedToken, TokenPair, TokenType};
pub use password::{CredentialVerifier, PasswordError};
pub use rotator::RefreshRotator;
pub use service::{
    AuthError, AuthService, LoginRequest, LogoutRequest, RefreshRequest, RegisterRequest,
};
