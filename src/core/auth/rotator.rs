//! Single-use refresh token rotation
//!
//! A refresh token is claimed with a conditional update before anything new is
//! minted, so of any number of concurrent redeemers exactly one gets a pair.
//! If issuing the new pair fails afterwards, the old token stays spent.

use std::sync::Arc;

use chrono::Utc;

use crate::core::auth::issuer::{ClientInfo, TokenIssuer};
use crate::core::auth::jwt::TokenPair;
use crate::core::auth::service::AuthError;
use crate::core::db::repositories::{RefreshTokenStore, SessionStore, UserStore};

#[derive(Clone)]
pub struct RefreshRotator {
    issuer: TokenIssuer,
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
}

impl RefreshRotator {
    pub fn new(
        issuer: TokenIssuer,
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
    ) -> Self {
        Self {
            issuer,
            users,
            sessions,
            refresh_tokens,
        }
    }

    /// Redeem `refresh_token` for a new pair
    pub async fn rotate(
        &self,
        refresh_token: &str,
        client: &ClientInfo,
    ) -> Result<TokenPair, AuthError> {
        let record = self
            .refresh_tokens
            .find_by_token(refresh_token)
            .await?
            .ok_or(AuthError::InvalidRefreshToken)?;

        if record.is_spent() {
            tracing::warn!(
                user_id = %record.user_id,
                token_id = %record.id,
                "Refresh token replay rejected"
            );
            return Err(AuthError::InvalidRefreshToken);
        }

        if record.expires_at < Utc::now() {
            return Err(AuthError::RefreshTokenExpired);
        }

        let claims = self
            .issuer
            .jwt()
            .validate_refresh_token(refresh_token)
            .map_err(|e| {
                tracing::debug!(token_id = %record.id, error = %e, "Stored refresh token failed validation");
                AuthError::InvalidRefreshToken
            })?;

        if claims.sub != record.user_id {
            tracing::warn!(token_id = %record.id, "Refresh token subject mismatch");
            return Err(AuthError::InvalidRefreshToken);
        }

        if !self.refresh_tokens.consume(record.id).await? {
            tracing::warn!(
                user_id = %record.user_id,
                token_id = %record.id,
                "Refresh token already redeemed by a concurrent request"
            );
            return Err(AuthError::InvalidRefreshToken);
        }

        let user = self
            .users
            .find_by_id(record.user_id)
            .await?
            .filter(|u| u.is_active)
            .ok_or(AuthError::InvalidRefreshToken)?;

        let pair = self.issuer.issue_token_pair(&user, client).await?;

        if let Some(session_id) = record.session_id {
            if let Err(e) = self.sessions.revoke(session_id).await {
                tracing::warn!(
                    session_id = %session_id,
                    error = %e,
                    "Failed to revoke session of rotated refresh token"
                );
            }
        }

        tracing::info!(user_id = %user.id, "Refresh token rotated");

        Ok(pair)
    }
}
