//! Token pair issuance
//!
//! Minting a pair is a signing step followed by two writes: a session row for
//! the access token and a refresh token row pointing at that session. The pair
//! is only handed out once both rows exist.

use std::sync::Arc;

use crate::core::auth::jwt::{JwtService, TokenPair};
use crate::core::auth::service::AuthError;
use crate::core::db::models::{CreateRefreshToken, CreateSession, User};
use crate::core::db::repositories::{RefreshTokenStore, SessionStore, hash_token};

/// Request metadata recorded on sessions and login attempts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Clone)]
pub struct TokenIssuer {
    jwt: JwtService,
    sessions: Arc<dyn SessionStore>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
}

impl TokenIssuer {
    pub fn new(
        jwt: JwtService,
        sessions: Arc<dyn SessionStore>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
    ) -> Self {
        Self {
            jwt,
            sessions,
            refresh_tokens,
        }
    }

    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    /// Sign a new access/refresh pair for `user` and persist both records
    pub async fn issue_token_pair(
        &self,
        user: &User,
        client: &ClientInfo,
    ) -> Result<TokenPair, AuthError> {
        let pair = self.jwt.generate_token_pair(user.id, &user.email)?;

        let session = self
            .sessions
            .create(&CreateSession {
                user_id: user.id,
                token_hash: hash_token(&pair.access_token),
                expires_at: pair.access_expires_at,
                ip_address: client.ip_address.clone(),
                user_agent: client.user_agent.clone(),
            })
            .await?;

        let stored = self
            .refresh_tokens
            .create(&CreateRefreshToken {
                user_id: user.id,
                session_id: Some(session.id),
                token_hash: hash_token(&pair.refresh_token),
                expires_at: pair.refresh_expires_at,
            })
            .await;

        if let Err(e) = stored {
            // Without its refresh record the access session must not stay usable
            if let Err(revoke_err) = self.sessions.revoke(session.id).await {
                tracing::error!(
                    session_id = %session.id,
                    error = %revoke_err,
                    "Failed to revoke orphaned session"
                );
            }
            return Err(e.into());
        }

        tracing::debug!(user_id = %user.id, session_id = %session.id, "Issued token pair");

        Ok(pair)
    }
}
