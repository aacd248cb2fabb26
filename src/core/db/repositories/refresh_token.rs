//! Refresh token repository
//!
//! Refresh tokens are single-use. [`RefreshTokenStore::consume`] is the only
//! way to spend one and is a conditional update, so of any number of
//! concurrent redeemers at most one sees `true`.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::hash_token;
use crate::core::db::models::{CreateRefreshToken, RefreshToken};

/// Refresh token repository error types
#[derive(Debug, thiserror::Error)]
pub enum RefreshTokenRepositoryError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

/// Typed storage for [`RefreshToken`] records
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn create(
        &self,
        token: &CreateRefreshToken,
    ) -> Result<RefreshToken, RefreshTokenRepositoryError>;

    /// Find a refresh token by its raw value (hashed for lookup), spent or not
    async fn find_by_token(
        &self,
        raw_token: &str,
    ) -> Result<Option<RefreshToken>, RefreshTokenRepositoryError>;

    /// Atomically move an unused, unrevoked token to used.
    /// Returns false when the token was already spent.
    async fn consume(&self, id: Uuid) -> Result<bool, RefreshTokenRepositoryError>;

    /// Revoke an unspent token by raw value
    async fn revoke_by_token(&self, raw_token: &str) -> Result<bool, RefreshTokenRepositoryError>;

    /// Delete tokens past their expiry
    async fn cleanup_expired(&self) -> Result<u64, RefreshTokenRepositoryError>;
}

const REFRESH_TOKEN_COLUMNS: &str =
    "id, user_id, session_id, token_hash, expires_at, is_used, revoked_at, created_at";

/// PostgreSQL-backed refresh token repository
#[derive(Clone)]
pub struct RefreshTokenRepository {
    pool: PgPool,
}

impl RefreshTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshTokenStore for RefreshTokenRepository {
    async fn create(
        &self,
        token: &CreateRefreshToken,
    ) -> Result<RefreshToken, RefreshTokenRepositoryError> {
        let query = format!(
            r#"
            INSERT INTO refresh_tokens (user_id, session_id, token_hash, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING {REFRESH_TOKEN_COLUMNS}
            "#
        );

        let record = sqlx::query_as::<_, RefreshToken>(&query)
            .bind(token.user_id)
            .bind(token.session_id)
            .bind(&token.token_hash)
            .bind(token.expires_at)
            .fetch_one(&self.pool)
            .await?;

        Ok(record)
    }

    async fn find_by_token(
        &self,
        raw_token: &str,
    ) -> Result<Option<RefreshToken>, RefreshTokenRepositoryError> {
        let query =
            format!("SELECT {REFRESH_TOKEN_COLUMNS} FROM refresh_tokens WHERE token_hash = $1");

        let record = sqlx::query_as::<_, RefreshToken>(&query)
            .bind(hash_token(raw_token))
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn consume(&self, id: Uuid) -> Result<bool, RefreshTokenRepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET is_used = TRUE, revoked_at = NOW()
            WHERE id = $1 AND is_used = FALSE AND revoked_at IS NULL
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn revoke_by_token(&self, raw_token: &str) -> Result<bool, RefreshTokenRepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = NOW()
            WHERE token_hash = $1 AND is_used = FALSE AND revoked_at IS NULL
            "#,
        )
        .bind(hash_token(raw_token))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn cleanup_expired(&self) -> Result<u64, RefreshTokenRepositoryError> {
        let result = sqlx::query(
            r#"
            DELETE FROM refresh_tokens
            WHERE expires_at < NOW()
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
