//! Session repository for access token records
//!
//! Every issued access token has a session row. Tokens are stored as SHA-256
//! hashes; lookups take the raw token and hash it first.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::hash_token;
use crate::core::db::models::{CreateSession, Session};

/// Session repository error types
#[derive(Debug, thiserror::Error)]
pub enum SessionRepositoryError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

/// Typed storage for [`Session`] records
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: &CreateSession) -> Result<Session, SessionRepositoryError>;

    /// Find a session by raw access token (hashed for lookup)
    async fn find_by_token(
        &self,
        raw_token: &str,
    ) -> Result<Option<Session>, SessionRepositoryError>;

    /// Mark a session inactive; returns false if it was not active
    async fn revoke(&self, id: Uuid) -> Result<bool, SessionRepositoryError>;

    /// Mark the session for a raw access token inactive
    async fn revoke_by_token(&self, raw_token: &str) -> Result<bool, SessionRepositoryError>;

    /// Delete sessions past their expiry
    async fn cleanup_expired(&self) -> Result<u64, SessionRepositoryError>;
}

const SESSION_COLUMNS: &str =
    "id, user_id, token_hash, expires_at, issued_at, ip_address, user_agent, is_active, revoked_at";

/// PostgreSQL-backed session repository
#[derive(Clone)]
pub struct SessionRepository {
    pool: PgPool,
}

impl SessionRepository {
    /// Create a new session repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for SessionRepository {
    async fn create(&self, session: &CreateSession) -> Result<Session, SessionRepositoryError> {
        let query = format!(
            r#"
            INSERT INTO sessions (user_id, token_hash, expires_at, ip_address, user_agent)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {SESSION_COLUMNS}
            "#
        );

        let session = sqlx::query_as::<_, Session>(&query)
            .bind(session.user_id)
            .bind(&session.token_hash)
            .bind(session.expires_at)
            .bind(&session.ip_address)
            .bind(&session.user_agent)
            .fetch_one(&self.pool)
            .await?;

        Ok(session)
    }

    async fn find_by_token(
        &self,
        raw_token: &str,
    ) -> Result<Option<Session>, SessionRepositoryError> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE token_hash = $1");

        let session = sqlx::query_as::<_, Session>(&query)
            .bind(hash_token(raw_token))
            .fetch_optional(&self.pool)
            .await?;

        Ok(session)
    }

    async fn revoke(&self, id: Uuid) -> Result<bool, SessionRepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET is_active = FALSE, revoked_at = NOW()
            WHERE id = $1 AND is_active = TRUE
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn revoke_by_token(&self, raw_token: &str) -> Result<bool, SessionRepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET is_active = FALSE, revoked_at = NOW()
            WHERE token_hash = $1 AND is_active = TRUE
            "#,
        )
        .bind(hash_token(raw_token))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn cleanup_expired(&self) -> Result<u64, SessionRepositoryError> {
        let result = sqlx::query(
            r#"
            DELETE FROM sessions
            WHERE expires_at < NOW()
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::test_support::{cleanup_test_user, setup_test_user};
    use chrono::{Duration, Utc};

    fn new_session(user_id: Uuid, raw_token: &str, ttl: Duration) -> CreateSession {
        CreateSession {
            user_id,
            token_hash: hash_token(raw_token),
            expires_at: Utc::now() + ttl,
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: Some("test-agent".to_string()),
        }
    }

    #[test]
    fn test_session_repository_error_display() {
        let err = SessionRepositoryError::from(sqlx::Error::PoolTimedOut);
        assert!(err.to_string().starts_with("Database error:"));
    }

    // ========================================================================
    // Integration Tests (require database)
    // ========================================================================

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_create_and_find_session() {
        let (pool, user_id) = setup_test_user().await;
        let repo = SessionRepository::new(pool.clone());

        let raw_token = format!("access_{}", Uuid::new_v4());
        let created = repo
            .create(&new_session(user_id, &raw_token, Duration::minutes(15)))
            .await
            .unwrap();

        assert!(created.is_active);
        assert_eq!(created.ip_address.as_deref(), Some("10.0.0.1"));

        let found = repo.find_by_token(&raw_token).await.unwrap().unwrap();
        assert_eq!(found.id, created.id);

        assert!(repo.find_by_token("nonexistent").await.unwrap().is_none());

        cleanup_test_user(&pool, user_id).await;
    }

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_revoke_session() {
        let (pool, user_id) = setup_test_user().await;
        let repo = SessionRepository::new(pool.clone());

        let raw_token = format!("access_{}", Uuid::new_v4());
        let session = repo
            .create(&new_session(user_id, &raw_token, Duration::minutes(15)))
            .await
            .unwrap();

        assert!(repo.revoke(session.id).await.unwrap());
        // Second revoke is a no-op
        assert!(!repo.revoke(session.id).await.unwrap());
        assert!(!repo.revoke_by_token(&raw_token).await.unwrap());

        let found = repo.find_by_token(&raw_token).await.unwrap().unwrap();
        assert!(!found.is_active);
        assert!(found.revoked_at.is_some());

        cleanup_test_user(&pool, user_id).await;
    }

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_cleanup_expired() {
        let (pool, user_id) = setup_test_user().await;
        let repo = SessionRepository::new(pool.clone());

        let expired = format!("expired_{}", Uuid::new_v4());
        let live = format!("live_{}", Uuid::new_v4());
        repo.create(&new_session(user_id, &expired, Duration::minutes(-1)))
            .await
            .unwrap();
        repo.create(&new_session(user_id, &live, Duration::minutes(15)))
            .await
            .unwrap();

        assert!(repo.cleanup_expired().await.unwrap() >= 1);
        assert!(repo.find_by_token(&expired).await.unwrap().is_none());
        assert!(repo.find_by_token(&live).await.unwrap().is_some());

        cleanup_test_user(&pool, user_id).await;
    }
}
