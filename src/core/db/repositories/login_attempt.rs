//! Login attempt repository
//!
//! Append-only: rows are inserted and counted, never updated.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::core::db::models::{CreateLoginAttempt, LoginAttempt};

#[derive(Debug, thiserror::Error)]
pub enum LoginAttemptRepositoryError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

/// Typed storage for [`LoginAttempt`] audit records
#[async_trait]
pub trait LoginAttemptStore: Send + Sync {
    async fn create(
        &self,
        attempt: &CreateLoginAttempt,
    ) -> Result<LoginAttempt, LoginAttemptRepositoryError>;

    /// Failed attempts for `email` recorded at or after `since`
    async fn count_failures_since(
        &self,
        email: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, LoginAttemptRepositoryError>;
}

#[derive(Clone)]
pub struct LoginAttemptRepository {
    pool: PgPool,
}

impl LoginAttemptRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LoginAttemptStore for LoginAttemptRepository {
    async fn create(
        &self,
        attempt: &CreateLoginAttempt,
    ) -> Result<LoginAttempt, LoginAttemptRepositoryError> {
        let record = sqlx::query_as::<_, LoginAttempt>(
            r#"
            INSERT INTO login_attempts (email, ip_address, successful, fail_reason)
            VALUES ($1, $2, $3, $4)
            RETURNING id, email, ip_address, successful, fail_reason, created_at
            "#,
        )
        .bind(&attempt.email)
        .bind(&attempt.ip_address)
        .bind(attempt.successful)
        .bind(&attempt.fail_reason)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    async fn count_failures_since(
        &self,
        email: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, LoginAttemptRepositoryError> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM login_attempts
            WHERE email = $1 AND successful = FALSE AND created_at >= $2
            "#,
        )
        .bind(email)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.0)
    }
}
