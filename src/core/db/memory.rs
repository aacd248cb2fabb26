//! In-memory implementations of the store traits
//!
//! Backs the service when no `DATABASE_URL` is configured and drives the test
//! suites. Uniqueness of emails and token hashes is enforced through index maps;
//! single-use consumption relies on the shard write lock held by `get_mut`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use super::models::{
    CreateLoginAttempt, CreateRefreshToken, CreateSession, CreateUser, LoginAttempt,
    RefreshToken, Session, User,
};
use super::repositories::{
    LoginAttemptRepositoryError, LoginAttemptStore, RefreshTokenRepositoryError,
    RefreshTokenStore, SessionRepositoryError, SessionStore, UserRepositoryError, UserStore,
    hash_token,
};

fn duplicate_key(what: &str) -> sqlx::Error {
    sqlx::Error::Protocol(format!("duplicate key value violates unique constraint on {what}"))
}

#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<Uuid, User>,
    users_by_email: DashMap<String, Uuid>,
    sessions: DashMap<Uuid, Session>,
    sessions_by_hash: DashMap<String, Uuid>,
    refresh_tokens: DashMap<Uuid, RefreshToken>,
    refresh_tokens_by_hash: DashMap<String, Uuid>,
    login_attempts: DashMap<Uuid, LoginAttempt>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded login attempts, oldest first
    pub fn login_attempts(&self) -> Vec<LoginAttempt> {
        let mut attempts: Vec<LoginAttempt> =
            self.login_attempts.iter().map(|e| e.value().clone()).collect();
        attempts.sort_by_key(|a| a.created_at);
        attempts
    }

    /// All sessions belonging to a user
    pub fn sessions_for_user(&self, user_id: Uuid) -> Vec<Session> {
        self.sessions
            .iter()
            .filter(|e| e.user_id == user_id)
            .map(|e| e.value().clone())
            .collect()
    }

    /// Flip a user's active flag (account administration is out of band)
    pub fn set_user_active(&self, id: Uuid, is_active: bool) -> bool {
        match self.users.get_mut(&id) {
            Some(mut user) => {
                user.is_active = is_active;
                user.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create(&self, user: &CreateUser) -> Result<User, UserRepositoryError> {
        let now = Utc::now();
        let record = User {
            id: Uuid::new_v4(),
            username: user.username.clone(),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            email_verified: false,
            is_active: true,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        };

        match self.users_by_email.entry(user.email.clone()) {
            Entry::Occupied(_) => return Err(UserRepositoryError::EmailAlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(record.id);
            }
        }
        self.users.insert(record.id, record.clone());

        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, UserRepositoryError> {
        Ok(self.users.get(&id).map(|u| u.value().clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, UserRepositoryError> {
        let Some(id) = self.users_by_email.get(email).map(|id| *id) else {
            return Ok(None);
        };
        self.find_by_id(id).await
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), UserRepositoryError> {
        let mut user = self.users.get_mut(&id).ok_or(UserRepositoryError::NotFound)?;
        user.last_login_at = Some(at);
        user.updated_at = at;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create(&self, session: &CreateSession) -> Result<Session, SessionRepositoryError> {
        let record = Session {
            id: Uuid::new_v4(),
            user_id: session.user_id,
            token_hash: session.token_hash.clone(),
            expires_at: session.expires_at,
            issued_at: Utc::now(),
            ip_address: session.ip_address.clone(),
            user_agent: session.user_agent.clone(),
            is_active: true,
            revoked_at: None,
        };

        match self.sessions_by_hash.entry(session.token_hash.clone()) {
            Entry::Occupied(_) => return Err(duplicate_key("sessions.token_hash").into()),
            Entry::Vacant(slot) => {
                slot.insert(record.id);
            }
        }
        self.sessions.insert(record.id, record.clone());

        Ok(record)
    }

    async fn find_by_token(
        &self,
        raw_token: &str,
    ) -> Result<Option<Session>, SessionRepositoryError> {
        let Some(id) = self.sessions_by_hash.get(&hash_token(raw_token)).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.sessions.get(&id).map(|s| s.value().clone()))
    }

    async fn revoke(&self, id: Uuid) -> Result<bool, SessionRepositoryError> {
        match self.sessions.get_mut(&id) {
            Some(mut session) if session.is_active => {
                session.is_active = false;
                session.revoked_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_by_token(&self, raw_token: &str) -> Result<bool, SessionRepositoryError> {
        let Some(id) = self.sessions_by_hash.get(&hash_token(raw_token)).map(|id| *id) else {
            return Ok(false);
        };
        SessionStore::revoke(self, id).await
    }

    async fn cleanup_expired(&self) -> Result<u64, SessionRepositoryError> {
        let now = Utc::now();
        let expired: Vec<(Uuid, String)> = self
            .sessions
            .iter()
            .filter(|e| e.expires_at < now)
            .map(|e| (e.id, e.token_hash.clone()))
            .collect();

        for (id, hash) in &expired {
            self.sessions.remove(id);
            self.sessions_by_hash.remove(hash);
        }

        Ok(expired.len() as u64)
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStore {
    async fn create(
        &self,
        token: &CreateRefreshToken,
    ) -> Result<RefreshToken, RefreshTokenRepositoryError> {
        let record = RefreshToken {
            id: Uuid::new_v4(),
            user_id: token.user_id,
            session_id: token.session_id,
            token_hash: token.token_hash.clone(),
            expires_at: token.expires_at,
            is_used: false,
            revoked_at: None,
            created_at: Utc::now(),
        };

        match self.refresh_tokens_by_hash.entry(token.token_hash.clone()) {
            Entry::Occupied(_) => return Err(duplicate_key("refresh_tokens.token_hash").into()),
            Entry::Vacant(slot) => {
                slot.insert(record.id);
            }
        }
        self.refresh_tokens.insert(record.id, record.clone());

        Ok(record)
    }

    async fn find_by_token(
        &self,
        raw_token: &str,
    ) -> Result<Option<RefreshToken>, RefreshTokenRepositoryError> {
        let Some(id) = self
            .refresh_tokens_by_hash
            .get(&hash_token(raw_token))
            .map(|id| *id)
        else {
            return Ok(None);
        };
        Ok(self.refresh_tokens.get(&id).map(|t| t.value().clone()))
    }

    async fn consume(&self, id: Uuid) -> Result<bool, RefreshTokenRepositoryError> {
        match self.refresh_tokens.get_mut(&id) {
            Some(mut token) if !token.is_spent() => {
                token.is_used = true;
                token.revoked_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_by_token(&self, raw_token: &str) -> Result<bool, RefreshTokenRepositoryError> {
        let Some(id) = self
            .refresh_tokens_by_hash
            .get(&hash_token(raw_token))
            .map(|id| *id)
        else {
            return Ok(false);
        };

        match self.refresh_tokens.get_mut(&id) {
            Some(mut token) if !token.is_spent() => {
                token.revoked_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cleanup_expired(&self) -> Result<u64, RefreshTokenRepositoryError> {
        let now = Utc::now();
        let expired: Vec<(Uuid, String)> = self
            .refresh_tokens
            .iter()
            .filter(|e| e.expires_at < now)
            .map(|e| (e.id, e.token_hash.clone()))
            .collect();

        for (id, hash) in &expired {
            self.refresh_tokens.remove(id);
            self.refresh_tokens_by_hash.remove(hash);
        }

        Ok(expired.len() as u64)
    }
}

#[async_trait]
impl LoginAttemptStore for MemoryStore {
    async fn create(
        &self,
        attempt: &CreateLoginAttempt,
    ) -> Result<LoginAttempt, LoginAttemptRepositoryError> {
        let record = LoginAttempt {
            id: Uuid::new_v4(),
            email: attempt.email.clone(),
            ip_address: attempt.ip_address.clone(),
            successful: attempt.successful,
            fail_reason: attempt.fail_reason.clone(),
            created_at: Utc::now(),
        };
        self.login_attempts.insert(record.id, record.clone());
        Ok(record)
    }

    async fn count_failures_since(
        &self,
        email: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, LoginAttemptRepositoryError> {
        let count = self
            .login_attempts
            .iter()
            .filter(|a| a.email == email && !a.successful && a.created_at >= since)
            .count();
        Ok(count as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    fn new_user(email: &str) -> CreateUser {
        CreateUser {
            username: "alice".to_string(),
            email: email.to_string(),
            password_hash: "hash".to_string(),
        }
    }

    fn new_refresh(user_id: Uuid, raw: &str, ttl: Duration) -> CreateRefreshToken {
        CreateRefreshToken {
            user_id,
            session_id: None,
            token_hash: hash_token(raw),
            expires_at: Utc::now() + ttl,
        }
    }

    fn new_session(user_id: Uuid, raw: &str, ttl: Duration) -> CreateSession {
        CreateSession {
            user_id,
            token_hash: hash_token(raw),
            expires_at: Utc::now() + ttl,
            ip_address: None,
            user_agent: None,
        }
    }

    // ========================================================================
    // User Store Tests
    // ========================================================================

    #[tokio::test]
    async fn test_user_email_is_unique() {
        let store = MemoryStore::new();

        let user = UserStore::create(&store, &new_user("alice@x.com"))
            .await
            .unwrap();
        assert!(user.is_active);

        let result = UserStore::create(&store, &new_user("alice@x.com")).await;
        assert!(matches!(
            result,
            Err(UserRepositoryError::EmailAlreadyExists)
        ));

        let found = store.find_by_email("alice@x.com").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert!(store.find_by_email("bob@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_login() {
        let store = MemoryStore::new();
        let user = UserStore::create(&store, &new_user("alice@x.com"))
            .await
            .unwrap();

        store.record_login(user.id, Utc::now()).await.unwrap();
        let found = store.find_by_id(user.id).await.unwrap().unwrap();
        assert!(found.last_login_at.is_some());

        let missing = store.record_login(Uuid::new_v4(), Utc::now()).await;
        assert!(matches!(missing, Err(UserRepositoryError::NotFound)));
    }

    // ========================================================================
    // Session Store Tests
    // ========================================================================

    #[tokio::test]
    async fn test_session_revoke_by_token() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();

        SessionStore::create(&store, &new_session(user_id, "access", Duration::minutes(15)))
            .await
            .unwrap();

        assert!(SessionStore::revoke_by_token(&store, "access").await.unwrap());
        assert!(!SessionStore::revoke_by_token(&store, "access").await.unwrap());
        assert!(!SessionStore::revoke_by_token(&store, "unknown").await.unwrap());

        let session = SessionStore::find_by_token(&store, "access")
            .await
            .unwrap()
            .unwrap();
        assert!(!session.is_active);
        assert!(session.revoked_at.is_some());
    }

    #[tokio::test]
    async fn test_session_duplicate_token_rejected() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let dto = new_session(user_id, "same", Duration::minutes(15));

        SessionStore::create(&store, &dto).await.unwrap();
        let result = SessionStore::create(&store, &dto).await;

        assert!(matches!(
            result,
            Err(SessionRepositoryError::DatabaseError(_))
        ));
    }

    #[tokio::test]
    async fn test_cleanup_expired_sessions_and_tokens() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();

        SessionStore::create(&store, &new_session(user_id, "old", Duration::minutes(-5)))
            .await
            .unwrap();
        SessionStore::create(&store, &new_session(user_id, "new", Duration::minutes(5)))
            .await
            .unwrap();
        RefreshTokenStore::create(&store, &new_refresh(user_id, "old", Duration::days(-1)))
            .await
            .unwrap();

        assert_eq!(SessionStore::cleanup_expired(&store).await.unwrap(), 1);
        assert_eq!(RefreshTokenStore::cleanup_expired(&store).await.unwrap(), 1);

        assert!(SessionStore::find_by_token(&store, "old").await.unwrap().is_none());
        assert!(SessionStore::find_by_token(&store, "new").await.unwrap().is_some());
        assert!(
            RefreshTokenStore::find_by_token(&store, "old")
                .await
                .unwrap()
                .is_none()
        );
    }

    // ========================================================================
    // Refresh Token Store Tests
    // ========================================================================

    #[tokio::test]
    async fn test_consume_is_single_use() {
        let store = MemoryStore::new();
        let record = RefreshTokenStore::create(
            &store,
            &new_refresh(Uuid::new_v4(), "refresh", Duration::days(7)),
        )
        .await
        .unwrap();

        assert!(store.consume(record.id).await.unwrap());
        assert!(!store.consume(record.id).await.unwrap());
        assert!(!store.consume(Uuid::new_v4()).await.unwrap());

        let found = RefreshTokenStore::find_by_token(&store, "refresh")
            .await
            .unwrap()
            .unwrap();
        assert!(found.is_used);
        assert!(found.is_spent());
    }

    #[tokio::test]
    async fn test_revoked_refresh_token_cannot_be_consumed() {
        let store = MemoryStore::new();
        let record = RefreshTokenStore::create(
            &store,
            &new_refresh(Uuid::new_v4(), "refresh", Duration::days(7)),
        )
        .await
        .unwrap();

        assert!(RefreshTokenStore::revoke_by_token(&store, "refresh").await.unwrap());
        assert!(!store.consume(record.id).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consume_has_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let record = RefreshTokenStore::create(
            store.as_ref(),
            &new_refresh(Uuid::new_v4(), "contended", Duration::days(7)),
        )
        .await
        .unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.consume(record.id).await.unwrap() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    // ========================================================================
    // Login Attempt Store Tests
    // ========================================================================

    #[tokio::test]
    async fn test_count_failures_since() {
        let store = MemoryStore::new();
        let since = Utc::now() - Duration::minutes(1);

        for (email, successful) in [
            ("alice@x.com", false),
            ("alice@x.com", false),
            ("alice@x.com", true),
            ("bob@x.com", false),
        ] {
            LoginAttemptStore::create(
                &store,
                &CreateLoginAttempt {
                    email: email.to_string(),
                    ip_address: None,
                    successful,
                    fail_reason: None,
                },
            )
            .await
            .unwrap();
        }

        assert_eq!(
            store.count_failures_since("alice@x.com", since).await.unwrap(),
            2
        );
        assert_eq!(store.login_attempts().len(), 4);
    }
}
