//! Database repositories for Gatehouse
//!
//! One store trait per entity, each with a PostgreSQL implementation here and
//! an in-memory one in [`crate::core::db::memory`]. Services only ever see the
//! traits, bundled together in [`AuthStores`].

pub mod login_attempt;
pub mod refresh_token;
pub mod session;
pub mod user;

use std::sync::Arc;

use sha2::{Digest, Sha256};
use sqlx::PgPool;

pub use login_attempt::{LoginAttemptRepository, LoginAttemptRepositoryError, LoginAttemptStore};
pub use refresh_token::{RefreshTokenRepository, RefreshTokenRepositoryError, RefreshTokenStore};
pub use session::{SessionRepository, SessionRepositoryError, SessionStore};
pub use user::{UserRepository, UserRepositoryError, UserStore};

use crate::core::db::memory::MemoryStore;

/// Hash a token using SHA-256 (hex encoded)
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// The full set of stores the auth core depends on
#[derive(Clone)]
pub struct AuthStores {
    pub users: Arc<dyn UserStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub refresh_tokens: Arc<dyn RefreshTokenStore>,
    pub login_attempts: Arc<dyn LoginAttemptStore>,
}

impl AuthStores {
    /// Stores backed by a PostgreSQL pool
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            users: Arc::new(UserRepository::new(pool.clone())),
            sessions: Arc::new(SessionRepository::new(pool.clone())),
            refresh_tokens: Arc::new(RefreshTokenRepository::new(pool.clone())),
            login_attempts: Arc::new(LoginAttemptRepository::new(pool)),
        }
    }

    /// Stores sharing one in-memory backend
    pub fn from_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            users: store.clone(),
            sessions: store.clone(),
            refresh_tokens: store.clone(),
            login_attempts: store,
        }
    }

    /// Fresh, empty in-memory stores
    pub fn memory() -> Self {
        Self::from_memory(Arc::new(MemoryStore::new()))
    }
}
