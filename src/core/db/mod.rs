//! Database module for Gatehouse
//!
//! This module provides database connectivity, models, and repositories
//! for persistent storage using PostgreSQL and SQLx, plus an in-memory
//! backend implementing the same store traits.

pub mod memory;
pub mod models;
pub mod pool;
pub mod repositories;

// Re-export commonly used items
pub use memory::MemoryStore;
pub use models::*;
pub use pool::{DbConfig, DbError, create_pool_with_migrations, health_check};
pub use repositories::{
    AuthStores, LoginAttemptRepository, LoginAttemptRepositoryError, LoginAttemptStore,
    RefreshTokenRepository, RefreshTokenRepositoryError, RefreshTokenStore, SessionRepository,
    SessionRepositoryError, SessionStore, UserRepository, UserRepositoryError, UserStore,
    hash_token,
};

// Re-export sqlx types that might be needed
pub use sqlx::PgPool;
