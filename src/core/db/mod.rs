//! Database module for LearnHub authentication
//!
//! This module provides the account models, the store contracts the session
//! manager depends on, and their in-memory and PostgreSQL implementations.

pub mod memory;
pub mod models;
pub mod pool;
pub mod repositories;
pub mod store;

// Re-export commonly used items
pub use memory::{InMemoryCredentialStore, InMemoryInvitationStore};
pub use models::*;
pub use pool::{DbConfig, DbError, create_pool, create_pool_with_migrations};
pub use repositories::{RegistrationRepository, UserRepository};
pub use store::{
    CredentialStore, InvitationStore, Precondition, Projection, StoreError, StoreResult,
    UserField,
};

// Re-export sqlx types that might be needed
pub use sqlx::PgPool;
