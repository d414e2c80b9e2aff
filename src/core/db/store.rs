//! Storage contracts used by the session manager
//!
//! The credential store owns atomic uniqueness of email/username and the
//! conditional writes that make token rotation and confirmation single-use.

use async_trait::async_trait;
use uuid::Uuid;

use crate::core::db::models::{Registration, User};

/// Account field named by a storage failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserField {
    Email,
    Username,
    Password,
    FirstName,
    LastName,
}

impl std::fmt::Display for UserField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UserField::Email => "email",
            UserField::Username => "username",
            UserField::Password => "password",
            UserField::FirstName => "first_name",
            UserField::LastName => "last_name",
        };
        f.write_str(name)
    }
}

/// Storage error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Duplicate value for {field}")]
    DuplicateKey { field: UserField },

    #[error("Invalid value for {field}")]
    FieldInvalid { field: UserField },

    #[error("Stored record changed since it was read")]
    PreconditionFailed,

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Condition the stored record must satisfy for a save to apply
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Precondition {
    /// Unconditional insert-or-replace
    #[default]
    None,
    /// Stored refresh token digest must still equal this value
    RefreshToken(Option<String>),
    /// Stored confirmation token digest must still equal this value
    ConfirmationToken(String),
}

impl Precondition {
    /// Check the condition against the currently stored record
    pub fn holds_for(&self, stored: &User) -> bool {
        match self {
            Precondition::None => true,
            Precondition::RefreshToken(expected) => stored.refresh_token_hash == *expected,
            Precondition::ConfirmationToken(expected) => {
                stored.confirmation_token_hash.as_deref() == Some(expected.as_str())
            }
        }
    }
}

/// Which parts of the record a lookup returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Projection {
    /// Full record including password material and token digests
    #[default]
    Credentials,
    /// Identity and state only, secrets redacted
    Profile,
}

impl Projection {
    pub fn apply(self, user: User) -> User {
        match self {
            Projection::Credentials => user,
            Projection::Profile => user.redacted(),
        }
    }
}

/// Repository of account records
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Find a user whose email or username matches, case-insensitively
    async fn find_by_identity(&self, email_or_username: &str) -> StoreResult<Option<User>>;

    /// Find a user by id
    async fn find_by_id(&self, id: Uuid, projection: Projection) -> StoreResult<Option<User>>;

    /// Insert or update a user.
    ///
    /// Fails with `DuplicateKey` on an email/username collision with another
    /// record and with `PreconditionFailed` when `precondition` does not hold
    /// for the stored version.
    async fn save(&self, user: &User, precondition: Precondition) -> StoreResult<()>;
}

/// Repository of pending program registrations
#[async_trait]
pub trait InvitationStore: Send + Sync {
    /// Registrations still addressed to this email
    async fn pending_for_email(&self, email: &str) -> StoreResult<Vec<Registration>>;

    /// Reassign a registration to a user and detach its email.
    ///
    /// Returns `false` when it was already claimed.
    async fn claim(&self, registration_id: Uuid, user_id: Uuid) -> StoreResult<bool>;
}
