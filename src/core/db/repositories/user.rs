//! User repository for database operations
//!
//! PostgreSQL implementation of [`CredentialStore`]. Uniqueness of email and
//! username comes from the `users_email_key` / `users_username_key` indexes,
//! so a concurrent duplicate sign-up surfaces as `DuplicateKey` instead of
//! racing a pre-check.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::core::db::models::{User, normalize_identity};
use crate::core::db::store::{
    CredentialStore, Precondition, Projection, StoreError, StoreResult, UserField,
};

const UNIQUE_VIOLATION: &str = "23505";
const CHECK_VIOLATION: &str = "23514";

/// Translate constraint violations into tagged store errors
fn map_write_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        let field = db_err.constraint().and_then(constraint_field);

        match (db_err.code().as_deref(), field) {
            (Some(UNIQUE_VIOLATION), Some(field)) => return StoreError::DuplicateKey { field },
            (Some(CHECK_VIOLATION), Some(field)) => return StoreError::FieldInvalid { field },
            _ => {}
        }
    }

    StoreError::from(err)
}

fn constraint_field(constraint: &str) -> Option<UserField> {
    match constraint {
        "users_email_key" | "users_email_format" => Some(UserField::Email),
        "users_username_key" | "users_username_format" => Some(UserField::Username),
        "users_first_name_check" => Some(UserField::FirstName),
        "users_last_name_check" => Some(UserField::LastName),
        _ => None,
    }
}

/// User repository for database operations
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    /// Create a new user repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn upsert(&self, user: &User) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (
                id, first_name, last_name, email, username, password_hash, password_salt,
                roles, provider, email_confirmed_at, confirmation_token_hash,
                confirmation_token_expires_at, refresh_token_hash, refresh_token_expires_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, NOW())
            ON CONFLICT (id) DO UPDATE SET
                first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                email = EXCLUDED.email,
                username = EXCLUDED.username,
                password_hash = EXCLUDED.password_hash,
                password_salt = EXCLUDED.password_salt,
                roles = EXCLUDED.roles,
                email_confirmed_at = EXCLUDED.email_confirmed_at,
                confirmation_token_hash = EXCLUDED.confirmation_token_hash,
                confirmation_token_expires_at = EXCLUDED.confirmation_token_expires_at,
                refresh_token_hash = EXCLUDED.refresh_token_hash,
                refresh_token_expires_at = EXCLUDED.refresh_token_expires_at,
                updated_at = NOW()
            "#,
        )
        .bind(user.id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(normalize_identity(&user.email))
        .bind(normalize_identity(&user.username))
        .bind(&user.password_hash)
        .bind(&user.password_salt)
        .bind(user.roles.to_tags())
        .bind(user.provider)
        .bind(user.email_confirmed_at)
        .bind(&user.confirmation_token_hash)
        .bind(user.confirmation_token_expires_at)
        .bind(&user.refresh_token_hash)
        .bind(user.refresh_token_expires_at)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        Ok(())
    }

    /// Rewrite session and confirmation state only if the guarded column is unchanged
    async fn update_guarded(&self, user: &User, precondition: &Precondition) -> StoreResult<()> {
        let (guard_sql, guard_value) = match precondition {
            Precondition::RefreshToken(expected) => (
                "refresh_token_hash IS NOT DISTINCT FROM $9",
                expected.clone(),
            ),
            Precondition::ConfirmationToken(expected) => {
                ("confirmation_token_hash = $9", Some(expected.clone()))
            }
            Precondition::None => return self.upsert(user).await,
        };

        let sql = format!(
            r#"
            UPDATE users
            SET
                roles = $2,
                email_confirmed_at = $3,
                confirmation_token_hash = $4,
                confirmation_token_expires_at = $5,
                refresh_token_hash = $6,
                refresh_token_expires_at = $7,
                password_hash = $8,
                updated_at = NOW()
            WHERE id = $1 AND {guard_sql}
            "#
        );

        let result = sqlx::query(&sql)
            .bind(user.id)
            .bind(user.roles.to_tags())
            .bind(user.email_confirmed_at)
            .bind(&user.confirmation_token_hash)
            .bind(user.confirmation_token_expires_at)
            .bind(&user.refresh_token_hash)
            .bind(user.refresh_token_expires_at)
            .bind(&user.password_hash)
            .bind(guard_value)
            .execute(&self.pool)
            .await
            .map_err(map_write_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::PreconditionFailed);
        }

        Ok(())
    }

    /// Count total users
    pub async fn count(&self) -> StoreResult<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0)
    }
}

#[async_trait]
impl CredentialStore for UserRepository {
    async fn find_by_identity(&self, email_or_username: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, first_name, last_name, email, username, password_hash, password_salt,
                   roles, provider, email_confirmed_at, confirmation_token_hash,
                   confirmation_token_expires_at, refresh_token_hash, refresh_token_expires_at,
                   created_at, updated_at
            FROM users
            WHERE lower(email) = $1 OR lower(username) = $1
            ORDER BY lower(email) = $1 DESC
            LIMIT 1
            "#,
        )
        .bind(normalize_identity(email_or_username))
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid, projection: Projection) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, first_name, last_name, email, username, password_hash, password_salt,
                   roles, provider, email_confirmed_at, confirmation_token_hash,
                   confirmation_token_expires_at, refresh_token_hash, refresh_token_expires_at,
                   created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user.map(|u| projection.apply(u)))
    }

    async fn save(&self, user: &User, precondition: Precondition) -> StoreResult<()> {
        self.update_guarded(user, &precondition).await
    }
}
