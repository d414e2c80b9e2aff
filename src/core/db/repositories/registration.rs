//! Registration repository for invitation claims
//!
//! Program registrations can be created for an email before the account
//! exists. On sign-up they are reassigned to the new user id.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::core::db::models::{Registration, normalize_identity};
use crate::core::db::store::{InvitationStore, StoreResult};

/// Registration repository for database operations
#[derive(Clone)]
pub struct RegistrationRepository {
    pool: PgPool,
}

impl RegistrationRepository {
    /// Create a new registration repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create an invitation addressed to an email
    pub async fn create(&self, registration: &Registration) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO registrations (id, program_id, email, user_id, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(registration.id)
        .bind(registration.program_id)
        .bind(&registration.email)
        .bind(registration.user_id)
        .bind(registration.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl InvitationStore for RegistrationRepository {
    async fn pending_for_email(&self, email: &str) -> StoreResult<Vec<Registration>> {
        let registrations = sqlx::query_as::<_, Registration>(
            r#"
            SELECT id, program_id, email, user_id, created_at
            FROM registrations
            WHERE lower(email) = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(normalize_identity(email))
        .fetch_all(&self.pool)
        .await?;

        Ok(registrations)
    }

    async fn claim(&self, registration_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE registrations
            SET user_id = $2, email = NULL
            WHERE id = $1 AND email IS NOT NULL
            "#,
        )
        .bind(registration_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::store::{CredentialStore, Precondition};
    use crate::core::db::models::{AuthProvider, RoleSet, User};
    use crate::core::db::repositories::UserRepository;
    use chrono::Utc;

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_claim_pending_registration() {
        let pool = create_test_pool().await;
        let users = UserRepository::new(pool.clone());
        let repo = RegistrationRepository::new(pool.clone());

        let unique = Uuid::new_v4().simple().to_string();
        let email = format!("invite_{}@example.com", &unique[..8]);
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            first_name: "Invited".to_string(),
            last_name: "Learner".to_string(),
            email: email.clone(),
            username: email.clone(),
            password_hash: "$2b$04$abcdefghijklmnopqrstuu".to_string(),
            password_salt: "00112233445566778899aabbccddeeff".to_string(),
            roles: RoleSet::learner(),
            provider: AuthProvider::Local,
            email_confirmed_at: None,
            confirmation_token_hash: Some("confirm".to_string()),
            confirmation_token_expires_at: Some(now),
            refresh_token_hash: None,
            refresh_token_expires_at: None,
            created_at: now,
            updated_at: now,
        };
        users.save(&user, Precondition::None).await.unwrap();

        let registration = Registration::invite(Uuid::new_v4(), &email);
        repo.create(&registration).await.unwrap();

        let pending = repo.pending_for_email(&email).await.unwrap();
        assert_eq!(pending.len(), 1);

        assert!(repo.claim(registration.id, user.id).await.unwrap());
        assert!(!repo.claim(registration.id, user.id).await.unwrap());
        assert!(repo.pending_for_email(&email).await.unwrap().is_empty());

        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user.id)
            .execute(&pool)
            .await
            .unwrap();
    }

    async fn create_test_pool() -> PgPool {
        use crate::core::db::pool::{DbConfig, create_pool_with_migrations};

        let config = DbConfig::from_env().expect("DATABASE_URL must be set for tests");
        create_pool_with_migrations(&config)
            .await
            .expect("Failed to create test pool")
    }
}
