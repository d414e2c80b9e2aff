//! In-memory store implementations
//!
//! Used for local development and tests. The credential store keeps every
//! record behind a single lock so uniqueness checks and conditional writes are
//! atomic, the same guarantees the PostgreSQL repositories get from unique
//! indexes and `UPDATE ... WHERE`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::core::db::models::{Registration, User, normalize_identity};
use crate::core::db::store::{
    CredentialStore, InvitationStore, Precondition, Projection, StoreError, StoreResult,
    UserField,
};

/// Credential store backed by a locked hash map
#[derive(Default)]
pub struct InMemoryCredentialStore {
    users: RwLock<HashMap<Uuid, User>>,
    unavailable: AtomicBool,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a database error
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Apply a raw mutation to a stored record, bypassing all checks
    pub async fn update_raw<F>(&self, id: Uuid, mutate: F) -> bool
    where
        F: FnOnce(&mut User),
    {
        let mut users = self.users.write().await;
        match users.get_mut(&id) {
            Some(user) => {
                mutate(user);
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }

    fn check_fields(user: &User) -> StoreResult<()> {
        if user.first_name.trim().is_empty() {
            return Err(StoreError::FieldInvalid {
                field: UserField::FirstName,
            });
        }
        if user.last_name.trim().is_empty() {
            return Err(StoreError::FieldInvalid {
                field: UserField::LastName,
            });
        }
        if !looks_like_email(&user.email) {
            return Err(StoreError::FieldInvalid {
                field: UserField::Email,
            });
        }
        // An address-shaped username must be the record's own email, so no
        // identity can match two records
        if user.username.contains('@') && user.username != user.email {
            return Err(StoreError::FieldInvalid {
                field: UserField::Username,
            });
        }
        if user.password_hash.is_empty() || user.password_salt.is_empty() {
            return Err(StoreError::FieldInvalid {
                field: UserField::Password,
            });
        }
        Ok(())
    }
}

/// Same shape the `users_email_format` check constraint enforces
fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain
                    .split_once('.')
                    .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
        }
        None => false,
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_by_identity(&self, email_or_username: &str) -> StoreResult<Option<User>> {
        let identity = normalize_identity(email_or_username);
        let users = self.users.read().await;

        Ok(users
            .values()
            .find(|u| u.email == identity)
            .or_else(|| users.values().find(|u| u.username == identity))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid, projection: Projection) -> StoreResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users.get(&id).cloned().map(|u| projection.apply(u)))
    }

    async fn save(&self, user: &User, precondition: Precondition) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Database("store unavailable".to_string()));
        }

        let mut record = user.clone();
        record.email = normalize_identity(&record.email);
        record.username = normalize_identity(&record.username);

        Self::check_fields(&record)?;

        let mut users = self.users.write().await;

        for other in users.values().filter(|u| u.id != record.id) {
            if other.email == record.email {
                return Err(StoreError::DuplicateKey {
                    field: UserField::Email,
                });
            }
            if other.username == record.username {
                return Err(StoreError::DuplicateKey {
                    field: UserField::Username,
                });
            }
        }

        match users.get(&record.id) {
            Some(stored) if !precondition.holds_for(stored) => {
                return Err(StoreError::PreconditionFailed);
            }
            None if precondition != Precondition::None => {
                return Err(StoreError::PreconditionFailed);
            }
            _ => {}
        }

        record.updated_at = Utc::now();
        users.insert(record.id, record);
        Ok(())
    }
}

/// Invitation store backed by a concurrent map
#[derive(Default)]
pub struct InMemoryInvitationStore {
    registrations: DashMap<Uuid, Registration>,
}

impl InMemoryInvitationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, registration: Registration) {
        self.registrations.insert(registration.id, registration);
    }

    pub fn get(&self, id: Uuid) -> Option<Registration> {
        self.registrations.get(&id).map(|r| r.clone())
    }

    /// Registrations owned by a user
    pub fn for_user(&self, user_id: Uuid) -> Vec<Registration> {
        self.registrations
            .iter()
            .filter(|r| r.user_id == Some(user_id))
            .map(|r| r.clone())
            .collect()
    }
}

#[async_trait]
impl InvitationStore for InMemoryInvitationStore {
    async fn pending_for_email(&self, email: &str) -> StoreResult<Vec<Registration>> {
        let email = normalize_identity(email);
        Ok(self
            .registrations
            .iter()
            .filter(|r| r.email.as_deref() == Some(email.as_str()))
            .map(|r| r.clone())
            .collect())
    }

    async fn claim(&self, registration_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        let Some(mut registration) = self.registrations.get_mut(&registration_id) else {
            return Ok(false);
        };

        if !registration.is_pending() {
            return Ok(false);
        }

        registration.user_id = Some(user_id);
        registration.email = None;
        Ok(true)
    }
}
