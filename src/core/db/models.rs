//! Database models for the authentication core
//!
//! This module defines the account record, its role set and the pending
//! program registrations that get claimed on sign-up.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ============================================================================
// Roles
// ============================================================================

/// Role tag attached to an account and carried in token claims
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Learner,
    Teacher,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Learner => "learner",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a stored role tag is not recognised
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown role tag: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "learner" => Ok(Role::Learner),
            "teacher" => Ok(Role::Teacher),
            "admin" => Ok(Role::Admin),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// Set of roles held by a user, stored as `TEXT[]`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleSet(BTreeSet<Role>);

impl RoleSet {
    pub fn new(roles: impl IntoIterator<Item = Role>) -> Self {
        Self(roles.into_iter().collect())
    }

    /// Default role set for a self-registered account
    pub fn learner() -> Self {
        Self::new([Role::Learner])
    }

    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    pub fn insert(&mut self, role: Role) -> bool {
        self.0.insert(role)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        self.0.iter().copied()
    }

    /// Role tags in stable order, as stored and as carried in claims
    pub fn to_tags(&self) -> Vec<String> {
        self.0.iter().map(|r| r.as_str().to_string()).collect()
    }
}

impl TryFrom<Vec<String>> for RoleSet {
    type Error = UnknownRole;

    fn try_from(tags: Vec<String>) -> Result<Self, Self::Error> {
        tags.iter()
            .map(|t| t.parse::<Role>())
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Self)
    }
}

// ============================================================================
// User Model
// ============================================================================

/// Identity provider that created the account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    #[default]
    Local,
}

/// Account record holding identity, credentials and session state.
///
/// `confirmation_token_hash` is present exactly while `email_confirmed_at` is
/// absent. Both token fields hold SHA-256 digests, never the raw tokens.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(skip_serializing)]
    pub password_salt: String,
    #[sqlx(try_from = "Vec<String>")]
    pub roles: RoleSet,
    pub provider: AuthProvider,
    pub email_confirmed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub confirmation_token_hash: Option<String>,
    pub confirmation_token_expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub refresh_token_hash: Option<String>,
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_confirmed(&self) -> bool {
        self.email_confirmed_at.is_some()
    }

    pub fn has_active_session(&self) -> bool {
        self.refresh_token_hash.is_some()
    }

    /// Drop the refresh token digest and expiry (Active -> NoSession)
    pub fn clear_session(&mut self) {
        self.refresh_token_hash = None;
        self.refresh_token_expires_at = None;
    }

    /// Copy with password material and token digests removed
    pub fn redacted(&self) -> Self {
        Self {
            password_hash: String::new(),
            password_salt: String::new(),
            confirmation_token_hash: None,
            refresh_token_hash: None,
            ..self.clone()
        }
    }
}

/// User without sensitive data (for API responses)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub username: String,
    pub roles: RoleSet,
    pub email_confirmed: bool,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            email_confirmed: user.is_confirmed(),
            id: user.id,
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
            username: user.username,
            roles: user.roles,
            created_at: user.created_at,
        }
    }
}

// ============================================================================
// Registration Model
// ============================================================================

/// Program registration that may still be addressed to an email only.
///
/// Claiming reassigns it to a user id and detaches the email.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Registration {
    pub id: Uuid,
    pub program_id: Uuid,
    pub email: Option<String>,
    pub user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Registration {
    /// New invitation addressed to an email
    pub fn invite(program_id: Uuid, email: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            program_id,
            email: Some(normalize_identity(email)),
            user_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.email.is_some()
    }
}

/// Trim and lower-case an email or username for storage and lookup
pub fn normalize_identity(value: &str) -> String {
    value.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            username: "ada@example.com".to_string(),
            password_hash: "$2b$04$hash".to_string(),
            password_salt: "00ff".to_string(),
            roles: RoleSet::learner(),
            provider: AuthProvider::Local,
            email_confirmed_at: None,
            confirmation_token_hash: Some("digest".to_string()),
            confirmation_token_expires_at: Some(now),
            refresh_token_hash: Some("refresh".to_string()),
            refresh_token_expires_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_role_round_trip_through_tags() {
        let roles = RoleSet::new([Role::Teacher, Role::Learner]);
        let tags = roles.to_tags();
        assert_eq!(tags, vec!["learner".to_string(), "teacher".to_string()]);

        let parsed = RoleSet::try_from(tags).unwrap();
        assert_eq!(parsed, roles);
    }

    #[test]
    fn test_role_set_rejects_unknown_tag() {
        let result = RoleSet::try_from(vec!["learner".to_string(), "janitor".to_string()]);
        assert_eq!(result, Err(UnknownRole("janitor".to_string())));
    }

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&RoleSet::new([Role::Teacher])).unwrap();
        assert_eq!(json, r#"["teacher"]"#);
    }

    #[test]
    fn test_user_serialization_hides_secrets() {
        let json = serde_json::to_string(&sample_user()).unwrap();
        assert!(!json.contains("$2b$04$hash"));
        assert!(!json.contains("digest"));
        assert!(!json.contains("password_salt"));
        assert!(json.contains("ada@example.com"));
    }

    #[test]
    fn test_clear_session() {
        let mut user = sample_user();
        assert!(user.has_active_session());

        user.clear_session();
        assert!(!user.has_active_session());
        assert!(user.refresh_token_expires_at.is_none());
    }

    #[test]
    fn test_redacted_keeps_identity() {
        let user = sample_user();
        let redacted = user.redacted();

        assert_eq!(redacted.id, user.id);
        assert_eq!(redacted.email, user.email);
        assert!(redacted.password_hash.is_empty());
        assert!(redacted.confirmation_token_hash.is_none());
        assert!(redacted.refresh_token_hash.is_none());
    }

    #[test]
    fn test_user_response_from_user() {
        let response = UserResponse::from(sample_user());
        assert!(!response.email_confirmed);
        assert!(response.roles.contains(Role::Learner));
    }

    #[test]
    fn test_registration_invite_normalizes_email() {
        let reg = Registration::invite(Uuid::new_v4(), "  Someone@Example.COM ");
        assert_eq!(reg.email.as_deref(), Some("someone@example.com"));
        assert!(reg.is_pending());
        assert!(reg.user_id.is_none());
    }
}
