//! Session manager
//!
//! Orchestrates sign-up, email confirmation, sign-in, token refresh and
//! sign-out. Every state transition is committed by a single `save` on the
//! credential store; token rotation and confirmation use conditional saves so
//! a token can only ever be consumed once.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::auth::jwt::{TokenError, TokenIssuer, TokenPair};
use crate::core::auth::notifier::Notifier;
use crate::core::auth::password::{
    self, FieldRejection, PasswordHasher, constant_time_eq, generate_confirmation_token,
    hash_token, validate_email, validate_password, validate_username,
};
use crate::core::auth::report::{ErrorReporter, TracingReporter};
use crate::core::auth::tasks::{PostCommitTasks, SignUpEffects};
use crate::core::config::AuthConfig;
use crate::core::db::models::{
    AuthProvider, Role, RoleSet, User, UserResponse, normalize_identity,
};
use crate::core::db::store::{
    CredentialStore, InvitationStore, Precondition, Projection, StoreError, UserField,
};

/// Attempts at clearing a session that keeps being rotated underneath sign-out
const SIGN_OUT_ATTEMPTS: usize = 3;

/// Session manager error types.
///
/// Every variant except `Unavailable` is a user-input error and is surfaced
/// as-is. `Unavailable` stands for any system failure; the detail goes to the
/// [`ErrorReporter`] and never to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Missing required fields")]
    MissingFields,

    #[error("Email address already registered")]
    ExistingEmailAddress,

    #[error("Invalid email address")]
    InvalidEmailAddress,

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Email address not confirmed")]
    UnconfirmedEmailAddress,

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("User not found")]
    UserNotFound,

    #[error("Service unavailable")]
    Unavailable,
}

impl AuthError {
    /// Stable error code returned to callers
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingFields => "MissingFields",
            AuthError::ExistingEmailAddress => "ExistingEmailAddress",
            AuthError::InvalidEmailAddress => "InvalidEmailAddress",
            AuthError::InvalidPassword => "InvalidPassword",
            AuthError::InvalidCredentials => "InvalidCredentials",
            AuthError::UnconfirmedEmailAddress => "UnconfirmedEmailAddress",
            AuthError::InvalidRefreshToken => "InvalidRefreshToken",
            AuthError::UserNotFound => "UserNotFound",
            AuthError::Unavailable => "Unavailable",
        }
    }

    pub fn is_user_error(&self) -> bool {
        !matches!(self, AuthError::Unavailable)
    }
}

impl From<FieldRejection> for AuthError {
    fn from(rejection: FieldRejection) -> Self {
        match rejection {
            FieldRejection::InvalidEmail | FieldRejection::InvalidUsername => {
                AuthError::InvalidEmailAddress
            }
            FieldRejection::PasswordTooShort | FieldRejection::PasswordTooWeak => {
                AuthError::InvalidPassword
            }
        }
    }
}

/// Sign-up request data
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignUpRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    /// Defaults to the email address
    #[serde(default)]
    pub username: Option<String>,
}

impl SignUpRequest {
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: email.into(),
            password: password.into(),
            username: None,
        }
    }

    /// Set an explicit username
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    fn has_missing_fields(&self) -> bool {
        self.first_name.trim().is_empty()
            || self.last_name.trim().is_empty()
            || self.email.trim().is_empty()
            || self.password.is_empty()
            || self.username.as_deref().is_some_and(|u| u.trim().is_empty())
    }
}

/// Result of a committed sign-up
#[derive(Debug)]
pub struct SignUpReceipt {
    pub user_id: Uuid,
    /// Detached notification and invitation work; awaiting it is optional
    pub follow_up: PostCommitTasks,
}

/// Identity established from a valid access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub roles: RoleSet,
}

impl AuthContext {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(role)
    }
}

/// Session manager
#[derive(Clone)]
pub struct SessionManager {
    users: Arc<dyn CredentialStore>,
    invitations: Arc<dyn InvitationStore>,
    notifier: Arc<dyn Notifier>,
    reporter: Arc<dyn ErrorReporter>,
    issuer: TokenIssuer,
    hasher: PasswordHasher,
    confirmation_ttl: chrono::Duration,
    notification_timeout: Duration,
}

impl SessionManager {
    /// Create a session manager from explicit configuration and collaborators
    pub fn new(
        config: &AuthConfig,
        users: Arc<dyn CredentialStore>,
        invitations: Arc<dyn InvitationStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            users,
            invitations,
            notifier,
            reporter: Arc::new(TracingReporter),
            issuer: TokenIssuer::new(config.tokens.clone()),
            hasher: PasswordHasher::new(config.bcrypt_cost),
            confirmation_ttl: chrono::Duration::hours(config.confirmation_ttl_hours),
            notification_timeout: config.notification_timeout,
        }
    }

    /// Replace the error reporter
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    /// Report a system failure and collapse it to the neutral error
    fn unavailable(&self, operation: &'static str, error: impl std::fmt::Display) -> AuthError {
        self.reporter.report(operation, &error);
        AuthError::Unavailable
    }

    /// Register a new, unconfirmed account.
    ///
    /// The returned receipt is produced once the account is committed. The
    /// confirmation email and invitation claims run afterwards and cannot fail
    /// the sign-up.
    pub async fn sign_up(&self, request: SignUpRequest) -> Result<SignUpReceipt, AuthError> {
        if request.has_missing_fields() {
            return Err(AuthError::MissingFields);
        }

        validate_email(&request.email)?;
        if let Some(username) = &request.username {
            validate_username(username, &request.email)?;
        }
        validate_password(&request.password)?;

        let hashed = self
            .hasher
            .hash(&request.password)
            .map_err(|e| self.unavailable("sign_up", e))?;

        let email = normalize_identity(&request.email);
        let username = request
            .username
            .as_deref()
            .map(normalize_identity)
            .unwrap_or_else(|| email.clone());

        let confirmation_token = generate_confirmation_token();
        let now = Utc::now();

        let user = User {
            id: Uuid::new_v4(),
            first_name: request.first_name.trim().to_string(),
            last_name: request.last_name.trim().to_string(),
            email,
            username,
            password_hash: hashed.hash,
            password_salt: hashed.salt,
            roles: RoleSet::learner(),
            provider: AuthProvider::Local,
            email_confirmed_at: None,
            confirmation_token_hash: Some(hash_token(&confirmation_token)),
            confirmation_token_expires_at: Some(now + self.confirmation_ttl),
            refresh_token_hash: None,
            refresh_token_expires_at: None,
            created_at: now,
            updated_at: now,
        };

        self.users
            .save(&user, Precondition::None)
            .await
            .map_err(|e| match e {
                // Uniqueness is enforced by the store, never pre-checked
                StoreError::DuplicateKey { .. } => AuthError::ExistingEmailAddress,
                StoreError::FieldInvalid {
                    field: UserField::Email | UserField::Username,
                } => AuthError::InvalidEmailAddress,
                StoreError::FieldInvalid {
                    field: UserField::Password,
                } => AuthError::InvalidPassword,
                StoreError::FieldInvalid { .. } => AuthError::MissingFields,
                other => self.unavailable("sign_up", other),
            })?;

        tracing::info!("User {} signed up", user.id);

        let follow_up = PostCommitTasks::spawn(
            self.notifier.clone(),
            self.invitations.clone(),
            SignUpEffects {
                user_id: user.id,
                email: user.email.clone(),
                confirmation_token,
                notify_timeout: self.notification_timeout,
            },
        );

        Ok(SignUpReceipt {
            user_id: user.id,
            follow_up,
        })
    }

    /// Confirm an account with the emailed token.
    ///
    /// Unknown user, wrong token, expired token and already-confirmed account
    /// all fail the same way. The token is consumed by a compare-and-clear
    /// write, so it confirms at most once.
    pub async fn validate_account(&self, username: &str, token: &str) -> Result<(), AuthError> {
        let user = self
            .users
            .find_by_identity(username)
            .await
            .map_err(|e| self.unavailable("validate_account", e))?
            .ok_or(AuthError::UserNotFound)?;

        let presented = hash_token(token);
        let (Some(stored), Some(expires_at)) = (
            user.confirmation_token_hash.as_deref(),
            user.confirmation_token_expires_at,
        ) else {
            return Err(AuthError::UserNotFound);
        };

        let now = Utc::now();
        if !constant_time_eq(stored.as_bytes(), presented.as_bytes()) || now > expires_at {
            tracing::debug!("Confirmation rejected for user {}", user.id);
            return Err(AuthError::UserNotFound);
        }

        let mut confirmed = user;
        confirmed.email_confirmed_at = Some(now);
        confirmed.confirmation_token_hash = None;
        confirmed.confirmation_token_expires_at = None;

        match self
            .users
            .save(&confirmed, Precondition::ConfirmationToken(presented))
            .await
        {
            Ok(()) => {
                tracing::info!("User {} confirmed email address", confirmed.id);
                Ok(())
            }
            // Consumed by a concurrent confirmation
            Err(StoreError::PreconditionFailed) => Err(AuthError::UserNotFound),
            Err(e) => Err(self.unavailable("validate_account", e)),
        }
    }

    /// Sign in with email or username and password.
    ///
    /// Replaces any existing refresh token, so earlier sessions stop being
    /// refreshable.
    pub async fn sign_in(&self, identity: &str, password: &str) -> Result<TokenPair, AuthError> {
        if identity.trim().is_empty() || password.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        let Some(mut user) = self
            .users
            .find_by_identity(identity)
            .await
            .map_err(|e| self.unavailable("sign_in", e))?
        else {
            tracing::debug!("Sign-in rejected");
            return Err(AuthError::InvalidCredentials);
        };

        if !password::authenticate(&user, password) {
            tracing::debug!("Sign-in rejected");
            return Err(AuthError::InvalidCredentials);
        }

        if !user.is_confirmed() {
            return Err(AuthError::UnconfirmedEmailAddress);
        }

        let tokens = self.issue_session(&mut user, "sign_in")?;

        self.users
            .save(&user, Precondition::None)
            .await
            .map_err(|e| self.unavailable("sign_in", e))?;

        tracing::info!("User {} signed in", user.id);

        Ok(tokens)
    }

    /// Exchange a refresh token for a new pair.
    ///
    /// The rotation only commits if the stored digest still equals the
    /// presented token; of two concurrent refreshes with the same token,
    /// exactly one wins.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self.issuer.validate_refresh_token(refresh_token).map_err(|e| {
            tracing::debug!("Refresh token rejected: {}", e);
            AuthError::InvalidRefreshToken
        })?;
        let user_id = claims
            .user_id()
            .map_err(|_| AuthError::InvalidRefreshToken)?;

        let mut user = self
            .users
            .find_by_id(user_id, Projection::Credentials)
            .await
            .map_err(|e| self.unavailable("refresh_token", e))?
            .ok_or(AuthError::InvalidRefreshToken)?;

        let presented = hash_token(refresh_token);
        let matches = user
            .refresh_token_hash
            .as_deref()
            .is_some_and(|stored| constant_time_eq(stored.as_bytes(), presented.as_bytes()));
        if !matches {
            tracing::debug!("Stale refresh token presented for user {}", user.id);
            return Err(AuthError::InvalidRefreshToken);
        }

        let expired = user
            .refresh_token_expires_at
            .is_none_or(|expires_at| Utc::now() > expires_at);
        if expired {
            self.expire_session(user, presented).await;
            return Err(AuthError::InvalidRefreshToken);
        }

        let tokens = self.issue_session(&mut user, "refresh_token")?;

        match self
            .users
            .save(&user, Precondition::RefreshToken(Some(presented)))
            .await
        {
            Ok(()) => {
                tracing::info!("Rotated refresh token for user {}", user.id);
                Ok(tokens)
            }
            Err(StoreError::PreconditionFailed) => {
                tracing::debug!("Refresh token for user {} already rotated", user.id);
                Err(AuthError::InvalidRefreshToken)
            }
            Err(e) => Err(self.unavailable("refresh_token", e)),
        }
    }

    /// End the user's session. Idempotent; an unknown user is not an error.
    pub async fn sign_out(&self, user_id: Uuid) -> Result<(), AuthError> {
        for _ in 0..SIGN_OUT_ATTEMPTS {
            let Some(mut user) = self
                .users
                .find_by_id(user_id, Projection::Credentials)
                .await
                .map_err(|e| self.unavailable("sign_out", e))?
            else {
                return Ok(());
            };

            if !user.has_active_session() {
                return Ok(());
            }

            let current = user.refresh_token_hash.clone();
            user.clear_session();

            match self
                .users
                .save(&user, Precondition::RefreshToken(current))
                .await
            {
                Ok(()) => {
                    tracing::info!("User {} signed out", user_id);
                    return Ok(());
                }
                // Rotated meanwhile; clear the newer token instead
                Err(StoreError::PreconditionFailed) => continue,
                Err(e) => return Err(self.unavailable("sign_out", e)),
            }
        }

        Err(self.unavailable("sign_out", "session kept changing during sign-out"))
    }

    /// Verify an access token and return the identity it carries
    pub fn authenticate(&self, access_token: &str) -> Result<AuthContext, AuthError> {
        let claims = self
            .issuer
            .validate_access_token(access_token)
            .map_err(|e| {
                tracing::debug!("Access token rejected: {}", e);
                AuthError::InvalidCredentials
            })?;

        Ok(AuthContext {
            user_id: claims.user_id().map_err(|_| AuthError::InvalidCredentials)?,
            roles: claims.role_set().map_err(|_| AuthError::InvalidCredentials)?,
        })
    }

    /// Profile of the user an access token belongs to
    pub async fn current_user(&self, access_token: &str) -> Result<UserResponse, AuthError> {
        let context = self.authenticate(access_token)?;

        let user = self
            .users
            .find_by_id(context.user_id, Projection::Profile)
            .await
            .map_err(|e| self.unavailable("current_user", e))?
            .ok_or(AuthError::UserNotFound)?;

        Ok(user.into())
    }

    /// Issue a pair and mirror its refresh half onto the record
    fn issue_session(
        &self,
        user: &mut User,
        operation: &'static str,
    ) -> Result<TokenPair, AuthError> {
        let tokens = self
            .issuer
            .issue(user)
            .map_err(|e: TokenError| self.unavailable(operation, e))?;

        user.refresh_token_hash = Some(hash_token(&tokens.refresh_token));
        user.refresh_token_expires_at = Some(tokens.refresh_expires_at);

        Ok(tokens)
    }

    /// Drop an expired session, unless it was already replaced
    async fn expire_session(&self, mut user: User, presented: String) {
        user.clear_session();
        match self
            .users
            .save(&user, Precondition::RefreshToken(Some(presented)))
            .await
        {
            Ok(()) => tracing::info!("Cleared expired session for user {}", user.id),
            Err(StoreError::PreconditionFailed) => {}
            Err(e) => {
                self.reporter.report("refresh_token", &e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let cases = [
            (AuthError::MissingFields, "MissingFields"),
            (AuthError::ExistingEmailAddress, "ExistingEmailAddress"),
            (AuthError::InvalidEmailAddress, "InvalidEmailAddress"),
            (AuthError::InvalidPassword, "InvalidPassword"),
            (AuthError::InvalidCredentials, "InvalidCredentials"),
            (AuthError::UnconfirmedEmailAddress, "UnconfirmedEmailAddress"),
            (AuthError::InvalidRefreshToken, "InvalidRefreshToken"),
            (AuthError::UserNotFound, "UserNotFound"),
            (AuthError::Unavailable, "Unavailable"),
        ];

        for (error, code) in cases {
            assert_eq!(error.code(), code);
            assert_eq!(error.is_user_error(), code != "Unavailable");
        }
    }

    #[test]
    fn test_unavailable_message_is_neutral() {
        assert_eq!(AuthError::Unavailable.to_string(), "Service unavailable");
    }

    #[test]
    fn test_field_rejection_mapping() {
        assert_eq!(
            AuthError::from(FieldRejection::InvalidEmail),
            AuthError::InvalidEmailAddress
        );
        assert_eq!(
            AuthError::from(FieldRejection::InvalidUsername),
            AuthError::InvalidEmailAddress
        );
        assert_eq!(
            AuthError::from(FieldRejection::PasswordTooShort),
            AuthError::InvalidPassword
        );
        assert_eq!(
            AuthError::from(FieldRejection::PasswordTooWeak),
            AuthError::InvalidPassword
        );
    }

    #[test]
    fn test_missing_fields_detection() {
        assert!(!SignUpRequest::new("Ada", "Lovelace", "a@b.com", "Secret123").has_missing_fields());
        assert!(SignUpRequest::new(" ", "Lovelace", "a@b.com", "Secret123").has_missing_fields());
        assert!(SignUpRequest::new("Ada", "", "a@b.com", "Secret123").has_missing_fields());
        assert!(SignUpRequest::new("Ada", "Lovelace", "", "Secret123").has_missing_fields());
        assert!(SignUpRequest::new("Ada", "Lovelace", "a@b.com", "").has_missing_fields());
        assert!(
            SignUpRequest::new("Ada", "Lovelace", "a@b.com", "Secret123")
                .username("  ")
                .has_missing_fields()
        );
    }

    #[test]
    fn test_sign_up_request_deserialization() {
        let json = r#"{"first_name":"Ada","last_name":"Lovelace","email":"a@b.com","password":"Secret123"}"#;
        let request: SignUpRequest = serde_json::from_str(json).unwrap();
        assert!(request.username.is_none());
        assert_eq!(request.email, "a@b.com");
    }

    #[test]
    fn test_auth_context_has_role() {
        let context = AuthContext {
            user_id: Uuid::new_v4(),
            roles: RoleSet::new([Role::Teacher]),
        };
        assert!(context.has_role(Role::Teacher));
        assert!(!context.has_role(Role::Admin));
    }
}
