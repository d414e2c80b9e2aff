//! JWT utilities for token generation and validation
//!
//! Access and refresh tokens are HS256-signed claim sets carrying the user id
//! and role tags. Each class is signed with its own secret, so a leaked secret
//! of one class cannot forge the other. Lifetimes are fixed: 15 minutes for
//! access tokens and 14 days for refresh tokens.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::db::models::{RoleSet, User};

/// Access token lifetime (15 minutes)
pub const ACCESS_TOKEN_LIFETIME_MINUTES: i64 = 15;

/// Refresh token lifetime (14 days)
pub const REFRESH_TOKEN_LIFETIME_DAYS: i64 = 14;

/// Default token issuer
pub const DEFAULT_ISSUER: &str = "learnhub";

/// JWT configuration
#[derive(Clone)]
pub struct TokenConfig {
    /// Secret key for signing access tokens
    pub access_secret: String,
    /// Secret key for signing refresh tokens
    pub refresh_secret: String,
    /// Token issuer
    pub issuer: String,
}

impl TokenConfig {
    /// Create a new JWT configuration
    pub fn new(access_secret: impl Into<String>, refresh_secret: impl Into<String>) -> Self {
        Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            issuer: DEFAULT_ISSUER.to_string(),
        }
    }

    /// Set issuer
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }
}

impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("access_secret", &"<redacted>")
            .field("refresh_secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .finish()
    }
}

/// JWT errors
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Token encoding failed: {0}")]
    EncodingError(String),

    #[error("Token decoding failed: {0}")]
    DecodingError(String),

    #[error("Token expired")]
    Expired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Invalid token type")]
    InvalidTokenType,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidToken
            | ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidIssuer => TokenError::InvalidToken,
            _ => TokenError::DecodingError(err.to_string()),
        }
    }
}

/// Token type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenType::Access => write!(f, "access"),
            TokenType::Refresh => write!(f, "refresh"),
        }
    }
}

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Role tags
    pub roles: Vec<String>,
    /// Token type (access or refresh)
    pub token_type: TokenType,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issuer
    pub iss: String,
    /// JWT ID, keeps two tokens issued within the same second distinct
    pub jti: String,
}

impl Claims {
    /// Get user ID as UUID
    pub fn user_id(&self) -> Result<Uuid, TokenError> {
        Uuid::parse_str(&self.sub).map_err(|_| TokenError::InvalidToken)
    }

    /// Parse the role tags, rejecting unknown ones
    pub fn role_set(&self) -> Result<RoleSet, TokenError> {
        RoleSet::try_from(self.roles.clone()).map_err(|_| TokenError::InvalidToken)
    }
}

/// Token pair (access + refresh)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    /// Access token (short-lived)
    pub access_token: String,
    /// Refresh token (long-lived)
    pub refresh_token: String,
    /// Access token expiration
    pub access_expires_at: DateTime<Utc>,
    /// Refresh token expiration
    pub refresh_expires_at: DateTime<Utc>,
    /// Token type (always "Bearer")
    pub token_type: String,
}

/// Issues and validates signed token pairs
#[derive(Clone)]
pub struct TokenIssuer {
    issuer: String,
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
}

impl TokenIssuer {
    /// Create a new issuer from explicit configuration
    pub fn new(config: TokenConfig) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            issuer: config.issuer,
        }
    }

    /// Issue a fresh access/refresh pair for a user.
    ///
    /// Nothing is persisted here; mirroring the refresh token onto the user
    /// record is the caller's job.
    pub fn issue(&self, user: &User) -> Result<TokenPair, TokenError> {
        self.issue_at(user, Utc::now())
    }

    /// Issue a pair as if the current time were `now`
    pub fn issue_at(&self, user: &User, now: DateTime<Utc>) -> Result<TokenPair, TokenError> {
        let access_expires_at = now + Duration::minutes(ACCESS_TOKEN_LIFETIME_MINUTES);
        let refresh_expires_at = now + Duration::days(REFRESH_TOKEN_LIFETIME_DAYS);

        let access_token = self.sign(user, TokenType::Access, now, access_expires_at)?;
        let refresh_token = self.sign(user, TokenType::Refresh, now, refresh_expires_at)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            access_expires_at,
            refresh_expires_at,
            token_type: "Bearer".to_string(),
        })
    }

    fn sign(
        &self,
        user: &User,
        token_type: TokenType,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = Claims {
            sub: user.id.to_string(),
            roles: user.roles.to_tags(),
            token_type,
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
        };

        let key = match token_type {
            TokenType::Access => &self.access_encoding,
            TokenType::Refresh => &self.refresh_encoding,
        };

        encode(&Header::default(), &claims, key).map_err(|e| TokenError::EncodingError(e.to_string()))
    }

    fn decode_with(&self, token: &str, key: &DecodingKey) -> Result<Claims, TokenError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);
        // Set leeway to 0 for strict expiration checking
        validation.leeway = 0;

        let token_data = decode::<Claims>(token, key, &validation)?;

        Ok(token_data.claims)
    }

    /// Validate an access token against the access secret
    pub fn validate_access_token(&self, token: &str) -> Result<Claims, TokenError> {
        let claims = self.decode_with(token, &self.access_decoding)?;

        if claims.token_type != TokenType::Access {
            return Err(TokenError::InvalidTokenType);
        }

        Ok(claims)
    }

    /// Validate a refresh token against the refresh secret
    pub fn validate_refresh_token(&self, token: &str) -> Result<Claims, TokenError> {
        let claims = self.decode_with(token, &self.refresh_decoding)?;

        if claims.token_type != TokenType::Refresh {
            return Err(TokenError::InvalidTokenType);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::models::{AuthProvider, Role};

    fn create_test_issuer() -> TokenIssuer {
        TokenIssuer::new(TokenConfig::new(
            "access_secret_for_testing_only_32bytes",
            "refresh_secret_for_testing_only_32byte",
        ))
    }

    fn test_user() -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            first_name: "Test".to_string(),
            last_name: "Teacher".to_string(),
            email: "teacher@example.com".to_string(),
            username: "teacher@example.com".to_string(),
            password_hash: String::new(),
            password_salt: String::new(),
            roles: RoleSet::new([Role::Teacher, Role::Learner]),
            provider: AuthProvider::Local,
            email_confirmed_at: Some(now),
            confirmation_token_hash: None,
            confirmation_token_expires_at: None,
            refresh_token_hash: None,
            refresh_token_expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    // ========================================================================
    // Issue Tests
    // ========================================================================

    #[test]
    fn test_issue_lifetimes() {
        let issuer = create_test_issuer();
        let now = Utc::now();

        let pair = issuer.issue_at(&test_user(), now).unwrap();

        assert_eq!(pair.access_expires_at - now, Duration::minutes(15));
        assert_eq!(pair.refresh_expires_at - now, Duration::days(14));
        assert_eq!(pair.token_type, "Bearer");
        assert_ne!(pair.access_token, pair.refresh_token);
    }

    #[test]
    fn test_issue_claims_carry_id_and_roles() {
        let issuer = create_test_issuer();
        let user = test_user();

        let pair = issuer.issue(&user).unwrap();
        let claims = issuer.validate_access_token(&pair.access_token).unwrap();

        assert_eq!(claims.user_id().unwrap(), user.id);
        assert_eq!(claims.roles, vec!["learner", "teacher"]);
        assert_eq!(claims.role_set().unwrap(), user.roles);
        assert_eq!(claims.iss, DEFAULT_ISSUER);
    }

    #[test]
    fn test_consecutive_pairs_differ() {
        let issuer = create_test_issuer();
        let user = test_user();
        let now = Utc::now();

        let a = issuer.issue_at(&user, now).unwrap();
        let b = issuer.issue_at(&user, now).unwrap();

        assert_ne!(a.refresh_token, b.refresh_token);
        assert_ne!(a.access_token, b.access_token);
    }

    // ========================================================================
    // Validation Tests
    // ========================================================================

    #[test]
    fn test_validate_refresh_token() {
        let issuer = create_test_issuer();
        let pair = issuer.issue(&test_user()).unwrap();

        let claims = issuer.validate_refresh_token(&pair.refresh_token).unwrap();
        assert_eq!(claims.token_type, TokenType::Refresh);
    }

    #[test]
    fn test_secrets_are_not_interchangeable() {
        let issuer = create_test_issuer();
        let pair = issuer.issue(&test_user()).unwrap();

        // A refresh token is signed with the refresh secret, so it fails the
        // access signature check before its type is even looked at.
        assert!(matches!(
            issuer.validate_access_token(&pair.refresh_token),
            Err(TokenError::InvalidToken)
        ));
        assert!(matches!(
            issuer.validate_refresh_token(&pair.access_token),
            Err(TokenError::InvalidToken)
        ));
    }

    #[test]
    fn test_same_secret_still_checks_type() {
        let issuer = TokenIssuer::new(TokenConfig::new("shared", "shared"));
        let pair = issuer.issue(&test_user()).unwrap();

        assert!(matches!(
            issuer.validate_access_token(&pair.refresh_token),
            Err(TokenError::InvalidTokenType)
        ));
    }

    #[test]
    fn test_validate_invalid_token() {
        let issuer = create_test_issuer();
        assert!(issuer.validate_refresh_token("invalid.token.here").is_err());
    }

    #[test]
    fn test_validate_token_wrong_secret() {
        let issuer1 = create_test_issuer();
        let issuer2 = TokenIssuer::new(TokenConfig::new("other_access", "other_refresh"));

        let pair = issuer1.issue(&test_user()).unwrap();
        assert!(matches!(
            issuer2.validate_refresh_token(&pair.refresh_token),
            Err(TokenError::InvalidToken)
        ));
    }

    #[test]
    fn test_validate_token_wrong_issuer() {
        let issuer1 = create_test_issuer();
        let issuer2 = TokenIssuer::new(
            TokenConfig::new(
                "access_secret_for_testing_only_32bytes",
                "refresh_secret_for_testing_only_32byte",
            )
            .issuer("someone-else"),
        );

        let pair = issuer1.issue(&test_user()).unwrap();
        assert!(issuer2.validate_access_token(&pair.access_token).is_err());
    }

    #[test]
    fn test_expired_refresh_token() {
        let issuer = create_test_issuer();
        let long_ago = Utc::now() - Duration::days(REFRESH_TOKEN_LIFETIME_DAYS + 1);

        let pair = issuer.issue_at(&test_user(), long_ago).unwrap();

        let result = issuer.validate_refresh_token(&pair.refresh_token);
        assert!(
            matches!(result, Err(TokenError::Expired)),
            "Expected Expired error, got: {:?}",
            result
        );
    }

    #[test]
    fn test_claims_with_unknown_role_rejected() {
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            roles: vec!["wizard".to_string()],
            token_type: TokenType::Access,
            iat: 0,
            exp: 0,
            iss: DEFAULT_ISSUER.to_string(),
            jti: Uuid::new_v4().to_string(),
        };
        assert!(matches!(claims.role_set(), Err(TokenError::InvalidToken)));
    }

    // ========================================================================
    // Serialization Tests
    // ========================================================================

    #[test]
    fn test_token_type_serialization() {
        assert_eq!(serde_json::to_string(&TokenType::Access).unwrap(), r#""access""#);
        assert_eq!(
            serde_json::to_string(&TokenType::Refresh).unwrap(),
            r#""refresh""#
        );
        assert_eq!(TokenType::Refresh.to_string(), "refresh");
    }

    #[test]
    fn test_token_config_debug_hides_secrets() {
        let config = TokenConfig::new("top-secret-a", "top-secret-b");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("top-secret"));
        assert!(debug.contains("learnhub"));
    }
}
