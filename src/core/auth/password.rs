//! Password hashing, verification and credential field validation
//!
//! Passwords are hashed with bcrypt over a per-user random salt that is stored
//! next to the hash. Verification recomputes the hash with the stored salt and
//! compares in constant time. Opaque tokens (confirmation, refresh) are kept
//! at rest as SHA-256 digests.

use bcrypt::{HashParts, Version};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::core::db::models::User;

/// Cost factor for bcrypt hashing (12 is recommended for production)
pub const DEFAULT_BCRYPT_COST: u32 = 12;

/// Salt length required by bcrypt
const SALT_LENGTH: usize = 16;

/// Random bytes in an emailed confirmation token
const CONFIRMATION_TOKEN_BYTES: usize = 24;

/// Password hashing errors
#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("Password hashing failed: {0}")]
    HashingError(String),
}

impl From<bcrypt::BcryptError> for PasswordError {
    fn from(err: bcrypt::BcryptError) -> Self {
        PasswordError::HashingError(err.to_string())
    }
}

/// Salted password hash ready to be stored on a [`User`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedPassword {
    pub hash: String,
    /// Hex encoded salt
    pub salt: String,
}

/// Password hasher configuration
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self {
            cost: DEFAULT_BCRYPT_COST,
        }
    }
}

impl PasswordHasher {
    /// Create a hasher with a custom bcrypt cost
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash a password with a freshly generated salt
    pub fn hash(&self, password: &str) -> Result<HashedPassword, PasswordError> {
        let salt: [u8; SALT_LENGTH] = rand::thread_rng().r#gen();
        let hash = hash_with_salt(password, self.cost, salt)?;

        Ok(HashedPassword {
            hash,
            salt: hex::encode(salt),
        })
    }
}

fn hash_with_salt(
    password: &str,
    cost: u32,
    salt: [u8; SALT_LENGTH],
) -> Result<String, PasswordError> {
    let parts = bcrypt::hash_with_salt(password, cost, salt)?;
    Ok(parts.format_for_version(Version::TwoB))
}

/// Check a plaintext password against the user's stored salted hash.
///
/// Never fails: an empty password, an empty or malformed hash, or a malformed
/// salt all yield `false`.
pub fn authenticate(user: &User, password: &str) -> bool {
    if password.is_empty() || user.password_hash.is_empty() {
        return false;
    }

    let Ok(stored) = user.password_hash.parse::<HashParts>() else {
        return false;
    };

    let Some(salt) = hex::decode(&user.password_salt)
        .ok()
        .and_then(|bytes| <[u8; SALT_LENGTH]>::try_from(bytes).ok())
    else {
        return false;
    };

    match hash_with_salt(password, stored.get_cost(), salt) {
        Ok(computed) => constant_time_eq(computed.as_bytes(), user.password_hash.as_bytes()),
        Err(_) => false,
    }
}

/// Constant-time comparison of two byte strings
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Hash a token using SHA-256
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a random single-use confirmation token (hex)
pub fn generate_confirmation_token() -> String {
    let bytes: [u8; CONFIRMATION_TOKEN_BYTES] = rand::thread_rng().r#gen();
    hex::encode(bytes)
}

// ============================================================================
// Field validation
// ============================================================================

/// Reasons a credential field is rejected before it reaches the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRejection {
    InvalidEmail,
    /// Address-shaped username that is not the account's own email
    InvalidUsername,
    PasswordTooShort,
    PasswordTooWeak,
}

/// Validate email format
pub fn validate_email(email: &str) -> Result<(), FieldRejection> {
    let email = email.trim();

    let Some((local, domain)) = email.split_once('@') else {
        return Err(FieldRejection::InvalidEmail);
    };

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(FieldRejection::InvalidEmail);
    }

    if email.chars().any(char::is_whitespace) {
        return Err(FieldRejection::InvalidEmail);
    }

    // Domain needs at least one dot with non-empty labels around it
    if !domain.contains('.') || domain.split('.').any(|p| p.is_empty()) {
        return Err(FieldRejection::InvalidEmail);
    }

    Ok(())
}

/// Validate a username against the account's email.
///
/// Identity lookups match either field, so a username containing `@` is only
/// accepted when it is the account's own address.
pub fn validate_username(username: &str, email: &str) -> Result<(), FieldRejection> {
    let username = username.trim();
    if username.contains('@') && !username.eq_ignore_ascii_case(email.trim()) {
        return Err(FieldRejection::InvalidUsername);
    }
    Ok(())
}

/// Validate password strength
pub fn validate_password(password: &str) -> Result<(), FieldRejection> {
    if password.chars().count() < 8 {
        return Err(FieldRejection::PasswordTooShort);
    }

    let has_uppercase = password.chars().any(|c| c.is_uppercase());
    let has_lowercase = password.chars().any(|c| c.is_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());

    if !has_uppercase || !has_lowercase || !has_digit {
        return Err(FieldRejection::PasswordTooWeak);
    }

    Ok(())
}
