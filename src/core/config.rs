//! Application configuration from environment variables.
//!
//! Load configuration using `AuthConfig::from_env()` after calling `dotenvy::dotenv()`.
//! The resulting value is passed explicitly to the token issuer and session
//! manager; nothing reads secrets from the process environment later on.

use std::time::Duration;

use crate::core::auth::jwt::{DEFAULT_ISSUER, TokenConfig};
use crate::core::auth::notifier::NotificationSender;
use crate::core::auth::password::DEFAULT_BCRYPT_COST;

/// Default lifetime of an emailed confirmation token
pub const DEFAULT_CONFIRMATION_TTL_HOURS: i64 = 24;

/// Allowed range for the confirmation token lifetime
const CONFIRMATION_TTL_RANGE: std::ops::RangeInclusive<i64> = 24..=48;

/// Default bound on a single notification call
pub const DEFAULT_NOTIFICATION_TIMEOUT_SECS: u64 = 10;

const DEFAULT_SENDER_NAME: &str = "LearnHub";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),

    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("ACCESS_TOKEN_SECRET and REFRESH_TOKEN_SECRET must differ")]
    SharedSecret,
}

/// Authentication configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Signing secrets and issuer for access/refresh tokens
    pub tokens: TokenConfig,
    /// `From` identity of confirmation emails
    pub sender: NotificationSender,
    /// Base URL used to build confirmation links
    pub app_base_url: Option<String>,
    /// Confirmation token lifetime in hours (24..=48)
    pub confirmation_ttl_hours: i64,
    /// Bound on the notifier call during sign-up
    pub notification_timeout: Duration,
    /// bcrypt cost for new password hashes
    pub bcrypt_cost: u32,
}

impl AuthConfig {
    /// Configuration with explicit secrets and defaults everywhere else
    pub fn new(
        access_secret: impl Into<String>,
        refresh_secret: impl Into<String>,
        sender_address: impl Into<String>,
    ) -> Self {
        Self {
            tokens: TokenConfig::new(access_secret, refresh_secret),
            sender: NotificationSender::new(sender_address, DEFAULT_SENDER_NAME),
            app_base_url: None,
            confirmation_ttl_hours: DEFAULT_CONFIRMATION_TTL_HOURS,
            notification_timeout: Duration::from_secs(DEFAULT_NOTIFICATION_TIMEOUT_SECS),
            bcrypt_cost: DEFAULT_BCRYPT_COST,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Call `dotenvy::dotenv()` before this to load from `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |var: &'static str| {
            lookup(var)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(var))
        };

        let access_secret = required("ACCESS_TOKEN_SECRET")?;
        let refresh_secret = required("REFRESH_TOKEN_SECRET")?;
        let sender_address = required("NOTIFICATION_SENDER")?;

        if access_secret == refresh_secret {
            return Err(ConfigError::SharedSecret);
        }

        let sender_name =
            lookup("NOTIFICATION_SENDER_NAME").unwrap_or_else(|| DEFAULT_SENDER_NAME.to_string());
        let issuer = lookup("TOKEN_ISSUER").unwrap_or_else(|| DEFAULT_ISSUER.to_string());

        let confirmation_ttl_hours = parse_or(
            &lookup,
            "CONFIRMATION_TOKEN_TTL_HOURS",
            DEFAULT_CONFIRMATION_TTL_HOURS,
        )?;
        if !CONFIRMATION_TTL_RANGE.contains(&confirmation_ttl_hours) {
            return Err(ConfigError::Invalid {
                var: "CONFIRMATION_TOKEN_TTL_HOURS",
                reason: format!("{} is outside 24..=48", confirmation_ttl_hours),
            });
        }

        let timeout_secs = parse_or(
            &lookup,
            "NOTIFICATION_TIMEOUT_SECS",
            DEFAULT_NOTIFICATION_TIMEOUT_SECS,
        )?;
        let bcrypt_cost = parse_or(&lookup, "BCRYPT_COST", DEFAULT_BCRYPT_COST)?;

        Ok(Self {
            tokens: TokenConfig::new(access_secret, refresh_secret).issuer(issuer),
            sender: NotificationSender::new(sender_address, sender_name),
            app_base_url: lookup("APP_BASE_URL"),
            confirmation_ttl_hours,
            notification_timeout: Duration::from_secs(timeout_secs),
            bcrypt_cost,
        })
    }

    /// Set bcrypt cost
    pub fn bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    /// Set notification timeout
    pub fn notification_timeout(mut self, timeout: Duration) -> Self {
        self.notification_timeout = timeout;
        self
    }

    /// Set confirmation token lifetime, clamped to 24..=48 hours
    pub fn confirmation_ttl_hours(mut self, hours: i64) -> Self {
        self.confirmation_ttl_hours =
            hours.clamp(*CONFIRMATION_TTL_RANGE.start(), *CONFIRMATION_TTL_RANGE.end());
        self
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
