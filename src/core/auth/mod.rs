//! Authentication module for LearnHub
//!
//! This module provides authentication functionality including:
//! - Password hashing and verification
//! - Access/refresh token issuance and validation
//! - Sign-up, email confirmation, sign-in, refresh and sign-out
//! - Post-commit confirmation emails and invitation claims

pub mod jwt;
pub mod notifier;
pub mod password;
pub mod report;
pub mod service;
pub mod tasks;


pub use jwt::{Claims, TokenConfig, TokenError, TokenIssuer, TokenPair, TokenType};
pub use notifier::{ConfirmationEmail, NotificationSender, Notifier, NotifyError, TracingNotifier};
pub use password::{PasswordError, PasswordHasher};
pub use report::{ErrorReporter, TracingReporter};
pub use service::{AuthContext, AuthError, SessionManager, SignUpReceipt, SignUpRequest};
pub use tasks::{PostCommitReport, PostCommitTasks};
