//! LearnHub authentication core
//!
//! Credential verification, access/refresh token issuance and rotation, and
//! the email-confirmation lifecycle of a learning platform's accounts.

pub mod core;
