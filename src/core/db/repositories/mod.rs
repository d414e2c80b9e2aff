//! PostgreSQL repositories
//!
//! Implementations of the credential and invitation store contracts on top of
//! SQLx. Uniqueness and conditional writes are enforced by the database.

pub mod registration;
pub mod user;

pub use registration::RegistrationRepository;
pub use user::UserRepository;
