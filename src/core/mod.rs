//! Core authentication and session logic

pub mod auth;
pub mod config;
pub mod db;

pub use config::{AuthConfig, ConfigError};
