//! Error tracking for system-class failures
//!
//! Persistence failures are reported here with full detail, then collapsed to
//! a neutral error for the caller.

use std::fmt::Display;

/// Receives failures the caller never gets to see
pub trait ErrorReporter: Send + Sync {
    fn report(&self, operation: &'static str, error: &dyn Display);
}

/// Reporter that emits `tracing::error!` events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, operation: &'static str, error: &dyn Display) {
        tracing::error!(operation, error = %error, "Authentication operation failed");
    }
}
