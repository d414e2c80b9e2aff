//! Post-commit side effects of sign-up
//!
//! Once the new account is saved, the confirmation email and the invitation
//! claims run as detached tasks. Each has its own failure handling and none of
//! them can turn a committed sign-up into a failure. Dropping
//! [`PostCommitTasks`] leaves the tasks running.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::core::auth::notifier::{Notifier, NotifyError};
use crate::core::db::store::InvitationStore;

/// Outcome of the post-commit work for one sign-up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PostCommitReport {
    /// Confirmation email accepted by the notifier within the timeout
    pub notified: bool,
    /// Invitations reassigned to the new account
    pub claimed: usize,
    /// Invitations whose claim failed (lookups that failed count as zero)
    pub failed_claims: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct ClaimSummary {
    claimed: usize,
    failed: usize,
}

/// Handles to the detached post-commit tasks
#[derive(Debug)]
pub struct PostCommitTasks {
    notification: JoinHandle<bool>,
    claims: JoinHandle<ClaimSummary>,
}

/// Inputs for the post-commit tasks of one sign-up
pub struct SignUpEffects {
    pub user_id: Uuid,
    pub email: String,
    pub confirmation_token: String,
    pub notify_timeout: Duration,
}

impl PostCommitTasks {
    pub fn spawn(
        notifier: Arc<dyn Notifier>,
        invitations: Arc<dyn InvitationStore>,
        effects: SignUpEffects,
    ) -> Self {
        let SignUpEffects {
            user_id,
            email,
            confirmation_token,
            notify_timeout,
        } = effects;

        let notification = tokio::spawn({
            let email = email.clone();
            async move {
                send_confirmation(notifier, &email, &confirmation_token, notify_timeout).await
            }
        });

        let claims =
            tokio::spawn(async move { claim_invitations(invitations, &email, user_id).await });

        Self {
            notification,
            claims,
        }
    }

    /// Wait for both tasks and summarise what happened
    pub async fn join(self) -> PostCommitReport {
        let notified = self.notification.await.unwrap_or_else(|e| {
            tracing::warn!("Confirmation task aborted: {}", e);
            false
        });

        let summary = self.claims.await.unwrap_or_else(|e| {
            tracing::warn!("Invitation claim task aborted: {}", e);
            ClaimSummary::default()
        });

        PostCommitReport {
            notified,
            claimed: summary.claimed,
            failed_claims: summary.failed,
        }
    }
}

async fn send_confirmation(
    notifier: Arc<dyn Notifier>,
    email: &str,
    token: &str,
    timeout: Duration,
) -> bool {
    let result = match tokio::time::timeout(timeout, notifier.send(email, token)).await {
        Ok(result) => result,
        Err(_) => Err(NotifyError::Timeout),
    };

    match result {
        Ok(()) => {
            tracing::debug!("Confirmation email handed off for {}", email);
            true
        }
        Err(e) => {
            tracing::warn!("Confirmation email for {} not sent: {}", email, e);
            false
        }
    }
}

async fn claim_invitations(
    invitations: Arc<dyn InvitationStore>,
    email: &str,
    user_id: Uuid,
) -> ClaimSummary {
    let pending = match invitations.pending_for_email(email).await {
        Ok(pending) => pending,
        Err(e) => {
            tracing::warn!("Pending invitation lookup failed for {}: {}", email, e);
            return ClaimSummary::default();
        }
    };

    let results = join_all(pending.iter().map(|r| invitations.claim(r.id, user_id))).await;

    let mut summary = ClaimSummary::default();
    for (registration, result) in pending.iter().zip(results) {
        match result {
            Ok(true) => summary.claimed += 1,
            // Claimed concurrently by another sign-up retry
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(
                    "Invitation {} not transferred to user {}: {}",
                    registration.id,
                    user_id,
                    e
                );
                summary.failed += 1;
            }
        }
    }

    if summary.claimed > 0 {
        tracing::info!("Transferred {} invitation(s) to user {}", summary.claimed, user_id);
    }

    summary
}
