//! Confirmation email notifications
//!
//! The session manager only needs `send(to, token)`. Delivery itself lives
//! outside this crate; [`ConfirmationEmail`] composes the message a delivery
//! backend would put on the wire.

use async_trait::async_trait;

/// Notification errors
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notification rejected: {0}")]
    Rejected(String),

    #[error("Notification timed out")]
    Timeout,

    #[error("Notification transport failed: {0}")]
    Transport(String),
}

/// Sends confirmation tokens to newly registered addresses
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, token: &str) -> Result<(), NotifyError>;
}

/// Identity used as the `From` of confirmation emails
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationSender {
    pub address: String,
    pub name: String,
}

impl NotificationSender {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
        }
    }

    /// `Name <address>` mailbox form
    pub fn mailbox(&self) -> String {
        format!("{} <{}>", self.name, self.address)
    }
}

/// Composed confirmation message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl ConfirmationEmail {
    pub fn compose(
        sender: &NotificationSender,
        to: &str,
        token: &str,
        base_url: Option<&str>,
    ) -> Self {
        let instructions = match base_url {
            Some(base) => format!(
                "Open the link below to confirm your address:\n\n{}/confirm?username={}&token={}",
                base.trim_end_matches('/'),
                urlencoding::encode(to),
                urlencoding::encode(token)
            ),
            None => format!("Your confirmation code is:\n\n{token}"),
        };

        Self {
            from: sender.mailbox(),
            to: to.to_string(),
            subject: format!("Confirm your {} account", sender.name),
            body: format!(
                "Welcome to {}!\n\n{}\n\nThe code expires soon; request a new account link if it does.",
                sender.name, instructions
            ),
        }
    }
}

/// Notifier that records outgoing messages in the log instead of delivering them
#[derive(Debug, Clone)]
pub struct TracingNotifier {
    sender: NotificationSender,
    base_url: Option<String>,
}

impl TracingNotifier {
    pub fn new(sender: NotificationSender, base_url: Option<String>) -> Self {
        Self { sender, base_url }
    }
}

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send(&self, to: &str, token: &str) -> Result<(), NotifyError> {
        let email = ConfirmationEmail::compose(&self.sender, to, token, self.base_url.as_deref());

        // Body carries the token, so only the envelope is logged
        tracing::info!(
            from = %email.from,
            to = %email.to,
            subject = %email.subject,
            "Confirmation email composed"
        );

        Ok(())
    }
}
