//! willkeep Notification Service
//!
//! Reference [`DeliveryChannel`] implementations.
//!
//! # Delivery Methods
//!
//! - **Email**: one release message per recipient over SMTP, with
//!   per-recipient retries
//! - **Dry run**: logs what would be sent; used when no SMTP server is
//!   configured
//!
//! # Example
//!
//! ```ignore
//! use willkeep_notify::{EmailConfig, EmailDelivery};
//!
//! let channel = EmailDelivery::new(EmailConfig::new(
//!     "smtp.example.com", "user", "password", "willkeep@example.com",
//! ));
//! channel.deliver(&will).await?;
//! ```

mod config;
mod smtp;
pub mod templates;

pub use config::EmailConfig;
pub use templates::NotificationMessage;

use async_trait::async_trait;
use thiserror::Error;
use willkeep_core::{DeliveryChannel, DeliveryError, Will};

/// Errors from notification operations
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Email send failed: {0}")]
    EmailFailed(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<NotifyError> for DeliveryError {
    fn from(err: NotifyError) -> Self {
        match err {
            NotifyError::EmailFailed(msg) => DeliveryError::Transport(msg),
            NotifyError::InvalidAddress(msg) | NotifyError::Config(msg) => {
                DeliveryError::Rejected(msg)
            }
        }
    }
}

/// Delivers a released will to every recipient by email.
pub struct EmailDelivery {
    config: EmailConfig,
}

impl EmailDelivery {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DeliveryChannel for EmailDelivery {
    async fn deliver(&self, will: &Will) -> Result<(), DeliveryError> {
        if will.recipients.is_empty() {
            log::warn!("Will {} has no recipients; nothing to send", will.id);
            return Ok(());
        }

        let mailer = smtp::build_async_transport(&self.config)?;

        let mut failures = Vec::new();
        for recipient in &will.recipients {
            let message = templates::generate_release_message(will, recipient);
            if let Err(e) =
                smtp::send_email_to_recipient(&mailer, &self.config, &recipient.email, &message)
                    .await
            {
                log::error!(
                    "Delivery of will {} to {} failed: {}",
                    will.id,
                    recipient.name,
                    e
                );
                failures.push((recipient.name.clone(), e));
            }
        }

        match failures.len() {
            0 => {
                log::info!(
                    "Will {} delivered to {} recipient(s)",
                    will.id,
                    will.recipients.len()
                );
                Ok(())
            }
            n => {
                let summary = failures
                    .iter()
                    .map(|(name, e)| format!("{}: {}", name, e))
                    .collect::<Vec<_>>()
                    .join("; ");
                // A bad address stays bad on retry; report it as a rejection.
                if failures
                    .iter()
                    .all(|(_, e)| matches!(e, NotifyError::InvalidAddress(_)))
                {
                    Err(DeliveryError::Rejected(summary))
                } else {
                    Err(DeliveryError::Transport(format!(
                        "{} of {} recipient(s) failed: {}",
                        n,
                        will.recipients.len(),
                        summary
                    )))
                }
            }
        }
    }
}

/// Logs deliveries instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunDelivery;

#[async_trait]
impl DeliveryChannel for DryRunDelivery {
    async fn deliver(&self, will: &Will) -> Result<(), DeliveryError> {
        log::info!(
            "[dry-run] Would deliver will {} to {} recipient(s)",
            will.id,
            will.recipients.len()
        );
        Ok(())
    }
}
