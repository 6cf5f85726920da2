//! SMTP email sending

use crate::config::EmailConfig;
use crate::templates::NotificationMessage;
use crate::NotifyError;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

pub(crate) type Mailer = AsyncSmtpTransport<Tokio1Executor>;

/// Send a message to one recipient, retrying transport failures.
///
/// Address and message-building errors are not retried.
pub async fn send_email_to_recipient(
    mailer: &Mailer,
    config: &EmailConfig,
    recipient_email: &str,
    notification: &NotificationMessage,
) -> Result<(), NotifyError> {
    let email = build_message(&config.from_address, recipient_email, notification)?;
    let attempts = config.max_attempts.max(1);

    let mut last_error = String::new();
    for attempt in 1..=attempts {
        match mailer.send(email.clone()).await {
            Ok(_) => {
                log::info!(
                    "Email sent to {} (attempt {}/{})",
                    recipient_email,
                    attempt,
                    attempts
                );
                return Ok(());
            }
            Err(e) => {
                last_error = e.to_string();
                log::warn!(
                    "SMTP send to {} failed (attempt {}/{}): {}",
                    recipient_email,
                    attempt,
                    attempts,
                    last_error
                );
                if attempt < attempts {
                    tokio::time::sleep(config.retry_backoff * attempt).await;
                }
            }
        }
    }

    Err(NotifyError::EmailFailed(format!(
        "SMTP send failed after {} attempts: {}",
        attempts, last_error
    )))
}

/// Build a `lettre::Message` from addresses and notification content.
pub(crate) fn build_message(
    from: &str,
    to: &str,
    notification: &NotificationMessage,
) -> Result<Message, NotifyError> {
    Message::builder()
        .from(
            from.parse()
                .map_err(|e| NotifyError::InvalidAddress(format!("from {}: {}", from, e)))?,
        )
        .to(to
            .parse()
            .map_err(|e| NotifyError::InvalidAddress(format!("to {}: {}", to, e)))?)
        .subject(&notification.subject)
        .body(notification.body.clone())
        .map_err(|e| NotifyError::EmailFailed(format!("Failed to build email: {}", e)))
}

/// Build an async SMTP transport from config.
pub(crate) fn build_async_transport(config: &EmailConfig) -> Result<Mailer, NotifyError> {
    let creds = Credentials::new(config.smtp_user.clone(), config.smtp_password.clone());

    Ok(AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
        .map_err(|e| NotifyError::Config(format!("SMTP relay error: {}", e)))?
        .credentials(creds)
        .port(config.smtp_port)
        .build())
}
