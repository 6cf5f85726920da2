//! Email delivery configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Email (SMTP) configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// SMTP server hostname
    pub smtp_host: String,
    /// SMTP port (typically 587 for TLS)
    pub smtp_port: u16,
    /// SMTP username
    pub smtp_user: String,
    /// SMTP password
    pub smtp_password: String,
    /// Sender email address
    pub from_address: String,
    /// Send attempts per recipient before giving up
    pub max_attempts: u32,
    /// Wait between attempts, multiplied by the attempt number
    pub retry_backoff: Duration,
}

impl EmailConfig {
    /// Create a new email config
    pub fn new(
        smtp_host: impl Into<String>,
        smtp_user: impl Into<String>,
        smtp_password: impl Into<String>,
        from_address: impl Into<String>,
    ) -> Self {
        Self {
            smtp_host: smtp_host.into(),
            smtp_port: 587,
            smtp_user: smtp_user.into(),
            smtp_password: smtp_password.into(),
            from_address: from_address.into(),
            max_attempts: 3,
            retry_backoff: Duration::from_secs(2),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.smtp_port = port;
        self
    }

    pub fn with_retries(mut self, max_attempts: u32, retry_backoff: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.retry_backoff = retry_backoff;
        self
    }
}

impl fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailConfig")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_user", &self.smtp_user)
            .field("smtp_password", &"<redacted>")
            .field("from_address", &self.from_address)
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff", &self.retry_backoff)
            .finish()
    }
}
