//! Delivery channel contract.
//!
//! The dispatch scheduler hands each due will to a [`DeliveryChannel`]. What
//! "delivery" means (email, chat, webhook) is up to the implementation, as
//! are transport-level retries. The scheduler only distinguishes success
//! from failure, and bounds every attempt with its own timeout.

use crate::will::Will;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors from a single will's delivery attempt
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// The attempt did not finish within the scheduler's deadline
    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),

    /// The outbound transport failed (after its own retries)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The will cannot be delivered as-is (bad address, template failure)
    #[error("Delivery rejected: {0}")]
    Rejected(String),
}

/// Ships a released will to its recipients.
///
/// Implementations should tolerate being invoked twice for the same will:
/// a crash between a successful send and persisting the exhausted flag
/// causes a redelivery on the next cycle.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn deliver(&self, will: &Will) -> Result<(), DeliveryError>;
}
