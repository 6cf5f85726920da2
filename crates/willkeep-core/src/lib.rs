//! willkeep Core
//!
//! The dead-man's-switch domain: a will is released to its recipients
//! unless the owner keeps proving they are alive.
//!
//! # Components
//!
//! - **Credential vault**: HOTP seeds and single-use fallback keys, sealed
//!   with AES-256-GCM under a process-wide [`VaultKey`]
//! - **Will lifecycle**: identity, time-to-delivery (TTD) and refresh
//! - **Delivery contract**: the [`DeliveryChannel`] trait the scheduler calls
//!
//! # Example
//!
//! ```ignore
//! use willkeep_core::{CredentialVault, OwnerId, Recipient, Settings, VaultKey, Will};
//!
//! let vault = CredentialVault::new(VaultKey::from_bytes(&key, &salt)?, Default::default())?;
//! let (will, enrollment) = Will::create(
//!     &vault,
//!     OwnerId::new("alice", "alice@example.com"),
//!     sealed_reference,
//!     Settings::new(Duration::days(30), Duration::days(7)),
//!     vec![Recipient::new("Bob", "bob@example.com")],
//! )?;
//! println!("{}", enrollment.qr);
//! ```

pub mod crypto;
pub mod delivery;
pub mod encoding;
pub mod hotp;
pub mod vault;
pub mod will;

pub use crypto::{CryptoError, VaultKey};
pub use delivery::{DeliveryChannel, DeliveryError};
pub use hotp::Hotp;
pub use vault::{AuthFailure, Credential, CredentialVault, Enrollment, VaultError, VaultSettings};
pub use will::{LivenessProof, OwnerId, Recipient, Settings, Will, WillError, WillStatus};
