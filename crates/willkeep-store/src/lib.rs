//! willkeep Storage Gateway
//!
//! Persistence of wills and their delivery log behind the [`WillStore`]
//! trait, so the dispatch scheduler and tests can swap backends without
//! global state.
//!
//! # Backends
//!
//! - [`SqliteStore`]: durable, one connection per session
//! - [`MemoryStore`]: process-local, for tests and dry runs
//!
//! # Sessions
//!
//! A store handle is long-lived. Each concurrent unit of work calls
//! [`WillStore::checkout`] to get its own session and drops it when done.

mod checkin;
mod memory;
mod sqlite;

pub use checkin::{check_in, CheckInError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use willkeep_core::Will;

/// Errors from storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Will not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// One delivery attempt, successful or not
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub will_id: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

impl DeliveryRecord {
    pub fn success(will_id: impl Into<String>) -> Self {
        Self {
            will_id: will_id.into(),
            timestamp: Utc::now(),
            success: true,
            error: None,
        }
    }

    pub fn failure(will_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            will_id: will_id.into(),
            timestamp: Utc::now(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Abstract persistence of wills.
///
/// Dropping a session closes it.
pub trait WillStore: Send + Sync {
    /// Fetch a will by id.
    fn get_will(&self, id: &str) -> Result<Will, StoreError>;

    /// Insert or replace a will, keyed by id.
    fn set_will(&self, will: &Will) -> Result<(), StoreError>;

    /// Read the current stored copy of a will, let `update` modify it and
    /// write it back, as one atomic step against every other session.
    ///
    /// Nothing is written when `update` returns false. Returns the will as
    /// written, or `None` if the update was declined.
    fn update_will(
        &self,
        id: &str,
        update: &mut dyn FnMut(&mut Will) -> bool,
    ) -> Result<Option<Will>, StoreError>;

    /// Delete a will by id.
    fn remove_will(&self, id: &str) -> Result<(), StoreError>;

    /// All wills belonging to `owner_name`.
    fn get_wills_by_owner(&self, owner_name: &str) -> Result<Vec<Will>, StoreError>;

    /// Snapshot of wills with TTD strictly before `now` that are neither
    /// disabled nor exhausted.
    fn get_due(&self, now: DateTime<Utc>) -> Result<Vec<Will>, StoreError>;

    /// Purge every exhausted will together with its delivery log. Returns
    /// how many wills were removed; zero is not an error.
    fn remove_exhausted(&self) -> Result<usize, StoreError>;

    /// Append to the delivery log.
    fn record_delivery(&self, record: &DeliveryRecord) -> Result<(), StoreError>;

    /// Delivery attempts for one will, oldest first.
    fn delivery_log(&self, will_id: &str) -> Result<Vec<DeliveryRecord>, StoreError>;

    /// Open an independent session on the same backing store.
    fn checkout(&self) -> Result<Box<dyn WillStore>, StoreError>;
}

#[cfg(test)]
pub(crate) mod test_utils {
    //! Shared fixtures for the backend test suites.

    use super::*;
    use chrono::Duration;
    use willkeep_core::crypto::KEY_LEN;
    use willkeep_core::{
        CredentialVault, Enrollment, OwnerId, Recipient, Settings, VaultKey, VaultSettings,
    };

    pub fn test_vault() -> CredentialVault {
        let key = VaultKey::from_bytes(&[0x5A; KEY_LEN], b"willkeep-store-salt").unwrap();
        CredentialVault::new(key, VaultSettings::default()).unwrap()
    }

    pub fn make_will(vault: &CredentialVault, owner: &str) -> (Will, Enrollment) {
        Will::create(
            vault,
            OwnerId::new(owner, format!("{}@example.com", owner)),
            b"sealed reference".to_vec(),
            Settings::new(Duration::hours(1), Duration::minutes(10)),
            vec![Recipient::new("Heir", "heir@example.com")],
        )
        .unwrap()
    }

    /// Contract every backend must satisfy.
    pub fn exercise_store(store: &dyn WillStore) {
        let vault = test_vault();
        let (mut overdue, _) = make_will(&vault, "alice");
        let (future, _) = make_will(&vault, "alice");
        let (mut disabled, _) = make_will(&vault, "bob");

        let now = Utc::now();
        overdue.time_to_delivery = now - Duration::seconds(5);
        disabled.time_to_delivery = now - Duration::seconds(5);
        disabled.set_disabled(true);

        for will in [&overdue, &future, &disabled] {
            store.set_will(will).unwrap();
        }

        // get / upsert
        assert_eq!(store.get_will(&future.id).unwrap(), future);
        let mut updated = future.clone();
        updated.refresh().unwrap();
        store.set_will(&updated).unwrap();
        assert_eq!(
            store.get_will(&future.id).unwrap().time_to_delivery,
            updated.time_to_delivery
        );
        assert!(matches!(
            store.get_will("missing"),
            Err(StoreError::NotFound(_))
        ));

        // by owner
        assert_eq!(store.get_wills_by_owner("alice").unwrap().len(), 2);
        assert_eq!(store.get_wills_by_owner("bob").unwrap().len(), 1);
        assert!(store.get_wills_by_owner("nobody").unwrap().is_empty());

        // due: strictly before now, not disabled
        let due = store.get_due(now).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, overdue.id);
        assert!(store
            .get_due(overdue.time_to_delivery)
            .unwrap()
            .is_empty());

        // purge with nothing exhausted is a no-op
        assert_eq!(store.remove_exhausted().unwrap(), 0);
        assert_eq!(store.remove_exhausted().unwrap(), 0);

        // exhausted wills drop out of the due set and get purged
        overdue.mark_exhausted();
        store.set_will(&overdue).unwrap();
        assert!(store.get_due(now).unwrap().is_empty());
        assert_eq!(store.remove_exhausted().unwrap(), 1);
        assert!(matches!(
            store.get_will(&overdue.id),
            Err(StoreError::NotFound(_))
        ));

        // atomic update: declined writes nothing, accepted writes through
        let before = store.get_will(&future.id).unwrap();
        let declined = store
            .update_will(&future.id, &mut |w| {
                w.set_disabled(true);
                false
            })
            .unwrap();
        assert!(declined.is_none());
        assert_eq!(store.get_will(&future.id).unwrap(), before);

        let written = store
            .update_will(&future.id, &mut |w| {
                w.mark_deliverable();
                true
            })
            .unwrap()
            .unwrap();
        assert!(written.deliverable);
        assert_eq!(written.time_to_delivery, before.time_to_delivery);
        assert_eq!(store.get_will(&future.id).unwrap(), written);
        assert!(matches!(
            store.update_will("missing", &mut |_| true),
            Err(StoreError::NotFound(_))
        ));

        // delivery log
        store
            .record_delivery(&DeliveryRecord::failure(&future.id, "smtp down"))
            .unwrap();
        store
            .record_delivery(&DeliveryRecord::success(&future.id))
            .unwrap();
        let log = store.delivery_log(&future.id).unwrap();
        assert_eq!(log.len(), 2);
        assert!(!log[0].success);
        assert_eq!(log[0].error.as_deref(), Some("smtp down"));
        assert!(log[1].success);

        // purging a will drops its log with it
        let mut spent = store.get_will(&future.id).unwrap();
        spent.mark_exhausted();
        store.set_will(&spent).unwrap();
        assert_eq!(store.remove_exhausted().unwrap(), 1);
        assert!(store.delivery_log(&future.id).unwrap().is_empty());

        // sessions see the same data
        let session = store.checkout().unwrap();
        assert_eq!(session.get_will(&disabled.id).unwrap(), disabled);
        session.remove_will(&disabled.id).unwrap();
        drop(session);
        assert!(matches!(
            store.get_will(&disabled.id),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.remove_will(&disabled.id),
            Err(StoreError::NotFound(_))
        ));
    }
}
