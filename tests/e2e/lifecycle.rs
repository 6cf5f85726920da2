//! End-to-end lifecycle tests for willkeep.
//!
//! Exercises the complete release flow without a network:
//!
//! 1. Will creation and owner enrollment
//! 2. Check-in with an authenticator that drifted ahead
//! 3. Missed deadline
//! 4. Dispatch, delivery and purge
//! 5. The same flow against both store backends
//!
//! Run with: cargo test --test lifecycle

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::{Arc, Mutex};
use willkeep_core::crypto::KEY_LEN;
use willkeep_core::{
    CredentialVault, DeliveryChannel, DeliveryError, Enrollment, LivenessProof, OwnerId,
    Recipient, Settings, VaultKey, VaultSettings, Will, WillStatus,
};
use willkeep_dispatch::{DispatchConfig, Scheduler};
use willkeep_notify::templates::generate_release_message;
use willkeep_notify::NotificationMessage;
use willkeep_store::{check_in, MemoryStore, SqliteStore, StoreError, WillStore};

// ============================================================================
// Fixtures
// ============================================================================

/// Renders release messages like the email channel, but keeps them.
#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<(String, Vec<NotificationMessage>)>>,
}

impl Outbox {
    fn sent(&self) -> Vec<(String, Vec<NotificationMessage>)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryChannel for Outbox {
    async fn deliver(&self, will: &Will) -> Result<(), DeliveryError> {
        let messages = will
            .recipients
            .iter()
            .map(|r| generate_release_message(will, r))
            .collect();
        self.sent.lock().unwrap().push((will.id.clone(), messages));
        Ok(())
    }
}

fn vault() -> CredentialVault {
    let key = VaultKey::from_bytes(&[0x77; KEY_LEN], b"willkeep-e2e-salt").unwrap();
    CredentialVault::new(key, VaultSettings::default()).unwrap()
}

fn config() -> DispatchConfig {
    DispatchConfig {
        poll_interval: std::time::Duration::from_millis(50),
        workers: 2,
        queue_depth: 4,
        delivery_timeout: std::time::Duration::from_secs(5),
        error_queue_depth: 16,
    }
}

fn create(store: &dyn WillStore, vault: &CredentialVault, owner: &str) -> (Will, Enrollment) {
    let (will, enrollment) = Will::create(
        vault,
        OwnerId::new(owner, format!("{}@example.com", owner)),
        b"age-encrypted letter".to_vec(),
        Settings::new(Duration::hours(1), Duration::minutes(10)),
        vec![
            Recipient::new("Bob", "bob@example.com").with_key_material("age1bob"),
            Recipient::new("Carol", "carol@example.com"),
        ],
    )
    .unwrap();
    store.set_will(&will).unwrap();
    (will, enrollment)
}

fn expire(store: &dyn WillStore, will_id: &str) {
    let mut will = store.get_will(will_id).unwrap();
    will.time_to_delivery = Utc::now() - Duration::seconds(1);
    store.set_will(&will).unwrap();
}

// ============================================================================
// Full lifecycle
// ============================================================================

async fn run_lifecycle(store: Arc<dyn WillStore>) {
    let vault = vault();
    let outbox = Arc::new(Outbox::default());
    let scheduler = Scheduler::start(Arc::clone(&store), outbox.clone(), &config()).unwrap();

    // 1. Create: nothing is due yet
    let (will, enrollment) = create(store.as_ref(), &vault, "alice");
    assert_eq!(will.status(Utc::now()), WillStatus::Healthy);
    let report = scheduler.run_once().await.unwrap();
    assert_eq!(report.due, 0);

    // 2. Check in with a code three steps ahead of the server
    let mut authenticator = enrollment.authenticator();
    authenticator.next_code().unwrap();
    authenticator.next_code().unwrap();
    let code = authenticator.next_code().unwrap();
    let checked = check_in(
        store.as_ref(),
        &vault,
        &will.id,
        0,
        &LivenessProof::Otp(code.clone()),
    )
    .unwrap();
    assert!(checked.time_to_delivery >= will.time_to_delivery);

    // The same code cannot be used twice
    assert!(check_in(store.as_ref(), &vault, &will.id, 0, &LivenessProof::Otp(code)).is_err());

    // 3. The owner goes silent
    expire(store.as_ref(), &will.id);
    assert_eq!(
        store.get_will(&will.id).unwrap().status(Utc::now()),
        WillStatus::Due
    );

    // 4. Dispatch releases and purges
    let report = scheduler.run_once().await.unwrap();
    assert_eq!(report.due, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.purged, 1);

    let sent = outbox.sent();
    assert_eq!(sent.len(), 1);
    let (id, messages) = &sent[0];
    assert_eq!(id, &will.id);
    assert_eq!(messages.len(), 2);
    assert!(messages[0].body.contains(&hex::encode(&will.delivery_key)));
    assert!(messages[0].body.contains("age1bob"));

    // 5. Gone from storage, delivery log included
    assert!(matches!(
        store.get_will(&will.id),
        Err(StoreError::NotFound(_))
    ));
    assert!(store.delivery_log(&will.id).unwrap().is_empty());

    // 6. Nothing left to do
    let report = scheduler.run_once().await.unwrap();
    assert_eq!(report.due, 0);
    assert_eq!(outbox.sent().len(), 1);

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_full_lifecycle_memory_store() {
    run_lifecycle(Arc::new(MemoryStore::new())).await;
}

#[tokio::test]
async fn test_full_lifecycle_sqlite_store() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = SqliteStore::open(&dir.path().join("willkeep.db")).unwrap();
    run_lifecycle(Arc::new(store)).await;
}

// ============================================================================
// Check-in keeps a will alive
// ============================================================================

#[tokio::test]
async fn test_check_in_cancels_pending_release() {
    let store: Arc<dyn WillStore> = Arc::new(MemoryStore::new());
    let vault = vault();
    let outbox = Arc::new(Outbox::default());
    let scheduler = Scheduler::start(Arc::clone(&store), outbox.clone(), &config()).unwrap();

    let (will, enrollment) = create(store.as_ref(), &vault, "alice");
    expire(store.as_ref(), &will.id);

    // A fallback key works even after the deadline, as long as dispatch
    // has not run yet.
    let proof = LivenessProof::from_parts(None, Some(&enrollment.fallback_keys[0])).unwrap();
    let refreshed = check_in(store.as_ref(), &vault, &will.id, 0, &proof).unwrap();
    assert!(refreshed.time_to_delivery > Utc::now());
    assert_eq!(refreshed.owner.credentials[0].remaining_fallback_keys(), 3);

    let report = scheduler.run_once().await.unwrap();
    assert_eq!(report.due, 0);
    assert!(outbox.sent().is_empty());
    assert!(store.get_will(&will.id).is_ok());

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_only_overdue_wills_are_released() {
    let store: Arc<dyn WillStore> = Arc::new(MemoryStore::new());
    let vault = vault();
    let outbox = Arc::new(Outbox::default());
    let scheduler = Scheduler::start(Arc::clone(&store), outbox.clone(), &config()).unwrap();

    let (silent, _) = create(store.as_ref(), &vault, "alice");
    let (active, _) = create(store.as_ref(), &vault, "bob");
    let (disabled, _) = create(store.as_ref(), &vault, "carol");
    expire(store.as_ref(), &silent.id);
    expire(store.as_ref(), &disabled.id);
    let mut d = store.get_will(&disabled.id).unwrap();
    d.set_disabled(true);
    store.set_will(&d).unwrap();

    let report = scheduler.run_once().await.unwrap();
    assert_eq!(report.due, 1);

    let sent: Vec<String> = outbox.sent().into_iter().map(|(id, _)| id).collect();
    assert_eq!(sent, vec![silent.id.clone()]);
    assert!(store.get_will(&active.id).is_ok());
    assert!(store.get_will(&disabled.id).is_ok());

    scheduler.shutdown().await;
}

// ============================================================================
// Background loop
// ============================================================================

#[tokio::test]
async fn test_background_scheduler_releases_on_its_own() {
    let store: Arc<dyn WillStore> = Arc::new(MemoryStore::new());
    let vault = vault();
    let outbox = Arc::new(Outbox::default());
    let scheduler = Scheduler::start(Arc::clone(&store), outbox.clone(), &config()).unwrap();

    let (will, _) = create(store.as_ref(), &vault, "alice");
    expire(store.as_ref(), &will.id);

    // Let the loop tick a few times
    let _ = tokio::time::timeout(std::time::Duration::from_millis(300), scheduler.run()).await;
    for _ in 0..100 {
        if !scheduler.gate().is_busy() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    assert_eq!(outbox.sent().len(), 1);
    assert!(store.get_will(&will.id).is_err());
    scheduler.shutdown().await;
}

// ============================================================================
// Deadline arithmetic
// ============================================================================

#[test]
fn test_refresh_counts_from_its_own_now() {
    let vault = vault();
    let settings = Settings {
        extension_unit: Duration::seconds(3),
        delivery_offset: Duration::seconds(3),
        disable_offset: true,
        notify_deadline: false,
    };
    let (mut will, _) = Will::create(
        &vault,
        OwnerId::new("alice", "alice@example.com"),
        b"letter".to_vec(),
        settings,
        Vec::new(),
    )
    .unwrap();

    let initial = will.time_to_delivery - will.creation;
    assert!((initial - Duration::seconds(3)).num_milliseconds().abs() <= 1);

    std::thread::sleep(std::time::Duration::from_micros(500));
    will.refresh().unwrap();
    assert_eq!(will.time_to_delivery - will.last_ping, Duration::seconds(3));
    assert!(will.last_ping > will.creation);
}
