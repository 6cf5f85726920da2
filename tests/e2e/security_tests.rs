//! Security-specific tests.
//!
//! These tests verify:
//! 1. Authentication failures are indistinguishable
//! 2. One-time secrets cannot be replayed
//! 3. Nothing secret reaches storage in plaintext
//! 4. Malformed inputs don't panic

use chrono::Duration;
use rand::{Rng, RngCore};
use willkeep_core::crypto::KEY_LEN;
use willkeep_core::{
    AuthFailure, CredentialVault, Enrollment, LivenessProof, OwnerId, Recipient, Settings,
    VaultKey, VaultSettings, Will, WillError,
};
use willkeep_store::{check_in, CheckInError, SqliteStore, WillStore};

fn vault_with(key: u8, salt: &[u8]) -> CredentialVault {
    let key = VaultKey::from_bytes(&[key; KEY_LEN], salt).unwrap();
    CredentialVault::new(key, VaultSettings::default()).unwrap()
}

fn vault() -> CredentialVault {
    vault_with(0x42, b"willkeep-security-salt")
}

fn new_will(vault: &CredentialVault) -> (Will, Enrollment) {
    Will::create(
        vault,
        OwnerId::new("alice", "alice@example.com"),
        b"the sealed letter".to_vec(),
        Settings::new(Duration::days(30), Duration::days(7)),
        vec![Recipient::new("Bob", "bob@example.com")],
    )
    .unwrap()
}

fn is_auth_failure(result: Result<(), WillError>) -> bool {
    matches!(result, Err(WillError::Auth(AuthFailure)))
}

// ============================================================================
// 1. Indistinguishable failures
// ============================================================================

#[test]
fn test_all_rejections_look_the_same() {
    let vault = vault();
    let (mut will, enrollment) = new_will(&vault);

    let wrong_code = LivenessProof::Otp("000000".into());
    let malformed_key = LivenessProof::Fallback("not hex at all".into());
    let unknown_key = LivenessProof::Fallback(hex::encode([0u8; 16]));

    let errors: Vec<String> = [wrong_code, malformed_key, unknown_key]
        .iter()
        .map(|proof| match will.verify_liveness(&vault, 0, proof) {
            Err(e) => e.to_string(),
            Ok(()) => panic!("bogus proof accepted"),
        })
        .collect();
    assert!(errors.iter().all(|e| e == "authentication failed"));

    // Material sealed under another deployment's key also just fails
    let foreign = vault_with(0x43, b"willkeep-security-salt");
    let code = enrollment.authenticator().next_code().unwrap();
    let err = will
        .verify_liveness(&foreign, 0, &LivenessProof::Otp(code))
        .unwrap_err();
    assert_eq!(err.to_string(), "authentication failed");
}

#[test]
fn test_other_salt_cannot_open_credentials() {
    let vault = vault();
    let (mut will, enrollment) = new_will(&vault);
    let other = vault_with(0x42, b"another-deployment-salt");

    let code = enrollment.authenticator().next_code().unwrap();
    assert!(is_auth_failure(will.verify_liveness(
        &other,
        0,
        &LivenessProof::Otp(code)
    )));
}

// ============================================================================
// 2. Replay
// ============================================================================

#[test]
fn test_fallback_keys_are_single_use() {
    let vault = vault();
    let (mut will, enrollment) = new_will(&vault);

    for (used, key) in enrollment.fallback_keys.iter().enumerate() {
        let proof = LivenessProof::Fallback(key.clone());
        will.verify_liveness(&vault, 0, &proof).unwrap();
        assert_eq!(
            will.owner.credentials[0].remaining_fallback_keys(),
            enrollment.fallback_keys.len() - used - 1
        );
        assert!(is_auth_failure(will.verify_liveness(&vault, 0, &proof)));
    }
}

#[test]
fn test_old_codes_rejected_after_newer_one() {
    let vault = vault();
    let (mut will, enrollment) = new_will(&vault);
    let mut authenticator = enrollment.authenticator();

    let first = authenticator.next_code().unwrap();
    let second = authenticator.next_code().unwrap();

    will.verify_liveness(&vault, 0, &LivenessProof::Otp(second))
        .unwrap();
    assert!(is_auth_failure(will.verify_liveness(
        &vault,
        0,
        &LivenessProof::Otp(first)
    )));
}

#[test]
fn test_code_beyond_tolerance_rejected() {
    let vault = vault();
    let (mut will, enrollment) = new_will(&vault);
    let mut authenticator = enrollment.authenticator();

    let tolerance = vault.settings().otp_tolerance;
    for _ in 0..=tolerance {
        authenticator.next_code().unwrap();
    }
    let too_far = authenticator.next_code().unwrap();
    assert!(is_auth_failure(will.verify_liveness(
        &vault,
        0,
        &LivenessProof::Otp(too_far)
    )));
}

#[test]
fn test_replay_blocked_across_persistence() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = SqliteStore::open(&dir.path().join("wills.db")).unwrap();
    let vault = vault();
    let (will, enrollment) = new_will(&vault);
    store.set_will(&will).unwrap();

    let code = enrollment.authenticator().next_code().unwrap();
    let proof = LivenessProof::Otp(code);
    check_in(&store, &vault, &will.id, 0, &proof).unwrap();

    // Reopen, as after a restart
    drop(store);
    let store = SqliteStore::open(&dir.path().join("wills.db")).unwrap();
    assert!(matches!(
        check_in(&store, &vault, &will.id, 0, &proof),
        Err(CheckInError::Will(WillError::Auth(AuthFailure)))
    ));
}

// ============================================================================
// 3. No plaintext secrets at rest
// ============================================================================

#[test]
fn test_stored_will_has_no_plaintext_secrets() {
    let vault = vault();
    let (will, enrollment) = new_will(&vault);
    let json = serde_json::to_string(&will).unwrap();

    let seed = hex::encode(enrollment.authenticator().secret());
    assert!(!json.contains(&seed));
    for key in &enrollment.fallback_keys {
        assert!(!json.contains(key.as_str()));
    }
}

// ============================================================================
// 4. Malformed input fuzzing
// ============================================================================

#[test]
fn test_random_proofs_never_panic_or_pass() {
    let vault = vault();
    let (mut will, _) = new_will(&vault);
    let mut rng = rand::thread_rng();

    for _ in 0..200 {
        let len = rng.gen_range(0..64);
        let mut bytes = vec![0u8; len];
        rng.fill_bytes(&mut bytes);
        let text = String::from_utf8_lossy(&bytes).into_owned();

        for proof in [
            LivenessProof::Otp(text.clone()),
            LivenessProof::Fallback(text.clone()),
            LivenessProof::Fallback(hex::encode(&bytes)),
        ] {
            assert!(is_auth_failure(will.verify_liveness(&vault, 0, &proof)));
        }
    }
}

#[test]
fn test_tampered_credential_fails_closed() {
    let vault = vault();
    let (mut will, enrollment) = new_will(&vault);
    let last = will.owner.credentials[0].software_token.len() - 1;
    will.owner.credentials[0].software_token[last] ^= 0x01;

    let code = enrollment.authenticator().next_code().unwrap();
    assert!(is_auth_failure(will.verify_liveness(
        &vault,
        0,
        &LivenessProof::Otp(code)
    )));
}
