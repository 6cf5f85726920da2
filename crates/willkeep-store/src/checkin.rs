//! Owner check-in: verify a liveness proof, then push the deadline out.

use crate::{StoreError, WillStore};
use thiserror::Error;
use willkeep_core::{CredentialVault, LivenessProof, Will, WillError};

/// Errors from a check-in
#[derive(Error, Debug)]
pub enum CheckInError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Will(#[from] WillError),
}

/// Verify `proof` against the will's credential at `credential_index`,
/// refresh the deadline and persist.
///
/// The advanced credential is persisted as soon as the proof is accepted,
/// even if the refresh then fails validation, so a consumed code or
/// fallback key can never be replayed. A rejected proof persists nothing.
/// A successful check-in also cancels a pending (not yet completed) release.
///
/// Verification runs against the stored copy inside one atomic update, so
/// a concurrent writer can neither roll the credential back nor lose the
/// refreshed deadline.
pub fn check_in(
    store: &dyn WillStore,
    vault: &CredentialVault,
    will_id: &str,
    credential_index: usize,
    proof: &LivenessProof,
) -> Result<Will, CheckInError> {
    let mut failure: Option<WillError> = None;
    let written = store.update_will(will_id, &mut |will| {
        if will.exhausted {
            failure = Some(WillError::Validation(format!(
                "will {} was already delivered",
                will_id
            )));
            return false;
        }
        if let Err(e) = will.verify_liveness(vault, credential_index, proof) {
            failure = Some(e);
            return false;
        }
        match will.refresh() {
            Ok(()) => will.deliverable = false,
            Err(e) => failure = Some(e),
        }
        true
    })?;

    if let Some(e) = failure {
        return Err(e.into());
    }
    let will = written.ok_or_else(|| StoreError::NotFound(will_id.to_string()))?;

    log::info!(
        "Will {} checked in; next delivery at {}",
        will.id,
        will.time_to_delivery
    );
    Ok(will)
}
