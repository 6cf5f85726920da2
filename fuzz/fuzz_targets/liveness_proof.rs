#![no_main]

use libfuzzer_sys::fuzz_target;
use willkeep_core::crypto::KEY_LEN;
use willkeep_core::{CredentialVault, VaultKey, VaultSettings};

fuzz_target!(|data: &[u8]| {
    // Arbitrary codes and fallback keys against a real credential: the
    // vault must reject them without panicking.
    let Ok(key) = VaultKey::from_bytes(&[0x5A; KEY_LEN], b"willkeep-fuzz-salt") else {
        return;
    };
    let Ok(vault) = CredentialVault::new(key, VaultSettings::default()) else {
        return;
    };
    let Ok((credential, _)) = vault.issue("fuzz") else {
        return;
    };

    if let Ok(s) = std::str::from_utf8(data) {
        let _ = vault.verify_otp(s, &credential);
        let _ = vault.verify_fallback_key(s, &credential);
    }
});
