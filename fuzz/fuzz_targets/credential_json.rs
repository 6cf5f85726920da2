#![no_main]

use libfuzzer_sys::fuzz_target;
use willkeep_core::crypto::KEY_LEN;
use willkeep_core::{Credential, CredentialVault, VaultKey, VaultSettings, Will};

fuzz_target!(|data: &[u8]| {
    // Stored records come back through serde; corrupt rows must fail
    // cleanly, and a corrupt credential must fail verification cleanly.
    let _ = serde_json::from_slice::<Will>(data);

    if let Ok(credential) = serde_json::from_slice::<Credential>(data) {
        let Ok(key) = VaultKey::from_bytes(&[0x5A; KEY_LEN], b"willkeep-fuzz-salt") else {
            return;
        };
        if let Ok(vault) = CredentialVault::new(key, VaultSettings::default()) {
            let _ = vault.verify_otp("123456", &credential);
            let _ = vault.verify_fallback_key("00112233445566778899aabbccddeeff", &credential);
        }
    }
});
