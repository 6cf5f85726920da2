#![no_main]

use libfuzzer_sys::fuzz_target;
use willkeep_core::crypto::KEY_LEN;
use willkeep_core::VaultKey;

fuzz_target!(|data: &[u8]| {
    // Opening arbitrary bytes as sealed material must return Err, never panic.
    if let Ok(key) = VaultKey::from_bytes(&[0x5A; KEY_LEN], b"willkeep-fuzz-salt") {
        assert!(key.open(data).is_err());
    }
});
