#![no_main]

use libfuzzer_sys::fuzz_target;
use latch_core::Credential;

fuzz_target!(|data: &[u8]| {
    // Arbitrary store contents must never panic the parser
    if let Ok(credential) = serde_json::from_slice::<Credential>(data) {
        // Matching against garbage digests should not panic either
        let _ = credential.matches("1234");
        let _ = credential.matches("");

        let value = serde_json::to_value(&credential).unwrap();
        let reparsed: Credential = serde_json::from_value(value).unwrap();
        assert_eq!(reparsed, credential);
    }
});
