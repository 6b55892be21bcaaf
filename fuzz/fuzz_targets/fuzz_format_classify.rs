#![no_main]

use libfuzzer_sys::fuzz_target;
use latch_core::PasscodeFormat;

fuzz_target!(|code: &str| {
    let format = PasscodeFormat::classify(code);

    // Numeric formats only for ASCII digits of the exact length
    if let Some(length) = format.length() {
        assert_eq!(code.chars().count(), length);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    // Persisted name reads back to the same format
    let name = serde_json::to_value(format).unwrap();
    let parsed: PasscodeFormat = serde_json::from_value(name).unwrap();
    assert_eq!(parsed, format);
});
