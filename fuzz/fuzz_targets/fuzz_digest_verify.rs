#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use latch_core::HashAlgorithm;

#[derive(Arbitrary, Debug)]
struct Input {
    code: String,
    other: String,
    legacy: bool,
}

fuzz_target!(|input: Input| {
    let algorithm = if input.legacy {
        HashAlgorithm::Legacy
    } else {
        HashAlgorithm::Sha256
    };

    let digest = algorithm.digest(&input.code).unwrap();
    assert!(algorithm.verify(&input.code, &digest));
    assert_eq!(algorithm.verify(&input.other, &digest), input.other == input.code);

    // Treating arbitrary text as a stored digest must not panic
    let _ = HashAlgorithm::Argon2id.verify(&input.code, &input.other);
});
