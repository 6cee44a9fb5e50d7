#![no_main]

//! Fuzz target for queue snapshot decoding.
//!
//! A snapshot read back from disk may be truncated or corrupted. Decoding
//! must reject it with an error, never panic, and anything it accepts must
//! encode and decode to the same snapshot.

use beacon_core::QueueSnapshot;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(blob) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(snapshot) = QueueSnapshot::decode(blob) else {
        return;
    };

    // Non-finite floats cannot be produced by JSON, so re-encoding succeeds.
    let encoded = snapshot.encode().expect("decoded snapshot re-encodes");
    let decoded = QueueSnapshot::decode(&encoded).expect("encoded snapshot decodes");
    assert_eq!(decoded, snapshot, "snapshot changed across a round trip");
});
