#![no_main]

use libfuzzer_sys::fuzz_target;
use serde_json::Value;
use sketch_history::{Delta, JsonDiff, StructuralDiff};

fuzz_target!(|data: &[u8]| {
    // Split the input into two JSON documents at the first 0xFF byte.
    let Some(split) = data.iter().position(|&b| b == 0xFF) else {
        return;
    };
    let (Ok(a), Ok(b)) = (
        serde_json::from_slice::<Value>(&data[..split]),
        serde_json::from_slice::<Value>(&data[split + 1..]),
    ) else {
        return;
    };

    let d = JsonDiff.diff(&a, &b);
    assert_eq!(JsonDiff.patch(&a, &d).expect("forward patch"), b);
    assert_eq!(JsonDiff.unpatch(&b, &d).expect("backward patch"), a);

    // Arbitrary deltas may be rejected but must never panic.
    let _ = JsonDiff.patch(&a, &Delta::from_value(b.clone()));
    let _ = JsonDiff.unpatch(&b, &Delta::from_value(a));
});
