#![no_main]

use libfuzzer_sys::fuzz_target;
use triage_core::{normalize_error_signature, normalized_error_digest};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let normalized = normalize_error_signature(&raw);
    assert!(!normalized.contains("  "));
    assert!(normalized.chars().all(|ch| ch == ' ' || !ch.is_whitespace()));
    assert_eq!(normalized.trim(), normalized);

    let lines = raw.lines().collect::<Vec<_>>();
    let mut reversed = lines.clone();
    reversed.reverse();
    assert_eq!(
        normalized_error_digest(&lines),
        normalized_error_digest(&reversed)
    );
});
