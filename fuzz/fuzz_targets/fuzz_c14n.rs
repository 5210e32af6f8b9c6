#![no_main]
use libfuzzer_sys::fuzz_target;
use etree_oxide::serial::c14n::{canonicalize_bytes, canonicalize_str, C14nOptions};

fuzz_target!(|data: &[u8]| {
    let options = C14nOptions::default().with_comments(true);
    // Canonical output is a fixed point
    if let Ok(once) = canonicalize_bytes(data, &options) {
        let twice = canonicalize_str(&once, &options).unwrap();
        assert_eq!(once, twice);
    }
});
