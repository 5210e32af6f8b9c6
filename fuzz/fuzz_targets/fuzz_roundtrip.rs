#![no_main]
use libfuzzer_sys::fuzz_target;
use etree_oxide::parser::fromstring;
use etree_oxide::serial::{tostring, WriteOptions};

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Anything that parses must serialize to something that parses again
        if let Ok(doc) = fromstring(s) {
            let Some(root) = doc.root() else { return };
            let output = tostring(&doc, root, &WriteOptions::default()).unwrap();
            fromstring(&output).unwrap();
        }
    }
});
