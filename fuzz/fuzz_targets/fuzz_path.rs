#![no_main]
use libfuzzer_sys::fuzz_target;
use etree_oxide::parser::fromstring;

fuzz_target!(|data: &[u8]| {
    if let Ok(expr) = std::str::from_utf8(data) {
        if let Ok(doc) = fromstring(r#"<root><child attr="val">text<leaf/></child><child/></root>"#) {
            if let Some(root) = doc.root() {
                // Path evaluation should never panic on any expression
                let _ = doc.findall(root, expr, None);
            }
        }
    }
});
