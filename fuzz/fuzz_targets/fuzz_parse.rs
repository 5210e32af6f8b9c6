#![no_main]
use libfuzzer_sys::fuzz_target;
use etree_oxide::parser::XmlPullParser;

fuzz_target!(|data: &[u8]| {
    // Feeding in two uneven chunks must never panic, whatever the bytes
    let Ok(mut parser) = XmlPullParser::new(Some(&["start", "end", "start-ns", "end-ns", "comment", "pi"][..])) else {
        return;
    };
    let split = data.len() / 3;
    for chunk in [&data[..split], &data[split..]] {
        if parser.feed(chunk).is_err() {
            return;
        }
        for _ in parser.read_events() {}
    }
    let _ = parser.close();
});
