#![no_main]
use flowmeter_core::handshake::{LineKind, REPLY_TOKEN, classify_line};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|line: &str| {
    match classify_line(line) {
        LineKind::Numeric(v) => assert!(v.is_finite()),
        LineKind::ControlReply => assert!(line.trim().starts_with(REPLY_TOKEN)),
        LineKind::Malformed => {}
    }
});
