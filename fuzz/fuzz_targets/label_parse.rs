//! Fuzz harness for label expression parsing.
//!
//! Any input must parse or fail without panicking. A label that parses must
//! print to text that parses back to the same label.

#![no_main]
use cowl_core::label::Label;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(label) = s.parse::<Label>() else {
        return;
    };

    let printed = label.to_string();
    let reparsed: Label = printed
        .parse()
        .unwrap_or_else(|e| panic!("canonical form {printed:?} does not parse: {e}"));
    assert_eq!(label, reparsed);

    // Conjunction with itself is idempotent.
    assert_eq!(label.and(&label), label);
});
