//! Fuzz target: `LineDecoder::feed`
//!
//! Splits arbitrary input at a fuzzer-chosen point, feeds both halves, and
//! checks that no yielded line carries a terminator or outgrows the buffer.
//!
//! cargo fuzz run fuzz_line_decoder

#![no_main]

use cetus_pcr::link::codec::{LineDecoder, MAX_LINE_LEN};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let at = usize::from(split).min(rest.len());
    let (a, b) = rest.split_at(at);

    let mut decoder = LineDecoder::new();
    decoder.feed(a);
    decoder.feed(b);
    while let Some(line) = decoder.next_line() {
        assert!(!line.contains('\n'));
        assert!(line.len() <= MAX_LINE_LEN * 3);
    }

    // One terminator resynchronises the stream after any garbage.
    decoder.feed(b"\nnextpls\r\n");
    let mut last = None;
    while let Some(line) = decoder.next_line() {
        last = Some(line);
    }
    assert_eq!(last.as_deref(), Some("nextpls"));
});
