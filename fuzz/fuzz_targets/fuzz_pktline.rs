//! Fuzz target for pkt-line parsing.
//!
//! Tests that the pkt-line reader handles arbitrary input without panicking
//! and that every packet it accepts encodes back to the same bytes.

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    let mut reader = wisp_git::PktLineReader::new(Cursor::new(data));

    // Bounded so crafted input cannot loop forever.
    for _ in 0..100 {
        match reader.read() {
            Ok(Some(pkt)) => {
                let encoded = pkt.encode().expect("accepted packet must encode");
                let mut again = wisp_git::PktLineReader::new(Cursor::new(encoded));
                assert_eq!(again.read().ok().flatten(), Some(pkt));
            }
            Ok(None) | Err(_) => break,
        }
    }
});
