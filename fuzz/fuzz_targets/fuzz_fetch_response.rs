//! Fuzz target for fetch responses: section walking, side-band demux and pack decoding.

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    let Ok(Some(pack)) = wisp_git::open_packfile(Cursor::new(data)) else {
        return;
    };
    let Ok(reader) = wisp_git::PackReader::new(pack) else {
        return;
    };
    for entry in reader {
        if entry.is_err() {
            break;
        }
    }
});
