//! Fuzz target for tree payload parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(entries) = wisp_storage::parse_tree(data) {
        // Whatever parses must survive a re-encode.
        let encoded = wisp_storage::encode_tree(&entries);
        let reparsed = wisp_storage::parse_tree(&encoded).expect("re-encoded tree must parse");
        assert_eq!(reparsed, entries);
    }
});
