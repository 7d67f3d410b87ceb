//! Fuzz target for delta parsing and application.
//!
//! The first byte picks how much of the input is the base; the rest is the
//! delta. Application must either fail cleanly or produce exactly the
//! declared target size.

#![no_main]

use libfuzzer_sys::fuzz_target;
use wisp_git::{apply_delta, Delta};

fuzz_target!(|data: &[u8]| {
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let split = (split as usize).min(rest.len());
    let (base, raw) = rest.split_at(split);

    let Ok(delta) = Delta::parse(raw) else {
        return;
    };
    if let Ok(target) = apply_delta(base, &delta) {
        assert_eq!(target.len(), delta.target_len);
    }

    // A computed delta always reproduces its target.
    let computed = Delta::compute(base, raw);
    assert_eq!(apply_delta(base, &computed).ok().as_deref(), Some(raw));
});
