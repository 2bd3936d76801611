//! Fuzz target for pointer-file parsing.
//!
//! Parsing must never panic, and anything that parses must format to a
//! value that parses back to the same text.

#![no_main]

use anon_replication_engine::checkpoint::{format_checkpoint, parse_checkpoint};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    let Ok(ts) = parse_checkpoint(data) else {
        return;
    };

    let text = format_checkpoint(&ts);
    if let Ok(again) = parse_checkpoint(&text) {
        assert_eq!(format_checkpoint(&again), text);
        assert!(again <= ts);
    }
});
