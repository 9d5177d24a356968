//! Fuzz target for change stream entry parsing.
//!
//! Entries are written by another application; arbitrary IDs and field
//! bytes must produce an error, never a panic.

#![no_main]

use anonymization_engine::feed::parse_entry;
use libfuzzer_sys::fuzz_target;
use std::collections::HashMap;

fuzz_target!(|data: (&str, Option<&[u8]>, Option<&[u8]>)| {
    let (stream_id, op, id) = data;

    let mut fields = HashMap::new();
    if let Some(op) = op {
        fields.insert("op".to_string(), redis::Value::BulkString(op.to_vec()));
    }
    if let Some(id) = id {
        fields.insert("id".to_string(), redis::Value::BulkString(id.to_vec()));
    }

    if let Ok(entry) = parse_entry(stream_id, &fields) {
        assert!(!entry.id.is_empty());
    }
});
