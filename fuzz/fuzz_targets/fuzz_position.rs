//! Fuzz target for stream position parsing and ordering.
//!
//! Parsing never panics, ordering stays antisymmetric, and lag never
//! underflows, for arbitrary checkpoint tokens.

#![no_main]

use anonymization_engine::Position;
use libfuzzer_sys::fuzz_target;
use std::cmp::Ordering;

fuzz_target!(|data: (&str, &str)| {
    let (a, b) = data;

    // Should never panic
    let (Ok(a), Ok(b)) = (a.parse::<Position>(), b.parse::<Position>()) else {
        return;
    };

    match a.cmp(&b) {
        Ordering::Less => assert_eq!(b.cmp(&a), Ordering::Greater),
        Ordering::Greater => assert_eq!(b.cmp(&a), Ordering::Less),
        Ordering::Equal => assert_eq!(a.to_string(), b.to_string()),
    }

    // Canonical form parses back to the same position
    assert_eq!(a.to_string().parse::<Position>().ok(), Some(a));

    let _ = a.lag_ms(&b);
    let _ = b.lag_ms(&a);
});
