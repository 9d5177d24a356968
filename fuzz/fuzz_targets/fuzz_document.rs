//! Fuzz target for source document decoding and anonymization.
//!
//! Arbitrary bytes either fail to decode or anonymize into a record with
//! the same identity and fixed-length tokens.

#![no_main]

use anonymization_engine::{Anonymizer, Customer};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(customer) = Customer::from_json("fuzz", data) else {
        return;
    };

    let anonymized = Anonymizer::default().anonymize(&customer);
    assert_eq!(anonymized.id, customer.id);
    assert_eq!(anonymized.first_name.len(), 8);
    assert_eq!(anonymized.address.postcode.len(), 8);

    // Encoding the result must not fail either
    let _ = anonymized.to_json();
});
