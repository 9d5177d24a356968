// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Deterministic anonymization of customer records.
//!
//! Each sensitive string is replaced by a fixed-length token derived from the
//! SHA-256 digest of the original value:
//!
//! ```text
//! token[i] = ALPHABET[digest[i % 32] % 62]
//! ```
//!
//! The same input always yields the same token, so a reindex over an already
//! synced target rewrites identical documents. The transform reads no
//! external state (no salt, no clock, no RNG).
//!
//! | Field | Treatment |
//! |-------|-----------|
//! | `firstName`, `lastName` | replaced |
//! | `email` | local part replaced (seeded by the full address), `@domain` kept |
//! | `address.line1`, `address.line2`, `address.postcode` | replaced |
//! | `_id`, `createdAt`, `address.city/state/country`, unknown fields | unchanged |

use crate::error::{AnonymizerError, Result};
use crate::record::{Address, Customer};
use sha2::{Digest, Sha256};

/// Output alphabet: `A-Z`, `a-z`, `0-9`.
pub const ALPHABET: &[u8; 62] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Default token length.
pub const DEFAULT_TOKEN_LENGTH: usize = 8;

/// Hash `input` into an alphanumeric token of `length` characters.
///
/// Digest bytes are reused cyclically when `length` exceeds the digest size.
pub fn anonymize_string(input: &str, length: usize) -> String {
    let digest = Sha256::digest(input.as_bytes());
    (0..length)
        .map(|i| {
            let byte = digest[i % digest.len()];
            ALPHABET[byte as usize % ALPHABET.len()] as char
        })
        .collect()
}

/// Replace the local part of an email address.
///
/// The token is seeded by the *full* address so that `jane@a.com` and
/// `jane@b.com` do not collapse onto the same local part. Everything from the
/// first `@` onwards is kept verbatim. A value without `@` is replaced whole.
pub fn anonymize_email(email: &str, length: usize) -> String {
    let token = anonymize_string(email, length);
    match email.split_once('@') {
        Some((_, domain)) => format!("{}@{}", token, domain),
        None => token,
    }
}

/// The record transformer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anonymizer {
    length: usize,
}

impl Default for Anonymizer {
    fn default() -> Self {
        Self {
            length: DEFAULT_TOKEN_LENGTH,
        }
    }
}

impl Anonymizer {
    /// Create a transformer producing tokens of `length` characters.
    pub fn new(length: usize) -> Result<Self> {
        if length == 0 {
            return Err(AnonymizerError::Config(
                "anonymize.length must be at least 1".to_string(),
            ));
        }
        Ok(Self { length })
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Anonymize one customer.
    pub fn anonymize(&self, doc: &Customer) -> Customer {
        let token = |value: &str| anonymize_string(value, self.length);
        Customer {
            id: doc.id.clone(),
            first_name: token(&doc.first_name),
            last_name: token(&doc.last_name),
            email: anonymize_email(&doc.email, self.length),
            address: Address {
                line1: token(&doc.address.line1),
                line2: token(&doc.address.line2),
                postcode: token(&doc.address.postcode),
                city: doc.address.city.clone(),
                state: doc.address.state.clone(),
                country: doc.address.country.clone(),
            },
            created_at: doc.created_at,
            extra: doc.extra.clone(),
        }
    }

    /// Anonymize a batch, preserving order.
    pub fn anonymize_all(&self, docs: &[Customer]) -> Vec<Customer> {
        docs.iter().map(|doc| self.anonymize(doc)).collect()
    }
}
