// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Customer records as stored in the source and target collections.
//!
//! Documents are JSON objects with camelCase field names and the identity in
//! `_id`. Fields the schema does not know about are carried through untouched
//! in [`Customer::extra`], so the target always receives the full document.

use crate::error::{AnonymizerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Postal address nested inside a customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub line1: String,
    pub line2: String,
    pub postcode: String,
    pub city: String,
    pub state: String,
    pub country: String,
}

/// A customer document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    /// Identity. Unique and immutable; used as the upsert key in the target.
    #[serde(rename = "_id")]
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub address: Address,
    pub created_at: DateTime<Utc>,
    /// Unknown top-level fields, preserved verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Customer {
    /// Decode a source document.
    ///
    /// `id` is the identity the document was looked up by; it is only used
    /// to label the error when the payload does not match the schema.
    pub fn from_json(id: &str, bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| AnonymizerError::transform(id, e.to_string()))
    }

    /// Encode for storage in the target.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| AnonymizerError::transform(&self.id, e.to_string()))
    }
}
