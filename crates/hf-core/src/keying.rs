//! Surrogate keys and content fingerprints
//!
//! Both are SHA-256 digests over the canonical encoding of an ordered list of
//! attribute values (see [`Value::write_canonical`]). The surrogate key covers
//! the key attributes only, so it is stable under payload changes; the
//! fingerprint covers the tracked attributes only, so metadata columns left
//! out of the configuration never register as a change.

use crate::error::{CoreError, CoreResult};
use crate::value::{Row, Value, VALUE_SEPARATOR};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Compute SHA256 checksum of a string
pub fn compute_checksum(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    let result = hasher.finalize();
    format!("{:x}", result)
}

/// Hash an ordered sequence of values.
pub fn hash_values<'a, I>(values: I) -> String
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut buf = String::new();
    for (i, value) in values.into_iter().enumerate() {
        if i > 0 {
            buf.push(VALUE_SEPARATOR);
        }
        value.write_canonical(&mut buf);
    }
    compute_checksum(&buf)
}

/// Identifier of one historical version: the surrogate key plus the instant
/// the version became valid.
pub fn scd_id(surrogate_key: &str, valid_from: DateTime<Utc>) -> String {
    compute_checksum(&format!(
        "{}{}{}",
        surrogate_key,
        VALUE_SEPARATOR,
        valid_from.timestamp_micros()
    ))
}

/// An incoming row with its identity and content hashes attached
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedRow {
    /// Position of the row in the batch (for error reporting)
    pub index: usize,
    /// Hash over the key attributes
    pub surrogate_key: String,
    /// Hash over the tracked attributes
    pub fingerprint: String,
    /// The row as received
    pub row: Row,
}

/// Computes surrogate keys and fingerprints for one snapshot configuration
#[derive(Debug, Clone)]
pub struct Keyer {
    key_attributes: Vec<String>,
    tracked_attributes: Vec<String>,
    allow_null_keys: bool,
}

impl Keyer {
    /// Create a keyer over the given attribute lists.
    ///
    /// Attribute order is significant and must stay fixed across runs.
    pub fn new(
        key_attributes: Vec<String>,
        tracked_attributes: Vec<String>,
        allow_null_keys: bool,
    ) -> Self {
        Self {
            key_attributes,
            tracked_attributes,
            allow_null_keys,
        }
    }

    /// Key attributes in hashing order
    pub fn key_attributes(&self) -> &[String] {
        &self.key_attributes
    }

    /// Tracked attributes in hashing order
    pub fn tracked_attributes(&self) -> &[String] {
        &self.tracked_attributes
    }

    /// Surrogate key of a row.
    ///
    /// Fails with [`CoreError::MissingKeyAttribute`] when a key attribute is
    /// absent. Null key values hash to the null sentinel.
    pub fn surrogate_key(&self, row: &Row) -> CoreResult<String> {
        let mut values = Vec::with_capacity(self.key_attributes.len());
        for attribute in &self.key_attributes {
            let value = row
                .get(attribute)
                .ok_or_else(|| CoreError::MissingKeyAttribute {
                    attribute: attribute.clone(),
                })?;
            values.push(value);
        }
        Ok(hash_values(values))
    }

    /// Fingerprint of a row's tracked attributes; absent attributes count as null.
    pub fn fingerprint(&self, row: &Row) -> String {
        hash_values(
            self.tracked_attributes
                .iter()
                .map(|attribute| row.get(attribute).unwrap_or(&Value::Null)),
        )
    }

    /// Validate and hash one incoming row.
    ///
    /// Beyond [`Keyer::surrogate_key`], rejects null key values with
    /// [`CoreError::NullKeyAttribute`] unless null keys are allowed.
    pub fn key_row(&self, index: usize, row: Row) -> CoreResult<KeyedRow> {
        let surrogate_key = self.surrogate_key(&row)?;
        if !self.allow_null_keys {
            if let Some(attribute) = self
                .key_attributes
                .iter()
                .find(|a| row.get(*a).is_some_and(Value::is_null))
            {
                return Err(CoreError::NullKeyAttribute {
                    attribute: attribute.clone(),
                });
            }
        }
        let fingerprint = self.fingerprint(&row);
        Ok(KeyedRow {
            index,
            surrogate_key,
            fingerprint,
            row,
        })
    }
}

#[cfg(test)]
#[path = "keying_test.rs"]
mod tests;
