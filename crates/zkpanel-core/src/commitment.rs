//! Salted SHA-256 commitments over attribute records.
//!
//! This is a plain hash commitment. It hides nothing beyond what a salted
//! digest hides and carries no proof system; SHA-256 is the only scheme used
//! anywhere in the workspace.

use std::collections::BTreeMap;
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::model::AttributeRecord;
use crate::util::attribute_text;

pub const SALT_LEN: usize = 32;

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Salt([u8; SALT_LEN]);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SaltError {
    #[error("salt is not valid hex: {0}")]
    Hex(String),
    #[error("salt must be {SALT_LEN} bytes, got {0}")]
    Length(usize),
}

impl Salt {
    /// Fresh salt from the thread-local CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SALT_LEN];
        rand::rng().fill(&mut bytes);
        Salt(bytes)
    }

    pub fn from_bytes(bytes: [u8; SALT_LEN]) -> Self {
        Salt(bytes)
    }

    pub fn from_hex(raw: &str) -> Result<Self, SaltError> {
        let decoded = hex::decode(raw.trim()).map_err(|e| SaltError::Hex(e.to_string()))?;
        let bytes: [u8; SALT_LEN] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| SaltError::Length(decoded.len()))?;
        Ok(Salt(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Salt").field(&self.to_hex()).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeCommitment {
    pub record_digest: String,
    pub attribute_digests: BTreeMap<String, String>,
    pub salt: String,
}

impl AttributeCommitment {
    /// Recompute the digest of a revealed attribute and compare it with the
    /// committed one.
    pub fn verify_attribute(&self, name: &str, value: &serde_json::Value) -> bool {
        match self.attribute_digests.get(name) {
            Some(expected) => *expected == attribute_digest(name, value, &self.salt),
            None => false,
        }
    }

    /// Recompute the record digest for a fully revealed record.
    pub fn verify_record(&self, record: &AttributeRecord) -> bool {
        record_digest(record, &self.salt) == self.record_digest
    }
}

/// Commit to `record` under `salt`: one digest over the JSON of
/// `{record, salt}` and one digest per attribute over `name:value:salt`.
pub fn commit(record: &AttributeRecord, salt: &Salt) -> AttributeCommitment {
    let salt_hex = salt.to_hex();
    let attribute_digests = record
        .iter()
        .map(|(name, value)| (name.clone(), attribute_digest(name, value, &salt_hex)))
        .collect();
    AttributeCommitment {
        record_digest: record_digest(record, &salt_hex),
        attribute_digests,
        salt: salt_hex,
    }
}

/// Commit under a freshly generated salt.
pub fn commit_fresh(record: &AttributeRecord) -> AttributeCommitment {
    commit(record, &Salt::generate())
}

pub fn digest_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    format!("{:x}", h.finalize())
}

fn record_digest(record: &AttributeRecord, salt_hex: &str) -> String {
    let envelope = json!({ "record": record, "salt": salt_hex });
    digest_hex(envelope.to_string().as_bytes())
}

fn attribute_digest(name: &str, value: &serde_json::Value, salt_hex: &str) -> String {
    let material = format!("{}:{}:{}", name, attribute_text(value), salt_hex);
    digest_hex(material.as_bytes())
}
