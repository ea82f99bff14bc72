//! Content digests.
//!
//! - [`ArtifactDigest`]: the content address of a built artifact (`sha256:<hex>`)
//! - [`canonical_json`] / [`compute_digest`]: stable SHA-256 over JSON values,
//!   used to fingerprint the severity policy a run was gated with

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const SHA256_PREFIX: &str = "sha256:";

/// Errors produced when parsing a digest string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DigestError {
    #[error("unsupported digest algorithm in '{0}' (expected sha256)")]
    UnsupportedAlgorithm(String),

    #[error("invalid digest hex: '{0}'")]
    InvalidHex(String),
}

/// Content address of an artifact.
///
/// Always `sha256:` followed by 64 lowercase hex characters. The inner field is
/// private so every value is either computed from bytes or validated on parse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactDigest(String);

impl ArtifactDigest {
    /// Compute the digest of raw bytes.
    pub fn of_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(format!("{}{}", SHA256_PREFIX, hex::encode(hasher.finalize())))
    }

    /// Full `sha256:<hex>` form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex part without the algorithm prefix.
    pub fn hex(&self) -> &str {
        &self.0[SHA256_PREFIX.len()..]
    }

    /// Short form (first 12 hex chars), for logs.
    pub fn short(&self) -> &str {
        &self.hex()[..12]
    }
}

impl FromStr for ArtifactDigest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = match s.split_once(':') {
            Some(("sha256", rest)) => rest,
            Some(_) => return Err(DigestError::UnsupportedAlgorithm(s.to_string())),
            // Bare hex is accepted and normalised.
            None => s,
        };
        if hex_part.len() != 64 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DigestError::InvalidHex(s.to_string()));
        }
        Ok(Self(format!(
            "{}{}",
            SHA256_PREFIX,
            hex_part.to_ascii_lowercase()
        )))
    }
}

impl TryFrom<String> for ArtifactDigest {
    type Error = DigestError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ArtifactDigest> for String {
    fn from(d: ArtifactDigest) -> Self {
        d.0
    }
}

impl fmt::Display for ArtifactDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Recursively sort object keys so serialisation order is stable.
fn sort_keys(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.clone(), sort_keys(v));
                }
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.iter().map(sort_keys).collect())
        }
        other => other.clone(),
    }
}

/// Compact JSON with sorted object keys. Array order is preserved.
pub fn canonical_json(value: &serde_json::Value) -> serde_json::Result<String> {
    serde_json::to_string(&sort_keys(value))
}

/// SHA-256 hex digest of the canonical JSON form of `value`.
pub fn compute_digest(value: &serde_json::Value) -> serde_json::Result<String> {
    let canonical = canonical_json(value)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}
