//! Built artifacts.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use super::digest::ArtifactDigest;

/// The unit produced by the builder and gated by the scanner.
///
/// Identity is the digest: two artifacts with the same digest are equal no
/// matter which tags they carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub digest: ArtifactDigest,
    pub size_bytes: u64,
    /// Mutable labels to point at the digest on publish.
    pub tags: Vec<String>,
}

impl Artifact {
    pub fn new(digest: ArtifactDigest, size_bytes: u64, tags: Vec<String>) -> Self {
        Self {
            digest,
            size_bytes,
            tags,
        }
    }
}

impl PartialEq for Artifact {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
    }
}

impl Eq for Artifact {}

impl Hash for Artifact {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.digest.hash(state);
    }
}
