//! Content digests of emitted templates.
//!
//! Compilation is deterministic, so two runs over the same declarations and
//! environment must produce the same digest. Uses BLAKE3.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A BLAKE3 digest of template bytes (32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TemplateDigest([u8; 32]);

impl TemplateDigest {
    /// Compute the digest of rendered template text
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Convert to hex string
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Check if the digest matches rendered text
    #[must_use]
    pub fn verify(&self, data: &[u8]) -> bool {
        Self::compute(data) == *self
    }
}

impl fmt::Display for TemplateDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blake3:{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_compute() {
        let digest = TemplateDigest::compute(b"{}");
        assert_eq!(digest.to_hex().len(), 64);
        assert!(digest.to_string().starts_with("blake3:"));
        assert_eq!(digest, TemplateDigest::compute(b"{}"));
    }

    #[test]
    fn test_digest_verify() {
        let digest = TemplateDigest::compute(b"a");
        assert!(digest.verify(b"a"));
        assert!(!digest.verify(b"b"));
    }
}
