//! Cache key derivation.

use std::fmt;

use sha2::{Digest, Sha256};

/// Characters of the lower-cased body that participate in the fingerprint.
pub const BODY_PREFIX_CHARS: usize = 1000;

/// Hex characters used as the storage shard.
const SHARD_LEN: usize = 2;

/// SHA-256 over `(sender, subject, body prefix)`, lower-cased. Used only as
/// the response cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(sender: &str, subject: &str, body: &str) -> Self {
        let body_prefix: String = body.to_lowercase().chars().take(BODY_PREFIX_CHARS).collect();

        let mut hasher = Sha256::new();
        hasher.update(sender.to_lowercase().as_bytes());
        hasher.update(b"|");
        hasher.update(subject.to_lowercase().as_bytes());
        hasher.update(b"|");
        hasher.update(body_prefix.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix used to bound directory fan-out.
    pub fn shard(&self) -> &str {
        &self.0[..SHARD_LEN]
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
