/// Script fingerprinting
///
/// The fingerprint is the SHA256 of the raw script bytes, manifest block
/// included verbatim. Nothing else (paths, timestamps, environment) is folded
/// in, so the same file fingerprints identically on every machine.
use sha2::{Digest, Sha256};
use std::fmt;

/// Hex-encoded SHA256 of a script file
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Length of the hex encoding
    pub const LEN: usize = 64;

    pub fn compute(script: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(script);
        Fingerprint(hex::encode(hasher.finalize()))
    }

    /// Accepts a fingerprint read back from disk (e.g. an entry directory name)
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() == Self::LEN && s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            Some(Fingerprint(s.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
