//! Digests for cache keys

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Write;

use crate::models::StableBrief;

/// Deterministic key derived from the normalized stable brief.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn from_stable(stable: &StableBrief) -> crate::Result<Self> {
        Ok(CacheKey(digest_json(stable)?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SHA-256 of the JSON serialization of `value`, hex encoded.
/// Streams the JSON directly into the hasher.
pub fn digest_json<T: Serialize>(value: &T) -> crate::Result<String> {
    let mut hasher = Sha256::new();
    serde_json::to_writer(&mut HashWriter(&mut hasher), value)?;
    Ok(hex::encode(hasher.finalize()))
}

pub fn digest_str(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stable(theme: &str, constraints: &[&str]) -> StableBrief {
        let constraints: Vec<String> = constraints.iter().map(|c| c.to_string()).collect();
        StableBrief::new(theme, Some("gen z"), None, None, "Fall/Winter", 2026, &constraints)
    }

    #[test]
    fn test_equivalent_briefs_share_a_key() {
        let a = CacheKey::from_stable(&stable("Y2K Revival", &["denim", "chrome"])).unwrap();
        let b = CacheKey::from_stable(&stable(" y2k   revival ", &["Chrome", "denim", "denim"])).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_different_briefs_differ() {
        let a = CacheKey::from_stable(&stable("Y2K Revival", &[])).unwrap();
        let b = CacheKey::from_stable(&stable("Y2K Revival", &["denim"])).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_digest_str_matches_known_vector() {
        assert_eq!(
            digest_str("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
