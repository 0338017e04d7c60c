#![forbid(unsafe_code)]

//! Digest (hash) algorithm implementations.
//!
//! The hash is chosen from the number after the final `sha` in the
//! `DigestMethod` URI, so vendor-specific spellings of the same algorithm
//! resolve the same way.  Only SHA-1, SHA-256 and SHA-512 are selected;
//! anything else, including the `xmldsig-more` SHA-224 and SHA-384
//! identifiers, is hashed with SHA-256.  Selection never fails.

use digest::Digest;
use xmldsig_core::algorithm;

/// Trait for digest algorithms.
pub trait DigestAlgorithm: Send {
    /// Feed data into the hash.
    fn update(&mut self, data: &[u8]);
    /// Finalize and return the hash value.
    fn finalize(self: Box<Self>) -> Vec<u8>;
    /// Canonical URI of the algorithm actually used.
    fn uri(&self) -> &'static str;
}

/// Create a digest algorithm from a `DigestMethod` URI.
pub fn from_uri(uri: &str) -> Box<dyn DigestAlgorithm> {
    match algorithm::trailing_sha_bits(uri) {
        Some(1) => Box::new(Sha1Digest::new()),
        Some(256) => Box::new(Sha256Digest::new()),
        Some(512) => Box::new(Sha512Digest::new()),
        _ => {
            tracing::warn!(uri, "unrecognised digest method, using SHA-256");
            Box::new(Sha256Digest::new())
        }
    }
}

/// Compute a digest in one shot.
pub fn digest(uri: &str, data: &[u8]) -> Vec<u8> {
    let mut hasher = from_uri(uri);
    hasher.update(data);
    hasher.finalize()
}

// ── Concrete implementations ─────────────────────────────────────────

macro_rules! impl_digest {
    ($name:ident, $hasher:ty, $uri:expr) => {
        struct $name {
            inner: $hasher,
        }

        impl $name {
            fn new() -> Self {
                Self {
                    inner: <$hasher>::new(),
                }
            }
        }

        impl DigestAlgorithm for $name {
            fn update(&mut self, data: &[u8]) {
                Digest::update(&mut self.inner, data);
            }

            fn finalize(self: Box<Self>) -> Vec<u8> {
                Digest::finalize(self.inner).to_vec()
            }

            fn uri(&self) -> &'static str {
                $uri
            }
        }
    };
}

impl_digest!(Sha1Digest, sha1::Sha1, algorithm::SHA1);
impl_digest!(Sha256Digest, sha2::Sha256, algorithm::SHA256);
impl_digest!(Sha512Digest, sha2::Sha512, algorithm::SHA512);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(
            hex::encode(digest(algorithm::SHA1, b"hello")),
            "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        );
        assert_eq!(
            hex::encode(digest(algorithm::SHA256, b"hello")),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(digest(algorithm::SHA512, b"hello").len(), 64);
    }

    #[test]
    fn test_selection_by_trailing_number() {
        assert_eq!(from_uri("urn:vendor:digest:SHA512").uri(), algorithm::SHA512);
        assert_eq!(from_uri("http://www.w3.org/2000/09/xmldsig#sha1").uri(), algorithm::SHA1);
    }

    #[test]
    fn test_unknown_defaults_to_sha256() {
        assert_eq!(from_uri("http://www.w3.org/2001/04/xmldsig-more#md5").uri(), algorithm::SHA256);
        assert_eq!(from_uri("urn:sha3-999").uri(), algorithm::SHA256);
        assert_eq!(from_uri("").uri(), algorithm::SHA256);
    }

    #[test]
    fn test_sha224_and_sha384_hash_as_sha256() {
        let sha256 = digest(algorithm::SHA256, b"hello");
        for uri in [
            "http://www.w3.org/2001/04/xmldsig-more#sha224",
            "http://www.w3.org/2001/04/xmldsig-more#sha384",
        ] {
            assert_eq!(from_uri(uri).uri(), algorithm::SHA256);
            assert_eq!(digest(uri, b"hello"), sha256);
        }
    }
}
