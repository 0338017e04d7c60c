#![forbid(unsafe_code)]

//! RSA PKCS#1 v1.5 signature algorithms.
//!
//! The hash is picked from the number after the final `sha` of the
//! `SignatureMethod` URI: 512, 384 and 256 select the matching SHA-2,
//! anything else falls back to SHA-1.

use signature::SignatureEncoding;
use xmldsig_core::{algorithm, Error};

/// Key material for signature operations.
#[derive(Debug, Clone)]
pub enum SigningKey {
    Rsa(rsa::RsaPrivateKey),
    RsaPublic(rsa::RsaPublicKey),
}

impl SigningKey {
    fn public_key(&self) -> rsa::RsaPublicKey {
        match self {
            SigningKey::Rsa(pk) => pk.to_public_key(),
            SigningKey::RsaPublic(pk) => pk.clone(),
        }
    }
}

/// Trait for signature algorithms.
pub trait SignatureAlgorithm: Send {
    fn uri(&self) -> &'static str;
    fn sign(&self, key: &SigningKey, data: &[u8]) -> Result<Vec<u8>, Error>;
    fn verify(&self, key: &SigningKey, data: &[u8], signature: &[u8]) -> Result<bool, Error>;
}

/// Hash used under the RSA signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashType {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashType {
    /// Pick the hash for a `SignatureMethod` URI.
    pub fn from_signature_uri(uri: &str) -> Self {
        match algorithm::trailing_sha_bits(uri) {
            Some(512) => HashType::Sha512,
            Some(384) => HashType::Sha384,
            Some(256) => HashType::Sha256,
            _ => HashType::Sha1,
        }
    }

    fn rsa_uri(self) -> &'static str {
        match self {
            HashType::Sha1 => algorithm::RSA_SHA1,
            HashType::Sha256 => algorithm::RSA_SHA256,
            HashType::Sha384 => algorithm::RSA_SHA384,
            HashType::Sha512 => algorithm::RSA_SHA512,
        }
    }
}

/// Create a signature algorithm from a `SignatureMethod` URI.
pub fn from_uri(uri: &str) -> Box<dyn SignatureAlgorithm> {
    let hash = HashType::from_signature_uri(uri);
    if hash == HashType::Sha1 && uri != algorithm::RSA_SHA1 {
        tracing::debug!(uri, "signature method resolved to RSA-SHA1");
    }
    Box::new(RsaPkcs1v15 { hash })
}

// ── RSA PKCS#1 v1.5 ─────────────────────────────────────────────────

struct RsaPkcs1v15 {
    hash: HashType,
}

impl SignatureAlgorithm for RsaPkcs1v15 {
    fn uri(&self) -> &'static str {
        self.hash.rsa_uri()
    }

    fn sign(&self, key: &SigningKey, data: &[u8]) -> Result<Vec<u8>, Error> {
        use signature::Signer;
        let SigningKey::Rsa(private_key) = key else {
            return Err(Error::Key("RSA private key required for signing".into()));
        };
        macro_rules! do_sign {
            ($hasher:ty) => {{
                let sk = rsa::pkcs1v15::SigningKey::<$hasher>::new(private_key.clone());
                let sig = sk
                    .try_sign(data)
                    .map_err(|e| Error::Crypto(format!("RSA signing failed: {e}")))?;
                Ok(sig.to_vec())
            }};
        }
        match self.hash {
            HashType::Sha1 => do_sign!(sha1::Sha1),
            HashType::Sha256 => do_sign!(sha2::Sha256),
            HashType::Sha384 => do_sign!(sha2::Sha384),
            HashType::Sha512 => do_sign!(sha2::Sha512),
        }
    }

    fn verify(&self, key: &SigningKey, data: &[u8], sig_bytes: &[u8]) -> Result<bool, Error> {
        use signature::Verifier;
        let public_key = key.public_key();
        let Ok(sig) = rsa::pkcs1v15::Signature::try_from(sig_bytes) else {
            return Ok(false);
        };
        macro_rules! do_verify {
            ($hasher:ty) => {{
                let vk = rsa::pkcs1v15::VerifyingKey::<$hasher>::new(public_key);
                Ok(vk.verify(data, &sig).is_ok())
            }};
        }
        match self.hash {
            HashType::Sha1 => do_verify!(sha1::Sha1),
            HashType::Sha256 => do_verify!(sha2::Sha256),
            HashType::Sha384 => do_verify!(sha2::Sha384),
            HashType::Sha512 => do_verify!(sha2::Sha512),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> rsa::RsaPrivateKey {
        use rsa::pkcs1::DecodeRsaPrivateKey;
        let pem = include_str!("../../xmldsig-dsig/tests/fixtures/key.pem");
        rsa::RsaPrivateKey::from_pkcs1_pem(pem).unwrap()
    }

    #[test]
    fn test_hash_selection() {
        assert_eq!(HashType::from_signature_uri(algorithm::RSA_SHA512), HashType::Sha512);
        assert_eq!(HashType::from_signature_uri(algorithm::RSA_SHA384), HashType::Sha384);
        assert_eq!(HashType::from_signature_uri(algorithm::RSA_SHA256), HashType::Sha256);
        assert_eq!(HashType::from_signature_uri(algorithm::RSA_SHA1), HashType::Sha1);
        assert_eq!(HashType::from_signature_uri("urn:something-else"), HashType::Sha1);
        assert_eq!(from_uri("urn:x#rsa-sha224").uri(), algorithm::RSA_SHA1);
    }

    #[test]
    fn test_sign_verify_roundtrip() {
        let key = SigningKey::Rsa(test_key());
        let alg = from_uri(algorithm::RSA_SHA256);
        let sig = alg.sign(&key, b"payload").unwrap();
        assert_eq!(sig.len(), 256);

        let public = SigningKey::RsaPublic(test_key().to_public_key());
        assert!(alg.verify(&public, b"payload", &sig).unwrap());
        assert!(!alg.verify(&public, b"tampered", &sig).unwrap());
        assert!(!from_uri(algorithm::RSA_SHA512).verify(&public, b"payload", &sig).unwrap());
    }

    #[test]
    fn test_public_key_cannot_sign() {
        let public = SigningKey::RsaPublic(test_key().to_public_key());
        assert!(from_uri(algorithm::RSA_SHA1).sign(&public, b"x").is_err());
    }
}
