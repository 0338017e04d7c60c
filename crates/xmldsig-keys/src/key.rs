#![forbid(unsafe_code)]

//! Key types and data structures.

use xmldsig_crypto::SigningKey;

/// The underlying key data.
#[derive(Clone)]
pub enum KeyData {
    Rsa {
        private: Option<rsa::RsaPrivateKey>,
        public: rsa::RsaPublicKey,
    },
}

impl std::fmt::Debug for KeyData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rsa { private: Some(_), .. } => write!(f, "RSA private+public key"),
            Self::Rsa { private: None, .. } => write!(f, "RSA public key"),
        }
    }
}

/// A key with an optional X.509 certificate.
#[derive(Debug, Clone)]
pub struct Key {
    /// The key data.
    pub data: KeyData,
    /// X.509 certificates (DER), leaf first.
    pub x509_chain: Vec<Vec<u8>>,
}

impl Key {
    /// Create a new key.
    pub fn new(data: KeyData) -> Self {
        Self {
            data,
            x509_chain: Vec::new(),
        }
    }

    /// Attach a DER certificate.  The first one attached is the leaf.
    pub fn with_certificate(mut self, der: Vec<u8>) -> Self {
        self.x509_chain.push(der);
        self
    }

    /// The leaf certificate (DER), if any.
    pub fn certificate(&self) -> Option<&[u8]> {
        self.x509_chain.first().map(Vec::as_slice)
    }

    /// Whether this key can produce signatures.
    pub fn has_private_key(&self) -> bool {
        matches!(self.data, KeyData::Rsa { private: Some(_), .. })
    }

    /// Convert to a `SigningKey` for use with crypto algorithms.
    pub fn to_signing_key(&self) -> SigningKey {
        match &self.data {
            KeyData::Rsa {
                private: Some(pk), ..
            } => SigningKey::Rsa(pk.clone()),
            KeyData::Rsa { public, .. } => SigningKey::RsaPublic(public.clone()),
        }
    }

    /// Get the RSA public key.
    pub fn rsa_public_key(&self) -> &rsa::RsaPublicKey {
        match &self.data {
            KeyData::Rsa { public, .. } => public,
        }
    }
}
