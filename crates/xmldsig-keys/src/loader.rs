#![forbid(unsafe_code)]

//! Key loading from PEM and DER (PKCS#1, PKCS#8, SPKI, X.509).

use crate::key::{Key, KeyData};
use std::path::Path;
use xmldsig_core::Error;

fn rsa_private(pk: rsa::RsaPrivateKey) -> Key {
    let public = pk.to_public_key();
    Key::new(KeyData::Rsa {
        private: Some(pk),
        public,
    })
}

fn rsa_public(public: rsa::RsaPublicKey) -> Key {
    Key::new(KeyData::Rsa {
        private: None,
        public,
    })
}

fn pem_str(pem_data: &[u8]) -> Result<&str, Error> {
    std::str::from_utf8(pem_data)
        .map(str::trim)
        .map_err(|e| Error::Key(format!("invalid PEM encoding: {e}")))
}

/// Load an RSA private key from PEM data (PKCS#8 or PKCS#1).
pub fn load_rsa_private_pem(pem_data: &[u8]) -> Result<Key, Error> {
    use pkcs1::DecodeRsaPrivateKey;
    use pkcs8::DecodePrivateKey;
    let pem = pem_str(pem_data)?;

    if let Ok(pk) = rsa::RsaPrivateKey::from_pkcs8_pem(pem) {
        return Ok(rsa_private(pk));
    }
    let pk = rsa::RsaPrivateKey::from_pkcs1_pem(pem)
        .map_err(|e| Error::Key(format!("failed to parse RSA private key PEM: {e}")))?;
    Ok(rsa_private(pk))
}

/// Load an RSA private key from DER data (PKCS#8 or PKCS#1).
pub fn load_rsa_private_der(data: &[u8]) -> Result<Key, Error> {
    use pkcs1::DecodeRsaPrivateKey;
    use pkcs8::DecodePrivateKey;

    if let Ok(pk) = rsa::RsaPrivateKey::from_pkcs8_der(data) {
        return Ok(rsa_private(pk));
    }
    let pk = rsa::RsaPrivateKey::from_pkcs1_der(data)
        .map_err(|e| Error::Key(format!("failed to parse RSA private key DER: {e}")))?;
    Ok(rsa_private(pk))
}

/// Load an RSA public key from PEM data (SPKI or PKCS#1).
pub fn load_rsa_public_pem(pem_data: &[u8]) -> Result<Key, Error> {
    use pkcs1::DecodeRsaPublicKey;
    use spki::DecodePublicKey;
    let pem = pem_str(pem_data)?;

    if let Ok(pk) = rsa::RsaPublicKey::from_public_key_pem(pem) {
        return Ok(rsa_public(pk));
    }
    let pk = rsa::RsaPublicKey::from_pkcs1_pem(pem)
        .map_err(|e| Error::Key(format!("failed to parse RSA public key PEM: {e}")))?;
    Ok(rsa_public(pk))
}

/// Load a public key from raw SubjectPublicKeyInfo DER bytes.
pub fn load_spki_der(spki_der: &[u8]) -> Result<Key, Error> {
    use spki::DecodePublicKey;
    let pk = rsa::RsaPublicKey::from_public_key_der(spki_der)
        .map_err(|e| Error::Key(format!("unsupported or invalid public key: {e}")))?;
    Ok(rsa_public(pk))
}

/// Decode a PEM certificate to DER.
pub fn certificate_pem_to_der(pem_data: &[u8]) -> Result<Vec<u8>, Error> {
    let pem = pem_str(pem_data).map_err(|e| Error::Certificate(e.to_string()))?;
    let (label, der_bytes) = pem_rfc7468::decode_vec(pem.as_bytes())
        .map_err(|e| Error::Certificate(format!("failed to decode certificate PEM: {e}")))?;
    if label != "CERTIFICATE" {
        return Err(Error::Certificate(format!(
            "expected CERTIFICATE PEM label, got: {label}"
        )));
    }
    Ok(der_bytes)
}

/// Load the public key of a PEM-encoded X.509 certificate.
///
/// The certificate itself is kept on the returned key.
pub fn load_x509_cert_pem(pem_data: &[u8]) -> Result<Key, Error> {
    let der = certificate_pem_to_der(pem_data)?;
    load_x509_cert_der(&der)
}

/// Load the public key of a DER-encoded X.509 certificate.
pub fn load_x509_cert_der(data: &[u8]) -> Result<Key, Error> {
    use der::{Decode, Encode};
    use x509_cert::Certificate;

    let cert = Certificate::from_der(data)
        .map_err(|e| Error::Certificate(format!("failed to parse X.509 certificate: {e}")))?;
    let spki_der = cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| Error::Certificate(format!("failed to encode SPKI: {e}")))?;
    let key = load_spki_der(&spki_der).map_err(|_| {
        Error::Certificate("unsupported public key algorithm in X.509 certificate".into())
    })?;
    Ok(key.with_certificate(data.to_vec()))
}

/// Auto-detect the PEM block type and load it.
pub fn load_pem_auto(pem_data: &[u8]) -> Result<Key, Error> {
    if let Ok(key) = load_rsa_private_pem(pem_data) {
        return Ok(key);
    }
    if let Ok(key) = load_rsa_public_pem(pem_data) {
        return Ok(key);
    }
    if let Ok(key) = load_x509_cert_pem(pem_data) {
        return Ok(key);
    }
    Err(Error::Key(
        "unable to auto-detect key format from PEM data".into(),
    ))
}

/// Load a key from a file, auto-detecting PEM or DER.
pub fn load_key_file(path: &Path) -> Result<Key, Error> {
    let data = std::fs::read(path)?;
    tracing::debug!(path = %path.display(), "loading key");

    let key = if data.starts_with(b"-----BEGIN") {
        load_pem_auto(&data)?
    } else if let Ok(key) = load_rsa_private_der(&data) {
        key
    } else if let Ok(key) = load_spki_der(&data) {
        key
    } else if let Ok(key) = load_x509_cert_der(&data) {
        key
    } else {
        return Err(Error::Key(format!(
            "unable to auto-detect key format from file: {}",
            path.display()
        )));
    };
    Ok(key)
}

/// Read a certificate file (PEM or DER) and return the DER bytes.
pub fn load_certificate_file(path: &Path) -> Result<Vec<u8>, Error> {
    let data = std::fs::read(path)?;
    if data.starts_with(b"-----BEGIN") {
        certificate_pem_to_der(&data)
    } else {
        load_x509_cert_der(&data)?;
        Ok(data)
    }
}

/// Load a signing key and, when given, attach its certificate.
pub fn load_signing_key(key_path: &Path, cert_path: Option<&Path>) -> Result<Key, Error> {
    let mut key = load_key_file(key_path)?;
    if !key.has_private_key() {
        return Err(Error::Key(format!(
            "{} does not contain a private key",
            key_path.display()
        )));
    }
    if let Some(cert_path) = cert_path {
        key = key.with_certificate(load_certificate_file(cert_path)?);
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_PEM: &[u8] = include_bytes!("../../xmldsig-dsig/tests/fixtures/key.pem");
    const CERT_PEM: &[u8] = include_bytes!("../../xmldsig-dsig/tests/fixtures/certificate.pem");
    const OTHER_CERT_PEM: &[u8] =
        include_bytes!("../../xmldsig-dsig/tests/fixtures/certificate2.pem");

    #[test]
    fn test_load_pkcs1_private_key() {
        let key = load_rsa_private_pem(KEY_PEM).unwrap();
        assert!(key.has_private_key());
        assert!(key.certificate().is_none());
    }

    #[test]
    fn test_certificate_matches_key() {
        let key = load_rsa_private_pem(KEY_PEM).unwrap();
        let cert = load_x509_cert_pem(CERT_PEM).unwrap();
        assert!(!cert.has_private_key());
        assert!(cert.certificate().is_some());
        assert_eq!(key.rsa_public_key(), cert.rsa_public_key());

        let other = load_x509_cert_pem(OTHER_CERT_PEM).unwrap();
        assert_ne!(key.rsa_public_key(), other.rsa_public_key());
    }

    #[test]
    fn test_auto_detect() {
        assert!(load_pem_auto(KEY_PEM).unwrap().has_private_key());
        assert!(!load_pem_auto(CERT_PEM).unwrap().has_private_key());
        assert!(load_pem_auto(b"-----BEGIN NONSENSE-----\n-----END NONSENSE-----").is_err());
    }

    #[test]
    fn test_certificate_der_roundtrip() {
        let der = certificate_pem_to_der(CERT_PEM).unwrap();
        let key = load_x509_cert_der(&der).unwrap();
        assert_eq!(key.certificate(), Some(der.as_slice()));
        assert!(certificate_pem_to_der(KEY_PEM).is_err());
    }
}
