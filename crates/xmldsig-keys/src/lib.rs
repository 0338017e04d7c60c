#![forbid(unsafe_code)]

//! Key handling for the xmldsig workspace.
//!
//! Loads RSA private and public keys from PEM or DER (PKCS#1, PKCS#8,
//! SubjectPublicKeyInfo) and public keys from X.509 certificates.  A
//! signing key may carry its certificate so that it can be embedded in
//! the signature on output.

pub mod key;
pub mod loader;

pub use key::{Key, KeyData};
