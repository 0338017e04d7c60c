#![forbid(unsafe_code)]

//! Cryptographic algorithms for the xmldsig workspace.
//!
//! Digests (SHA-1 and the SHA-2 family) and RSA PKCS#1 v1.5 signatures,
//! both selected leniently from their XML-DSig algorithm URIs.

pub mod digest;
pub mod sign;

pub use digest::DigestAlgorithm;
pub use sign::{HashType, SignatureAlgorithm, SigningKey};
