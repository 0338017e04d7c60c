#![forbid(unsafe_code)]

//! XML Digital Signatures.
//!
//! Re-exports the workspace crates under one roof:
//!
//! ```no_run
//! use xmldsig::{keys::loader, SignedDocument, SigningKeySource, VerificationSource};
//!
//! # fn main() -> Result<(), xmldsig::Error> {
//! let key = loader::load_key_file("key.pem".as_ref())?;
//! let cert = loader::load_key_file("certificate.pem".as_ref())?;
//! let template = std::fs::read_to_string("unsigned.xml")?;
//!
//! let signed = SignedDocument::new(template)?.sign(SigningKeySource::Key(&key), true)?;
//! assert!(SignedDocument::new(signed)?.validate(VerificationSource::Key(&cert), None)?);
//! # Ok(())
//! # }
//! ```

pub use xmldsig_c14n as c14n;
pub use xmldsig_core as core;
pub use xmldsig_crypto as crypto;
pub use xmldsig_dsig as dsig;
pub use xmldsig_keys as keys;
pub use xmldsig_transforms as transforms;
pub use xmldsig_xml as xml;

pub use xmldsig_core::{Error, ValidationError};
pub use xmldsig_dsig::{
    DsigContext, Schema, Signature, SignedDocument, SigningKeySource, VerificationSource,
};
