#![forbid(unsafe_code)]

//! XML Digital Signature (XML-DSig) creation and verification.
//!
//! [`SignedDocument`] is the entry point: it finds the `ds:Signature`
//! elements of a document, signs them innermost-first and validates them
//! against a key, a certificate or a caller supplied callback.

pub mod context;
pub mod document;
pub mod encoding;
pub mod reference;
pub mod schema;
pub mod signature;

pub use context::DsigContext;
pub use document::SignedDocument;
pub use reference::Reference;
pub use schema::{Schema, SchemaValidator};
pub use signature::{Signature, SigningKeySource, VerificationSource};
