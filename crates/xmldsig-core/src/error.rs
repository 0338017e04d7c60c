#![forbid(unsafe_code)]

/// Errors produced by the xmldsig library.
///
/// Structural problems (malformed XML, unresolvable references, schema
/// violations) are raised through this type.  Cryptographic mismatches are
/// not errors; they are collected as [`ValidationError`] tags.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("XML parsing error: {0}")]
    XmlParse(String),

    #[error("invalid XML structure: {0}")]
    XmlStructure(String),

    #[error("referenced node not found: {0}")]
    ReferencedNodeNotFound(String),

    #[error("ambiguous reference: {0}")]
    AmbiguousReference(String),

    #[error("schema validation failed: {}", .0.join("; "))]
    Schema(Vec<String>),

    #[error("cryptographic error: {0}")]
    Crypto(String),

    #[error("key error: {0}")]
    Key(String),

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("transform error: {0}")]
    Transform(String),

    #[error("base64 decode error: {0}")]
    Base64(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing required element: {0}")]
    MissingElement(String),

    #[error("missing required attribute: {0}")]
    MissingAttribute(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for errors raised because a `Reference` URI could not be
    /// resolved to exactly one target.
    pub fn is_reference_resolution(&self) -> bool {
        matches!(
            self,
            Error::ReferencedNodeNotFound(_) | Error::AmbiguousReference(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A validation failure recorded against a `Reference` or `Signature`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationError {
    /// The stored `DigestValue` does not match the recomputed digest.
    DigestValue,
    /// The `SignatureValue` does not verify over the canonical `SignedInfo`.
    Signature,
}

impl ValidationError {
    /// The stable tag for this failure.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::DigestValue => "digest_value",
            Self::Signature => "signature",
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_tags() {
        assert_eq!(ValidationError::DigestValue.to_string(), "digest_value");
        assert_eq!(ValidationError::Signature.to_string(), "signature");
    }

    #[test]
    fn test_reference_resolution_classification() {
        assert!(Error::ReferencedNodeNotFound("foo".into()).is_reference_resolution());
        assert!(Error::AmbiguousReference("foo".into()).is_reference_resolution());
        assert!(!Error::Schema(vec!["x".into()]).is_reference_resolution());
    }

    #[test]
    fn test_schema_error_display() {
        let err = Error::Schema(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "schema validation failed: a; b");
    }
}
