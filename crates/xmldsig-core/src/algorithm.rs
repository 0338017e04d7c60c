#![forbid(unsafe_code)]

//! Algorithm URI constants for XML-DSig.
//!
//! Each constant is the canonical URI string that appears in `Algorithm`
//! attributes.

// ── Canonicalization ─────────────────────────────────────────────────

pub const C14N: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
pub const C14N_WITH_COMMENTS: &str =
    "http://www.w3.org/TR/2001/REC-xml-c14n-20010315#WithComments";
pub const C14N11: &str = "http://www.w3.org/2006/12/xml-c14n11";
pub const C14N11_WITH_COMMENTS: &str = "http://www.w3.org/2006/12/xml-c14n11#WithComments";
pub const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
pub const EXC_C14N_WITH_COMMENTS: &str = "http://www.w3.org/2001/10/xml-exc-c14n#WithComments";

// ── Digest algorithms ────────────────────────────────────────────────

pub const SHA1: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
pub const SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const SHA512: &str = "http://www.w3.org/2001/04/xmlenc#sha512";

// ── RSA signature algorithms ─────────────────────────────────────────

pub const RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
pub const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const RSA_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384";
pub const RSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512";

// ── Transform algorithms ─────────────────────────────────────────────

pub const ENVELOPED_SIGNATURE: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
pub const XPATH: &str = "http://www.w3.org/TR/1999/REC-xpath-19991116";

/// Whether `uri` names one of the canonicalization algorithms.
pub fn is_c14n(uri: &str) -> bool {
    matches!(
        uri,
        C14N | C14N_WITH_COMMENTS | C14N11 | C14N11_WITH_COMMENTS | EXC_C14N | EXC_C14N_WITH_COMMENTS
    )
}

/// Parse the hash size that follows the last `sha` in an algorithm URI.
///
/// `…#rsa-sha256` yields `Some(256)`, `…#sha1` yields `Some(1)`.  Returns
/// `None` when the URI has no `sha` marker or no digits after it.
pub fn trailing_sha_bits(uri: &str) -> Option<u32> {
    let lower = uri.to_ascii_lowercase();
    let idx = lower.rfind("sha")?;
    let digits: String = lower[idx + 3..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_sha_bits() {
        assert_eq!(trailing_sha_bits(SHA1), Some(1));
        assert_eq!(trailing_sha_bits(SHA256), Some(256));
        assert_eq!(trailing_sha_bits(SHA512), Some(512));
        assert_eq!(trailing_sha_bits(RSA_SHA384), Some(384));
        assert_eq!(trailing_sha_bits("http://example.com/md5"), None);
        assert_eq!(trailing_sha_bits("urn:sha"), None);
    }

    #[test]
    fn test_is_c14n() {
        assert!(is_c14n(EXC_C14N_WITH_COMMENTS));
        assert!(is_c14n(C14N11));
        assert!(!is_c14n(ENVELOPED_SIGNATURE));
        assert!(!is_c14n(XPATH));
    }
}
