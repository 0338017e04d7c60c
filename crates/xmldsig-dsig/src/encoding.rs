#![forbid(unsafe_code)]

//! Base64 for `DigestValue`, `SignatureValue` and `X509Certificate`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use xmldsig_core::Error;

/// Encode without line breaks.
pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode, ignoring any whitespace in the element content.
pub fn decode(text: &str, what: &str) -> Result<Vec<u8>, Error> {
    let clean: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(clean)
        .map_err(|e| Error::Base64(format!("{what}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_strips_whitespace() {
        assert_eq!(decode("aGVs\n  bG8=\r\n", "test").unwrap(), b"hello");
        assert_eq!(encode(b"hello"), "aGVsbG8=");
    }

    #[test]
    fn test_decode_error_names_field() {
        let err = decode("***", "DigestValue").unwrap_err();
        assert!(err.to_string().contains("DigestValue"));
    }
}
