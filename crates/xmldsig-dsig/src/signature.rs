#![forbid(unsafe_code)]

//! A `ds:Signature` element: its references, `SignedInfo` and value.

use crate::context::DsigContext;
use crate::encoding;
use crate::reference::Reference;
use crate::schema::Schema;
use roxmltree::{Document, Node};
use xmldsig_c14n::C14nMode;
use xmldsig_core::{algorithm, ns, Error, ValidationError};
use xmldsig_keys::Key;
use xmldsig_xml::document::{
    find_child_element, find_child_elements, find_descendant_element, replace_content_edit,
    text_content,
};
use xmldsig_xml::XmlDocument;

/// Signer callback: `(canonical SignedInfo, SignatureMethod URI)` to raw
/// signature bytes.
pub type SignCallback<'k> = dyn Fn(&[u8], &str) -> Result<Vec<u8>, Error> + 'k;

/// Verifier callback: `(signature bytes, canonical SignedInfo,
/// SignatureMethod URI)` to validity.
pub type VerifyCallback<'k> = dyn Fn(&[u8], &[u8], &str) -> bool + 'k;

/// Where signature values come from.
#[derive(Clone, Copy)]
pub enum SigningKeySource<'k> {
    /// Sign with a private key.  A certificate attached to the key is
    /// written into the signature's `X509Certificate` element.
    Key(&'k Key),
    /// Delegate to the caller, e.g. an HSM.
    Callback(&'k SignCallback<'k>),
}

impl<'k> From<&'k Key> for SigningKeySource<'k> {
    fn from(key: &'k Key) -> Self {
        SigningKeySource::Key(key)
    }
}

/// How signature values are checked.
#[derive(Clone, Copy)]
pub enum VerificationSource<'k> {
    /// Verify with a public key, typically loaded from a certificate.
    Key(&'k Key),
    Callback(&'k VerifyCallback<'k>),
}

impl<'k> From<&'k Key> for VerificationSource<'k> {
    fn from(key: &'k Key) -> Self {
        VerificationSource::Key(key)
    }
}

/// The `index`-th `ds:Signature` element of `doc` in document order.
pub(crate) fn signature_element<'a, 'input>(
    doc: &'a Document<'input>,
    index: usize,
) -> Result<Node<'a, 'input>, Error> {
    XmlDocument::find_elements(doc, ns::DSIG, ns::node::SIGNATURE)
        .get(index)
        .copied()
        .ok_or_else(|| Error::MissingElement(format!("Signature #{index}")))
}

/// One signature of a document.
#[derive(Debug, Clone)]
pub struct Signature {
    index: usize,
    depth: usize,
    references: Vec<Reference>,
    canonicalization_method: String,
    inclusive_prefixes: Vec<String>,
    signature_algorithm: String,
    errors: Vec<ValidationError>,
}

impl Signature {
    /// Read the signature element that is the `index`-th `ds:Signature` of
    /// its document.
    pub(crate) fn from_element(node: Node<'_, '_>, index: usize) -> Result<Self, Error> {
        let signed_info = find_child_element(node, ns::DSIG, ns::node::SIGNED_INFO)
            .ok_or_else(|| Error::MissingElement("SignedInfo".into()))?;
        let c14n_method =
            find_child_element(signed_info, ns::DSIG, ns::node::CANONICALIZATION_METHOD)
                .ok_or_else(|| Error::MissingElement("CanonicalizationMethod".into()))?;
        let signature_method =
            find_child_element(signed_info, ns::DSIG, ns::node::SIGNATURE_METHOD)
                .ok_or_else(|| Error::MissingElement("SignatureMethod".into()))?;

        let inclusive_prefixes =
            find_child_element(c14n_method, ns::EXC_C14N, ns::node::INCLUSIVE_NAMESPACES)
                .and_then(|n| n.attribute(ns::attr::PREFIX_LIST))
                .map(xmldsig_c14n::parse_prefix_list)
                .unwrap_or_default();

        let references = find_child_elements(signed_info, ns::DSIG, ns::node::REFERENCE)
            .into_iter()
            .enumerate()
            .map(|(i, r)| Reference::from_element(r, index, i))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            index,
            depth: node.ancestors().skip(1).count(),
            references,
            canonicalization_method: c14n_method
                .attribute(ns::attr::ALGORITHM)
                .unwrap_or(algorithm::C14N)
                .to_owned(),
            inclusive_prefixes,
            signature_algorithm: signature_method
                .attribute(ns::attr::ALGORITHM)
                .unwrap_or_default()
                .to_owned(),
            errors: Vec::new(),
        })
    }

    /// Position among the document's signatures, in document order.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of ancestors of the signature element.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    /// The `CanonicalizationMethod` algorithm URI.
    pub fn canonicalization_method(&self) -> &str {
        &self.canonicalization_method
    }

    /// The `SignatureMethod` algorithm URI.
    pub fn signature_algorithm(&self) -> &str {
        &self.signature_algorithm
    }

    /// Reference failures followed by signature failures, from the last
    /// validation.
    pub fn errors(&self) -> Vec<ValidationError> {
        self.references
            .iter()
            .flat_map(|r| r.errors().iter().copied())
            .chain(self.errors.iter().copied())
            .collect()
    }

    /// Locate this signature's element in `doc`.
    pub fn element<'a, 'input>(&self, doc: &'a Document<'input>) -> Result<Node<'a, 'input>, Error> {
        signature_element(doc, self.index)
    }

    /// Canonical form of `SignedInfo`, the octets the signature value covers.
    pub fn canonicalized_signed_info(&self, doc: &Document<'_>) -> Result<Vec<u8>, Error> {
        let signed_info = find_child_element(self.element(doc)?, ns::DSIG, ns::node::SIGNED_INFO)
            .ok_or_else(|| Error::MissingElement("SignedInfo".into()))?;
        let mode = C14nMode::from_uri_or_default(Some(&self.canonicalization_method));
        xmldsig_c14n::canonicalize_node(signed_info, mode, &self.inclusive_prefixes)
    }

    /// The stored signature value, decoded.
    pub fn signature_value(&self, doc: &Document<'_>) -> Result<Vec<u8>, Error> {
        encoding::decode(&text_content(self.signature_value_element(doc)?), "SignatureValue")
    }

    /// Whether `SignatureValue` has content.
    pub fn is_signed(&self, doc: &Document<'_>) -> Result<bool, Error> {
        Ok(!text_content(self.signature_value_element(doc)?).trim().is_empty())
    }

    pub fn is_unsigned(&self, doc: &Document<'_>) -> Result<bool, Error> {
        Ok(!self.is_signed(doc)?)
    }

    /// The embedded certificate (DER), if the signature carries a non-empty
    /// `X509Certificate`.
    pub fn x509_certificate(&self, doc: &Document<'_>) -> Result<Option<Vec<u8>>, Error> {
        let Some(cert) = self.x509_certificate_element(doc)? else {
            return Ok(None);
        };
        let text = text_content(cert);
        if text.trim().is_empty() {
            return Ok(None);
        }
        encoding::decode(&text, "X509Certificate").map(Some)
    }

    /// Sign in place: write every reference digest, then the signature
    /// value over the updated `SignedInfo`.
    pub fn sign(
        &mut self,
        document: &mut XmlDocument,
        key: SigningKeySource<'_>,
        ctx: &DsigContext,
    ) -> Result<(), Error> {
        tracing::debug!(index = self.index, "signing signature");

        if let SigningKeySource::Key(key) = key {
            if let Some(cert) = key.certificate() {
                let edit = {
                    let doc = document.parse_doc()?;
                    self.x509_certificate_element(&doc)?
                        .map(|el| replace_content_edit(el, &encoding::encode(cert)))
                        .transpose()?
                };
                if let Some(edit) = edit {
                    document.apply_edits(vec![edit])?;
                }
            }
        }

        let digest_edits = {
            let doc = document.parse_doc()?;
            self.references
                .iter()
                .map(|r| r.sign(&doc, ctx))
                .collect::<Result<Vec<_>, _>>()?
        };
        document.apply_edits(digest_edits)?;

        let edit = {
            let doc = document.parse_doc()?;
            let signed_info = self.canonicalized_signed_info(&doc)?;
            let value = match key {
                SigningKeySource::Key(key) => xmldsig_crypto::sign::from_uri(&self.signature_algorithm)
                    .sign(&key.to_signing_key(), &signed_info)?,
                SigningKeySource::Callback(sign) => sign(&signed_info, &self.signature_algorithm)?,
            };
            replace_content_edit(self.signature_value_element(&doc)?, &encoding::encode(&value))?
        };
        document.apply_edits(vec![edit])
    }

    /// Validate every reference digest and the signature value.
    ///
    /// Cryptographic mismatches are recorded in [`Signature::errors`];
    /// structural problems (unresolvable references, schema violations)
    /// are returned as errors.  Errors from a previous pass are cleared.
    pub fn validate(
        &mut self,
        doc: &Document<'_>,
        verifier: VerificationSource<'_>,
        schema: Option<&Schema>,
        ctx: &DsigContext,
    ) -> Result<bool, Error> {
        self.errors.clear();
        if let Some(schema) = schema {
            schema.validate(self.element(doc)?)?;
        }

        for reference in &mut self.references {
            reference.validate_digest_value(doc, ctx)?;
        }

        let signed_info = self.canonicalized_signed_info(doc)?;
        let valid = match self.signature_value(doc) {
            Ok(value) => match verifier {
                VerificationSource::Key(key) => xmldsig_crypto::sign::from_uri(&self.signature_algorithm)
                    .verify(&key.to_signing_key(), &signed_info, &value)?,
                VerificationSource::Callback(verify) => {
                    verify(&value, &signed_info, &self.signature_algorithm)
                }
            },
            Err(Error::Base64(msg)) => {
                tracing::debug!(%msg, "signature value is not base64");
                false
            }
            Err(e) => return Err(e),
        };
        if !valid {
            self.errors.push(ValidationError::Signature);
        }

        let errors = self.errors();
        tracing::debug!(index = self.index, ?errors, "validated signature");
        Ok(errors.is_empty())
    }

    fn signature_value_element<'a, 'input>(
        &self,
        doc: &'a Document<'input>,
    ) -> Result<Node<'a, 'input>, Error> {
        find_child_element(self.element(doc)?, ns::DSIG, ns::node::SIGNATURE_VALUE)
            .ok_or_else(|| Error::MissingElement("SignatureValue".into()))
    }

    fn x509_certificate_element<'a, 'input>(
        &self,
        doc: &'a Document<'input>,
    ) -> Result<Option<Node<'a, 'input>>, Error> {
        Ok(find_child_element(self.element(doc)?, ns::DSIG, ns::node::KEY_INFO)
            .and_then(|ki| find_descendant_element(ki, ns::DSIG, ns::node::X509_CERTIFICATE)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_PEM: &[u8] = include_bytes!("../tests/fixtures/key.pem");
    const CERT_PEM: &[u8] = include_bytes!("../tests/fixtures/certificate.pem");

    const TEMPLATE: &str = r##"<Envelope><Foo ID="foo">bar</Foo><ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:SignedInfo><ds:CanonicalizationMethod Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"><ec:InclusiveNamespaces xmlns:ec="http://www.w3.org/2001/10/xml-exc-c14n#" PrefixList="ds"/></ds:CanonicalizationMethod><ds:SignatureMethod Algorithm="http://www.w3.org/2001/04/xmldsig-more#rsa-sha256"/><ds:Reference URI="#foo"><ds:Transforms><ds:Transform Algorithm="http://www.w3.org/2000/09/xmldsig#enveloped-signature"/></ds:Transforms><ds:DigestMethod Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"/><ds:DigestValue></ds:DigestValue></ds:Reference></ds:SignedInfo><ds:SignatureValue></ds:SignatureValue><ds:KeyInfo><ds:X509Data><ds:X509Certificate/></ds:X509Data></ds:KeyInfo></ds:Signature></Envelope>"##;

    fn signature(document: &XmlDocument) -> Signature {
        let doc = document.parse_doc().unwrap();
        Signature::from_element(signature_element(&doc, 0).unwrap(), 0).unwrap()
    }

    #[test]
    fn test_reads_signed_info() {
        let document = XmlDocument::parse(TEMPLATE.to_owned()).unwrap();
        let sig = signature(&document);
        let doc = document.parse_doc().unwrap();
        assert_eq!(sig.canonicalization_method(), algorithm::EXC_C14N);
        assert_eq!(sig.signature_algorithm(), algorithm::RSA_SHA256);
        assert_eq!(sig.references().len(), 1);
        assert_eq!(sig.depth(), 2);
        assert!(sig.is_unsigned(&doc).unwrap());
        assert_eq!(sig.x509_certificate(&doc).unwrap(), None);
    }

    #[test]
    fn test_canonical_signed_info_keeps_forced_prefix() {
        let document = XmlDocument::parse(TEMPLATE.to_owned()).unwrap();
        let doc = document.parse_doc().unwrap();
        let c14n = signature(&document).canonicalized_signed_info(&doc).unwrap();
        let text = String::from_utf8(c14n).unwrap();
        assert!(text.starts_with(
            r#"<ds:SignedInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:CanonicalizationMethod"#
        ));
    }

    #[test]
    fn test_sign_and_validate_with_key() {
        let key = xmldsig_keys::loader::load_rsa_private_pem(KEY_PEM)
            .unwrap()
            .with_certificate(xmldsig_keys::loader::certificate_pem_to_der(CERT_PEM).unwrap());
        let cert = xmldsig_keys::loader::load_x509_cert_pem(CERT_PEM).unwrap();
        let ctx = DsigContext::new();

        let mut document = XmlDocument::parse(TEMPLATE.to_owned()).unwrap();
        let mut sig = signature(&document);
        sig.sign(&mut document, (&key).into(), &ctx).unwrap();

        let doc = document.parse_doc().unwrap();
        assert!(sig.is_signed(&doc).unwrap());
        assert_eq!(sig.signature_value(&doc).unwrap().len(), 256);
        assert_eq!(sig.x509_certificate(&doc).unwrap().as_deref(), key.certificate());
        assert!(sig.validate(&doc, (&cert).into(), None, &ctx).unwrap());
        assert!(sig.errors().is_empty());
    }

    #[test]
    fn test_callbacks() {
        let ctx = DsigContext::new();
        let mut document = XmlDocument::parse(TEMPLATE.to_owned()).unwrap();
        let mut sig = signature(&document);
        let sign = |data: &[u8], alg: &str| -> Result<Vec<u8>, Error> {
            assert_eq!(alg, algorithm::RSA_SHA256);
            Ok(data.iter().rev().copied().collect())
        };
        sig.sign(&mut document, SigningKeySource::Callback(&sign), &ctx)
            .unwrap();

        let doc = document.parse_doc().unwrap();
        let verify = |value: &[u8], data: &[u8], _: &str| value.iter().rev().eq(data.iter());
        assert!(sig
            .validate(&doc, VerificationSource::Callback(&verify), None, &ctx)
            .unwrap());

        let reject = |_: &[u8], _: &[u8], _: &str| false;
        assert!(!sig
            .validate(&doc, VerificationSource::Callback(&reject), None, &ctx)
            .unwrap());
        assert_eq!(sig.errors(), vec![ValidationError::Signature]);
    }

    #[test]
    fn test_garbage_signature_value_is_recorded() {
        let text = TEMPLATE.replace(
            "<ds:SignatureValue></ds:SignatureValue>",
            "<ds:SignatureValue>!!not base64!!</ds:SignatureValue>",
        );
        let document = XmlDocument::parse(text).unwrap();
        let doc = document.parse_doc().unwrap();
        let mut sig = signature(&document);
        let accept = |_: &[u8], _: &[u8], _: &str| true;
        assert!(!sig
            .validate(&doc, VerificationSource::Callback(&accept), None, &DsigContext::new())
            .unwrap());
        assert_eq!(
            sig.errors(),
            vec![ValidationError::DigestValue, ValidationError::Signature]
        );
    }
}
