#![forbid(unsafe_code)]

//! A `ds:Reference`: what is signed and how it is digested.

use crate::context::DsigContext;
use crate::encoding;
use crate::signature::signature_element;
use roxmltree::{Document, Node};
use xmldsig_core::{ns, Error, ValidationError};
use xmldsig_crypto::digest;
use xmldsig_transforms::{TransformChain, TransformData};
use xmldsig_xml::document::{find_child_element, find_child_elements, replace_content_edit, text_content};
use xmldsig_xml::TextEdit;

/// A reference inside a signature's `SignedInfo`.
///
/// The reference is a snapshot of the element's attributes; the element
/// itself is looked up again in whatever tree is passed in, so a reference
/// stays usable after the document text has been edited.
#[derive(Debug, Clone)]
pub struct Reference {
    signature_index: usize,
    index: usize,
    uri: String,
    digest_method: String,
    transforms: TransformChain,
    errors: Vec<ValidationError>,
}

impl Reference {
    /// Read the `index`-th `ds:Reference` of the signature at
    /// `signature_index` (document order over all signatures).
    pub(crate) fn from_element(
        node: Node<'_, '_>,
        signature_index: usize,
        index: usize,
    ) -> Result<Self, Error> {
        let digest_method = find_child_element(node, ns::DSIG, ns::node::DIGEST_METHOD)
            .ok_or_else(|| Error::MissingElement("DigestMethod".into()))?
            .attribute(ns::attr::ALGORITHM)
            .ok_or_else(|| Error::MissingAttribute("Algorithm on DigestMethod".into()))?
            .to_owned();
        if find_child_element(node, ns::DSIG, ns::node::DIGEST_VALUE).is_none() {
            return Err(Error::MissingElement("DigestValue".into()));
        }
        let transforms = TransformChain::from_transforms_element(find_child_element(
            node,
            ns::DSIG,
            ns::node::TRANSFORMS,
        ))?;
        Ok(Self {
            signature_index,
            index,
            uri: node.attribute(ns::attr::URI).unwrap_or("").to_owned(),
            digest_method,
            transforms,
            errors: Vec::new(),
        })
    }

    /// The `URI` attribute; `""` when absent.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The `DigestMethod` algorithm URI as written.
    pub fn digest_method(&self) -> &str {
        &self.digest_method
    }

    /// The transforms in execution order.
    pub fn transforms(&self) -> &TransformChain {
        &self.transforms
    }

    /// Failures recorded by the last validation.
    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Locate this reference's element in `doc`.
    pub fn element<'a, 'input>(&self, doc: &'a Document<'input>) -> Result<Node<'a, 'input>, Error> {
        let signature = signature_element(doc, self.signature_index)?;
        find_child_element(signature, ns::DSIG, ns::node::SIGNED_INFO)
            .map(|si| find_child_elements(si, ns::DSIG, ns::node::REFERENCE))
            .and_then(|refs| refs.get(self.index).copied())
            .ok_or_else(|| Error::MissingElement(format!("Reference #{}", self.index)))
    }

    /// The stored digest, decoded.
    pub fn digest_value(&self, doc: &Document<'_>) -> Result<Vec<u8>, Error> {
        encoding::decode(&text_content(self.digest_value_element(doc)?), "DigestValue")
    }

    /// The content this reference points at, before any transform.
    pub fn referenced_node(&self, doc: &Document<'_>, ctx: &DsigContext) -> Result<TransformData, Error> {
        ctx.resolver().resolve(&self.uri, doc, Some(self.element(doc)?))
    }

    /// Resolve, transform and digest the referenced content.
    pub fn calculate_digest_value(&self, doc: &Document<'_>, ctx: &DsigContext) -> Result<Vec<u8>, Error> {
        let data = self.transforms.apply(self.referenced_node(doc, ctx)?)?;
        let bytes = data.to_binary()?;
        tracing::debug!(
            uri = %self.uri,
            digest_method = %self.digest_method,
            len = bytes.len(),
            "computing reference digest"
        );
        Ok(digest::digest(&self.digest_method, &bytes))
    }

    /// Compute the digest and return the edit that stores it.
    pub(crate) fn sign(&self, doc: &Document<'_>, ctx: &DsigContext) -> Result<TextEdit, Error> {
        let value = self.calculate_digest_value(doc, ctx)?;
        replace_content_edit(self.digest_value_element(doc)?, &encoding::encode(&value))
    }

    /// Compare the stored digest with a freshly computed one.
    ///
    /// A mismatch, or a stored value that is not base64, records
    /// [`ValidationError::DigestValue`].  Resolution failures are returned
    /// as errors.
    pub fn validate_digest_value(&mut self, doc: &Document<'_>, ctx: &DsigContext) -> Result<bool, Error> {
        self.errors.clear();
        let computed = self.calculate_digest_value(doc, ctx)?;
        let matches = match self.digest_value(doc) {
            Ok(stored) => stored == computed,
            Err(Error::Base64(msg)) => {
                tracing::debug!(%msg, "stored digest is not base64");
                false
            }
            Err(e) => return Err(e),
        };
        if !matches {
            tracing::debug!(uri = %self.uri, "digest mismatch");
            self.errors.push(ValidationError::DigestValue);
        }
        Ok(matches)
    }

    fn digest_value_element<'a, 'input>(
        &self,
        doc: &'a Document<'input>,
    ) -> Result<Node<'a, 'input>, Error> {
        find_child_element(self.element(doc)?, ns::DSIG, ns::node::DIGEST_VALUE)
            .ok_or_else(|| Error::MissingElement("DigestValue".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xmldsig_core::algorithm;

    const TEMPLATE: &str = r##"<Envelope><Foo ID="foo">bar</Foo><ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:SignedInfo><ds:CanonicalizationMethod Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"/><ds:SignatureMethod Algorithm="http://www.w3.org/2001/04/xmldsig-more#rsa-sha256"/><ds:Reference URI="#foo"><ds:Transforms><ds:Transform Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"/><ds:Transform Algorithm="http://www.w3.org/2000/09/xmldsig#enveloped-signature"/></ds:Transforms><ds:DigestMethod Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"/><ds:DigestValue></ds:DigestValue></ds:Reference></ds:SignedInfo><ds:SignatureValue></ds:SignatureValue></ds:Signature></Envelope>"##;

    fn reference(doc: &Document<'_>) -> Reference {
        let node = doc.descendants().find(|n| n.has_tag_name((ns::DSIG, "Reference"))).unwrap();
        Reference::from_element(node, 0, 0).unwrap()
    }

    #[test]
    fn test_reads_reference() {
        let doc = xmldsig_xml::parse(TEMPLATE).unwrap();
        let r = reference(&doc);
        assert_eq!(r.uri(), "#foo");
        assert_eq!(r.digest_method(), algorithm::SHA256);
        assert_eq!(r.transforms().len(), 2);
        assert_eq!(r.transforms().transforms()[1].uri(), algorithm::EXC_C14N);
        assert!(r.digest_value(&doc).unwrap().is_empty());
    }

    #[test]
    fn test_digest_of_referenced_element() {
        let doc = xmldsig_xml::parse(TEMPLATE).unwrap();
        let digest = reference(&doc).calculate_digest_value(&doc, &DsigContext::new()).unwrap();
        assert_eq!(digest, digest::digest(algorithm::SHA256, br#"<Foo ID="foo">bar</Foo>"#));
    }

    #[test]
    fn test_validate_records_mismatch() {
        let doc = xmldsig_xml::parse(TEMPLATE).unwrap();
        let mut r = reference(&doc);
        assert!(!r.validate_digest_value(&doc, &DsigContext::new()).unwrap());
        assert_eq!(r.errors(), &[ValidationError::DigestValue]);
        // errors do not pile up across passes
        assert!(!r.validate_digest_value(&doc, &DsigContext::new()).unwrap());
        assert_eq!(r.errors().len(), 1);
    }

    #[test]
    fn test_sign_then_validate() {
        let ctx = DsigContext::new();
        let mut document = xmldsig_xml::XmlDocument::parse(TEMPLATE.to_owned()).unwrap();
        let edit = {
            let doc = document.parse_doc().unwrap();
            reference(&doc).sign(&doc, &ctx).unwrap()
        };
        document.apply_edits(vec![edit]).unwrap();
        let doc = document.parse_doc().unwrap();
        let mut r = reference(&doc);
        assert!(r.validate_digest_value(&doc, &ctx).unwrap());
        assert!(r.errors().is_empty());
    }

    #[test]
    fn test_missing_target_is_error() {
        let text = TEMPLATE.replace("ID=\"foo\"", "ID=\"other\"");
        let doc = xmldsig_xml::parse(&text).unwrap();
        let mut r = reference(&doc);
        let err = r.validate_digest_value(&doc, &DsigContext::new()).unwrap_err();
        assert!(matches!(err, Error::ReferencedNodeNotFound(_)));
    }

    #[test]
    fn test_missing_digest_method() {
        let doc = xmldsig_xml::parse(
            r#"<Reference xmlns="http://www.w3.org/2000/09/xmldsig#"><DigestValue/></Reference>"#,
        )
        .unwrap();
        assert!(matches!(
            Reference::from_element(doc.root_element(), 0, 0),
            Err(Error::MissingElement(_))
        ));
    }
}
