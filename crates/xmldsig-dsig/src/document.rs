#![forbid(unsafe_code)]

//! Documents carrying one or more signatures.
//!
//! Signatures are listed outermost-first but signed innermost-first, so an
//! outer signature covering an inner one digests the inner signature in
//! its final form.

use crate::context::DsigContext;
use crate::schema::Schema;
use crate::signature::{Signature, SigningKeySource, VerificationSource};
use std::cmp::Reverse;
use xmldsig_core::{ns, Error};
use xmldsig_transforms::TransformData;
use xmldsig_xml::XmlDocument;

/// An XML document together with the options used to sign and verify it.
#[derive(Debug, Clone)]
pub struct SignedDocument {
    document: XmlDocument,
    ctx: DsigContext,
}

impl SignedDocument {
    /// Parse `xml` with default options.  Malformed XML is rejected here.
    pub fn new(xml: impl Into<String>) -> Result<Self, Error> {
        Self::with_context(xml, DsigContext::default())
    }

    pub fn with_context(xml: impl Into<String>, ctx: DsigContext) -> Result<Self, Error> {
        Ok(Self::from_document(XmlDocument::parse(xml.into())?, ctx))
    }

    pub fn from_document(document: XmlDocument, ctx: DsigContext) -> Self {
        Self { document, ctx }
    }

    pub fn document(&self) -> &XmlDocument {
        &self.document
    }

    pub fn context(&self) -> &DsigContext {
        &self.ctx
    }

    /// Serialize the document, with or without an XML declaration.
    pub fn to_xml(&self, emit_declaration: bool) -> Result<String, Error> {
        self.document.to_xml(emit_declaration)
    }

    /// All signatures, outermost first.
    pub fn signatures(&self) -> Result<Vec<Signature>, Error> {
        let mut signatures = self.read_signatures()?;
        signatures.sort_by_key(|s| (s.depth(), s.index()));
        Ok(signatures)
    }

    /// All signatures in the order they are signed: innermost first.
    pub fn signing_order(&self) -> Result<Vec<Signature>, Error> {
        let mut signatures = self.read_signatures()?;
        signatures.sort_by_key(|s| (Reverse(s.depth()), Reverse(s.index())));
        Ok(signatures)
    }

    /// Sign every unsigned signature (every signature when `force` is set)
    /// and return the serialized result.
    pub fn sign(
        &mut self,
        key: SigningKeySource<'_>,
        emit_declaration: bool,
    ) -> Result<String, Error> {
        for mut signature in self.signing_order()? {
            let unsigned = {
                let doc = self.document.parse_doc()?;
                signature.is_unsigned(&doc)?
            };
            if unsigned || self.ctx.force {
                self.sign_signature(&mut signature, key)?;
            } else {
                tracing::debug!(index = signature.index(), "already signed, skipping");
            }
        }
        self.to_xml(emit_declaration)
    }

    /// Sign a single signature in place, leaving the others untouched.
    pub fn sign_signature(
        &mut self,
        signature: &mut Signature,
        key: SigningKeySource<'_>,
    ) -> Result<(), Error> {
        signature.sign(&mut self.document, key, &self.ctx)
    }

    /// Validate every signature and return them with their errors filled in.
    pub fn validate_signatures(
        &self,
        verifier: VerificationSource<'_>,
        schema: Option<&Schema>,
    ) -> Result<Vec<Signature>, Error> {
        let doc = self.document.parse_doc()?;
        let mut signatures = self.signatures()?;
        for signature in &mut signatures {
            signature.validate(&doc, verifier, schema, &self.ctx)?;
        }
        Ok(signatures)
    }

    /// True when the document has at least one signature and all of them
    /// validate.
    pub fn validate(
        &self,
        verifier: VerificationSource<'_>,
        schema: Option<&Schema>,
    ) -> Result<bool, Error> {
        let signatures = self.validate_signatures(verifier, schema)?;
        if signatures.is_empty() {
            tracing::debug!("document has no signatures");
            return Ok(false);
        }
        Ok(signatures.iter().all(|s| s.errors().is_empty()))
    }

    /// The content referenced by every reference of every signature, for
    /// inspection.
    pub fn signed_nodes(&self) -> Result<Vec<TransformData>, Error> {
        let doc = self.document.parse_doc()?;
        let mut nodes = Vec::new();
        for signature in self.signatures()? {
            for reference in signature.references() {
                nodes.push(reference.referenced_node(&doc, &self.ctx)?);
            }
        }
        Ok(nodes)
    }

    fn read_signatures(&self) -> Result<Vec<Signature>, Error> {
        let doc = self.document.parse_doc()?;
        XmlDocument::find_elements(&doc, ns::DSIG, ns::node::SIGNATURE)
            .into_iter()
            .enumerate()
            .map(|(i, node)| Signature::from_element(node, i))
            .collect()
    }
}
