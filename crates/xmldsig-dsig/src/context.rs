#![forbid(unsafe_code)]

//! DSig context: options shared by every signature of a document.

use std::collections::HashMap;
use xmldsig_transforms::UriResolver;

/// Context for XML-DSig operations.
#[derive(Debug, Clone, Default)]
pub struct DsigContext {
    /// Attribute that carries element ids (`MyID`, `wsu:Id`).  When unset,
    /// `ID` and `wsu:Id` are searched.
    pub id_attr: Option<String>,
    /// Re-sign signatures that already carry a `SignatureValue`.
    pub force: bool,
    /// Content for references that point outside the document, keyed by
    /// content id or file name.
    pub referenced_documents: HashMap<String, Vec<u8>>,
}

impl DsigContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up same-document references in `name` instead of `ID`/`wsu:Id`.
    pub fn with_id_attr(mut self, name: impl Into<String>) -> Self {
        self.id_attr = Some(name.into());
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Register external content for `cid:` and file name references.
    pub fn add_referenced_document(&mut self, id: impl Into<String>, data: Vec<u8>) {
        self.referenced_documents.insert(id.into(), data);
    }

    pub(crate) fn resolver(&self) -> UriResolver<'_> {
        UriResolver::new(&self.referenced_documents).with_id_attr(self.id_attr.as_deref())
    }
}
