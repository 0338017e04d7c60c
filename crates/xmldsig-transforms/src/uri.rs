#![forbid(unsafe_code)]

//! URI resolution for XML-DSig references.
//!
//! Handles:
//! - Empty URI (`""`): the whole document
//! - Content ids (`cid:...`) and bare file names (`invoice.pdf`): looked up
//!   in the caller supplied referenced documents
//! - Absolute location paths (`/root/child`): the first element selected
//! - Same-document references (`#id`): the element carrying that id
//!
//! The result is always a fresh [`TransformData`]; the source tree is never
//! touched.

use crate::pipeline::TransformData;
use roxmltree::{Document, Node};
use std::collections::HashMap;
use xmldsig_core::{ns, Error};
use xmldsig_xml::xpath::{XNode, XPath};
use xmldsig_xml::{IdAttribute, NodeSet, XmlDocument};

const CONTENT_ID_SCHEME: &str = "cid:";

/// How a `Reference` URI addresses its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UriKind<'u> {
    /// The document root.
    Document,
    /// Content outside the tree, keyed by this name.
    External(&'u str),
    /// An absolute location path.
    Path(&'u str),
    /// A same-document id, without the leading `#`.
    Fragment(&'u str),
}

impl<'u> UriKind<'u> {
    /// Classify `uri`.  With an id attribute override, `cid:` URIs are
    /// treated as fragments.
    pub fn classify(uri: &'u str, id_attr_override: bool) -> Self {
        if uri.is_empty() {
            return UriKind::Document;
        }
        if !id_attr_override {
            if let Some(cid) = uri.strip_prefix(CONTENT_ID_SCHEME) {
                return UriKind::External(cid);
            }
        }
        if looks_like_file_name(uri) {
            return UriKind::External(uri);
        }
        if uri.starts_with('/') {
            return UriKind::Path(uri);
        }
        UriKind::Fragment(uri.strip_prefix('#').unwrap_or(uri))
    }
}

/// `report.pdf`, `attachments/a.xml`: a last path segment with a stem and
/// a non-empty alphanumeric extension.
fn looks_like_file_name(uri: &str) -> bool {
    if uri.starts_with('#') {
        return false;
    }
    let tail = uri.rsplit('/').next().unwrap_or(uri);
    match tail.rsplit_once('.') {
        Some((stem, ext)) => {
            !stem.is_empty() && !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric())
        }
        None => false,
    }
}

/// Resolves reference URIs against a document.
#[derive(Debug, Clone, Copy)]
pub struct UriResolver<'c> {
    id_attr: Option<&'c str>,
    referenced_documents: &'c HashMap<String, Vec<u8>>,
}

impl<'c> UriResolver<'c> {
    pub fn new(referenced_documents: &'c HashMap<String, Vec<u8>>) -> Self {
        Self {
            id_attr: None,
            referenced_documents,
        }
    }

    /// Look ids up in this attribute instead of `ID` / `wsu:Id`.
    pub fn with_id_attr(mut self, id_attr: Option<&'c str>) -> Self {
        self.id_attr = id_attr;
        self
    }

    /// Resolve `uri` within `doc`.
    ///
    /// `reference` is the `ds:Reference` element the URI came from; its
    /// in-scope namespaces are used for prefixes in location paths.
    pub fn resolve(
        &self,
        uri: &str,
        doc: &Document<'_>,
        reference: Option<Node<'_, '_>>,
    ) -> Result<TransformData, Error> {
        let kind = UriKind::classify(uri, self.id_attr.is_some());
        tracing::debug!(uri, ?kind, "resolving reference URI");
        match kind {
            UriKind::Document => Ok(self.subset(doc, NodeSet::all(doc))),
            UriKind::External(name) => self.external(uri, name),
            UriKind::Path(path) => {
                let node = select_path(path, doc, reference)?;
                Ok(self.subset(doc, NodeSet::tree_with_comments(node)))
            }
            UriKind::Fragment(id) => {
                let node = self.find_by_id(doc, id)?;
                Ok(self.subset(doc, NodeSet::tree_with_comments(node)))
            }
        }
    }

    /// Find the element a same-document id points at.
    pub fn find_by_id<'a, 'input>(
        &self,
        doc: &'a Document<'input>,
        id: &str,
    ) -> Result<Node<'a, 'input>, Error> {
        let attrs = match self.id_attr {
            Some(name) => vec![IdAttribute::new(name)],
            None => vec![IdAttribute::id(), IdAttribute::wsu_id()],
        };
        XmlDocument::find_by_id(doc, &attrs, id)
    }

    fn subset(&self, doc: &Document<'_>, set: NodeSet) -> TransformData {
        TransformData::Xml {
            xml_text: doc.input_text().to_owned(),
            node_set: Some(set),
        }
    }

    fn external(&self, uri: &str, name: &str) -> Result<TransformData, Error> {
        self.referenced_documents
            .get(uri)
            .or_else(|| self.referenced_documents.get(name))
            .map(|data| TransformData::Binary(data.clone()))
            .ok_or_else(|| {
                Error::ReferencedNodeNotFound(format!("no referenced document for '{uri}'"))
            })
    }
}

fn select_path<'a, 'input>(
    path: &str,
    doc: &'a Document<'input>,
    reference: Option<Node<'_, '_>>,
) -> Result<Node<'a, 'input>, Error> {
    let mut namespaces: HashMap<String, String> = ns::PREFIXES
        .iter()
        .map(|(p, uri)| ((*p).to_owned(), (*uri).to_owned()))
        .collect();
    if let Some(reference) = reference {
        for n in reference.namespaces() {
            if let Some(prefix) = n.name() {
                namespaces.insert(prefix.to_owned(), n.uri().to_owned());
            }
        }
    }
    let xpath = XPath::parse(path, &namespaces)?;
    xpath
        .select(XNode::Node(doc.root()))?
        .into_iter()
        .filter_map(|n| match n {
            XNode::Node(node) if node.is_element() => Some(node),
            _ => None,
        })
        .min_by_key(|n| n.range().start)
        .ok_or_else(|| Error::ReferencedNodeNotFound(format!("no element matches '{path}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<r xmlns:wsu="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd"><a ID="one">1<!--c--></a><b wsu:Id="two">2</b><c MyID="three">3</c></r>"#;

    fn resolve(resolver: UriResolver<'_>, uri: &str) -> Result<Vec<u8>, Error> {
        let doc = xmldsig_xml::parse(DOC).unwrap();
        resolver.resolve(uri, &doc, None)?.to_binary()
    }

    #[test]
    fn test_classify() {
        assert_eq!(UriKind::classify("", false), UriKind::Document);
        assert_eq!(UriKind::classify("cid:part1", false), UriKind::External("part1"));
        assert_eq!(UriKind::classify("cid:part1", true), UriKind::Fragment("cid:part1"));
        assert_eq!(UriKind::classify("invoice.pdf", false), UriKind::External("invoice.pdf"));
        assert_eq!(UriKind::classify("/r/a", false), UriKind::Path("/r/a"));
        assert_eq!(UriKind::classify("#foo", false), UriKind::Fragment("foo"));
        assert_eq!(UriKind::classify("#foo.bar", false), UriKind::Fragment("foo.bar"));
        assert_eq!(UriKind::classify("foo.", false), UriKind::Fragment("foo."));
    }

    #[test]
    fn test_whole_document() {
        let empty = HashMap::new();
        assert_eq!(
            resolve(UriResolver::new(&empty), "").unwrap(),
            br#"<r xmlns:wsu="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd"><a ID="one">1</a><b wsu:Id="two">2</b><c MyID="three">3</c></r>"#
        );
    }

    #[test]
    fn test_fragment_ids() {
        let empty = HashMap::new();
        let resolver = UriResolver::new(&empty);
        assert_eq!(resolve(resolver, "#one").unwrap(), br#"<a xmlns:wsu="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd" ID="one">1</a>"#);
        assert!(resolve(resolver, "#two").unwrap().ends_with(br#"wsu:Id="two">2</b>"#));
        let err = resolve(resolver, "#three").unwrap_err();
        assert!(matches!(err, Error::ReferencedNodeNotFound(_)));
    }

    #[test]
    fn test_id_attr_override() {
        let empty = HashMap::new();
        let resolver = UriResolver::new(&empty).with_id_attr(Some("MyID"));
        assert!(resolve(resolver, "#three").unwrap().ends_with(br#"MyID="three">3</c>"#));
        assert!(resolve(resolver, "#one").is_err());
    }

    #[test]
    fn test_injection_is_data() {
        let empty = HashMap::new();
        let err = resolve(UriResolver::new(&empty), "#x' or '1'='1").unwrap_err();
        assert!(err.is_reference_resolution());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let empty = HashMap::new();
        let doc = xmldsig_xml::parse(r#"<r><a ID="x"/><b ID="x"/></r>"#).unwrap();
        let err = UriResolver::new(&empty).resolve("#x", &doc, None).unwrap_err();
        assert!(matches!(err, Error::AmbiguousReference(_)));
    }

    #[test]
    fn test_referenced_documents() {
        let mut docs = HashMap::new();
        docs.insert("part1".to_owned(), b"payload".to_vec());
        docs.insert("invoice.pdf".to_owned(), b"%PDF".to_vec());
        let resolver = UriResolver::new(&docs);
        assert_eq!(resolve(resolver, "cid:part1").unwrap(), b"payload");
        assert_eq!(resolve(resolver, "invoice.pdf").unwrap(), b"%PDF");
        assert!(matches!(
            resolve(resolver, "cid:missing").unwrap_err(),
            Error::ReferencedNodeNotFound(_)
        ));
    }

    #[test]
    fn test_absolute_path() {
        let empty = HashMap::new();
        let resolver = UriResolver::new(&empty);
        assert!(resolve(resolver, "/r/c").unwrap().ends_with(br#"MyID="three">3</c>"#));
        assert!(matches!(
            resolve(resolver, "/r/missing").unwrap_err(),
            Error::ReferencedNodeNotFound(_)
        ));
    }
}
