#![forbid(unsafe_code)]

//! Inclusive Canonical XML 1.0 (C14N 1.0).
//!
//! Algorithm URI: `http://www.w3.org/TR/2001/REC-xml-c14n-20010315`
//! With comments: `http://www.w3.org/TR/2001/REC-xml-c14n-20010315#WithComments`
//!
//! The canonical form:
//! - Outputs namespace declarations sorted by prefix (default first)
//! - Outputs attributes sorted by (namespace-URI, local-name)
//! - Escapes text and attribute values per C14N rules
//! - Optionally preserves or strips comments
//! - Supports document-subset canonicalization via NodeSet
//!
//! The walker is shared with C14N 1.1, which only changes which `xml:*`
//! attributes a subset apex inherits.

use crate::render::{inherited_xml_attrs, NsContext, NsDecl, Output};
use roxmltree::{Document, Node, NodeType};
use xmldsig_core::Error;
use xmldsig_xml::document::QualifiedNames;
use xmldsig_xml::NodeSet;

/// Which `xml:*` attributes flow into a document-subset apex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum XmlAttrInheritance {
    /// C14N 1.0: every `xml:*` attribute.
    All,
    /// C14N 1.1: `xml:lang` and `xml:space` only.
    LangAndSpace,
}

/// Canonicalize a document using Inclusive C14N 1.0.
pub fn canonicalize(
    doc: &Document<'_>,
    with_comments: bool,
    node_set: Option<&NodeSet>,
) -> Result<Vec<u8>, Error> {
    canonicalize_with(doc, with_comments, node_set, XmlAttrInheritance::All)
}

pub(crate) fn canonicalize_with(
    doc: &Document<'_>,
    with_comments: bool,
    node_set: Option<&NodeSet>,
    inheritance: XmlAttrInheritance,
) -> Result<Vec<u8>, Error> {
    let mut ctx = C14nContext {
        out: Output::new(with_comments, node_set),
        inheritance,
    };
    ctx.process_node(doc.root(), &NsContext::new());
    Ok(ctx.out.bytes)
}

struct C14nContext<'s> {
    out: Output<'s>,
    inheritance: XmlAttrInheritance,
}

impl C14nContext<'_> {
    fn process_node(&mut self, node: Node<'_, '_>, rendered: &NsContext) {
        match node.node_type() {
            NodeType::Root => {
                for child in node.children() {
                    self.process_node(child, rendered);
                }
            }
            NodeType::Element => self.process_element(node, rendered),
            _ => self.out.leaf(node),
        }
    }

    fn process_element(&mut self, node: Node<'_, '_>, rendered: &NsContext) {
        if !self.out.is_visible(node) {
            // Invisible elements contribute only their visible descendants,
            // which still compare against the nearest rendered ancestor.
            for child in node.children() {
                self.process_node(child, rendered);
            }
            return;
        }

        let visible_ns = self.out.visible_namespaces(node);

        let mut ns_decls: Vec<NsDecl> = visible_ns
            .iter()
            .filter(|(prefix, uri)| rendered.get(*prefix) != Some(*uri))
            .map(|(prefix, uri)| NsDecl {
                prefix: prefix.clone(),
                uri: uri.clone(),
            })
            .collect();

        // An element outside the default namespace under an output ancestor
        // that declared one must undeclare it.
        let inherited_default = rendered.get("").is_some_and(|uri| !uri.is_empty());
        if inherited_default && !visible_ns.contains_key("") {
            ns_decls.push(NsDecl {
                prefix: String::new(),
                uri: String::new(),
            });
        }
        ns_decls.sort();

        let names = QualifiedNames::of(node);
        let mut attrs = self.out.visible_attributes(node, &names);

        if self.out.node_set.is_some() {
            let parent_rendered = node
                .parent()
                .is_some_and(|p| p.is_element() && self.out.is_visible(p));
            if !parent_rendered {
                let only: Option<&[&str]> = match self.inheritance {
                    XmlAttrInheritance::All => None,
                    XmlAttrInheritance::LangAndSpace => Some(&["lang", "space"]),
                };
                let extra = inherited_xml_attrs(node, &attrs, only);
                attrs.extend(extra);
            }
        }
        attrs.sort();

        self.out.start_tag(&names.element, &ns_decls, &attrs);

        let mut child_ns = visible_ns;
        if inherited_default && !child_ns.contains_key("") {
            child_ns.insert(String::new(), String::new());
        }
        for child in node.children() {
            self.process_node(child, &child_ns);
        }

        self.out.end_tag(&names.element);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c14n(xml: &str) -> String {
        let doc = xmldsig_xml::parse(xml).unwrap();
        String::from_utf8(canonicalize(&doc, false, None).unwrap()).unwrap()
    }

    fn c14n_subtree(xml: &str, name: &str) -> String {
        let doc = xmldsig_xml::parse(xml).unwrap();
        let node = doc.descendants().find(|n| n.has_tag_name(name)).unwrap();
        let set = NodeSet::tree_without_comments(node);
        String::from_utf8(canonicalize(&doc, false, Some(&set)).unwrap()).unwrap()
    }

    #[test]
    fn test_simple_c14n() {
        // Attributes sorted by local name, empty elements expanded.
        assert_eq!(c14n(r#"<root><a b="1" a="2"/></root>"#), r#"<root><a a="2" b="1"></a></root>"#);
    }

    #[test]
    fn test_namespace_rendering() {
        let out = c14n(r#"<root xmlns:b="http://b" xmlns:a="http://a"><a:child xmlns:a="http://a"/></root>"#);
        assert_eq!(
            out,
            r#"<root xmlns:a="http://a" xmlns:b="http://b"><a:child></a:child></root>"#
        );
    }

    #[test]
    fn test_text_escaping() {
        assert_eq!(c14n("<root>a &amp; b &lt; c &gt; d</root>"), "<root>a &amp; b &lt; c &gt; d</root>");
        assert_eq!(c14n(r#"<r a="x&#9;&quot;"/>"#), r#"<r a="x&#x9;&quot;"></r>"#);
    }

    #[test]
    fn test_quote_and_whitespace_normalization() {
        assert_eq!(
            c14n("<?xml version=\"1.0\"?>\n<r   b='2'\n a='1' ><e\n/></r>"),
            r#"<r a="1" b="2"><e></e></r>"#
        );
    }

    #[test]
    fn test_comments_stripped() {
        assert_eq!(c14n("<!--lead--><r><!--x-->t</r>"), "<r>t</r>");
    }

    #[test]
    fn test_subtree_inherits_namespaces() {
        let xml = r#"<root xmlns="urn:d" xmlns:p="urn:p"><p:a>t</p:a></root>"#;
        assert_eq!(c14n_subtree(xml, "a"), r#"<p:a xmlns="urn:d" xmlns:p="urn:p">t</p:a>"#);
    }

    #[test]
    fn test_default_namespace_undeclared() {
        let xml = r#"<root xmlns="urn:d"><a xmlns=""/></root>"#;
        assert_eq!(c14n(xml), r#"<root xmlns="urn:d"><a xmlns=""></a></root>"#);
        // Redundant undeclarations are dropped.
        assert_eq!(c14n(r#"<root><a xmlns=""/></root>"#), "<root><a></a></root>");
    }

    #[test]
    fn test_subtree_inherits_xml_attributes() {
        let xml = r#"<root xml:lang="en" xml:space="preserve"><a>t</a></root>"#;
        assert_eq!(
            c14n_subtree(xml, "a"),
            r#"<a xml:lang="en" xml:space="preserve">t</a>"#
        );
    }
}
