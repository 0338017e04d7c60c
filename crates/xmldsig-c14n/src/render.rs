#![forbid(unsafe_code)]

//! Shared rendering utilities for C14N output.

use crate::escape;
use roxmltree::{Node, NodeType};
use std::collections::BTreeMap;
use xmldsig_core::ns;
use xmldsig_xml::document::{prefix_of, QualifiedNames};
use xmldsig_xml::NodeSet;

/// Namespace bindings rendered on the nearest output ancestor, keyed by
/// prefix (`""` for the default namespace).
pub type NsContext = BTreeMap<String, String>;

/// A namespace declaration to be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsDecl {
    /// The prefix ("" for default namespace).
    pub prefix: String,
    /// The namespace URI.
    pub uri: String,
}

impl NsDecl {
    /// Render this namespace declaration to a string.
    pub fn render(&self) -> String {
        if self.prefix.is_empty() {
            format!(" xmlns=\"{}\"", escape::escape_attr(&self.uri))
        } else {
            format!(
                " xmlns:{}=\"{}\"",
                self.prefix,
                escape::escape_attr(&self.uri)
            )
        }
    }
}

impl Ord for NsDecl {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // "" sorts before any other prefix.
        self.prefix.cmp(&other.prefix)
    }
}

impl PartialOrd for NsDecl {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// An attribute to be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    /// The namespace URI of the attribute ("" for no namespace).
    pub ns_uri: String,
    /// The local name.
    pub local_name: String,
    /// The qualified name as written in the source.
    pub qualified_name: String,
    /// The attribute value.
    pub value: String,
}

impl Attr {
    /// Render this attribute to a string.
    pub fn render(&self) -> String {
        format!(
            " {}=\"{}\"",
            self.qualified_name,
            escape::escape_attr(&self.value)
        )
    }

    /// The prefix this attribute visibly uses, if any.
    pub fn prefix(&self) -> Option<&str> {
        match prefix_of(&self.qualified_name) {
            "" => None,
            p => Some(p),
        }
    }
}

impl Ord for Attr {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Unqualified attributes first, then by (namespace URI, local name).
        match (self.ns_uri.is_empty(), other.ns_uri.is_empty()) {
            (true, true) => self.local_name.cmp(&other.local_name),
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            (false, false) => self
                .ns_uri
                .cmp(&other.ns_uri)
                .then(self.local_name.cmp(&other.local_name)),
        }
    }
}

impl PartialOrd for Attr {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Output buffer plus the node-set filter shared by every C14N variant.
pub struct Output<'s> {
    pub bytes: Vec<u8>,
    pub with_comments: bool,
    pub node_set: Option<&'s NodeSet>,
}

impl<'s> Output<'s> {
    pub fn new(with_comments: bool, node_set: Option<&'s NodeSet>) -> Self {
        Self {
            bytes: Vec::new(),
            with_comments,
            node_set,
        }
    }

    pub fn is_visible(&self, node: Node<'_, '_>) -> bool {
        self.node_set.map_or(true, |set| set.contains(node))
    }

    /// In-scope namespace bindings of `node` whose namespace nodes are in
    /// the node set.  The `xml` binding and default-namespace undeclarations
    /// are left out.
    pub fn visible_namespaces(&self, node: Node<'_, '_>) -> NsContext {
        node.namespaces()
            .filter(|ns| ns.name() != Some("xml") && !ns.uri().is_empty())
            .map(|ns| (ns.name().unwrap_or("").to_owned(), ns.uri().to_owned()))
            .filter(|(prefix, _)| {
                self.node_set
                    .map_or(true, |set| set.contains_namespace(node, prefix))
            })
            .collect()
    }

    /// Attributes of `node` that are in the node set, unsorted.
    pub fn visible_attributes(&self, node: Node<'_, '_>, names: &QualifiedNames) -> Vec<Attr> {
        node.attributes()
            .enumerate()
            .filter(|(i, _)| self.node_set.map_or(true, |set| set.contains_attribute(node, *i)))
            .map(|(i, attr)| Attr {
                ns_uri: attr.namespace().unwrap_or("").to_owned(),
                local_name: attr.name().to_owned(),
                qualified_name: names
                    .attributes
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| attr.name().to_owned()),
                value: attr.value().to_owned(),
            })
            .collect()
    }

    pub fn start_tag(&mut self, name: &str, ns_decls: &[NsDecl], attrs: &[Attr]) {
        self.bytes.push(b'<');
        self.bytes.extend_from_slice(name.as_bytes());
        for decl in ns_decls {
            self.bytes.extend_from_slice(decl.render().as_bytes());
        }
        for attr in attrs {
            self.bytes.extend_from_slice(attr.render().as_bytes());
        }
        self.bytes.push(b'>');
    }

    pub fn end_tag(&mut self, name: &str) {
        self.bytes.extend_from_slice(b"</");
        self.bytes.extend_from_slice(name.as_bytes());
        self.bytes.push(b'>');
    }

    /// Render a text, comment or processing-instruction node.
    pub fn leaf(&mut self, node: Node<'_, '_>) {
        if !self.is_visible(node) {
            return;
        }
        match node.node_type() {
            NodeType::Text => {
                let text = node.text().unwrap_or("");
                self.bytes.extend_from_slice(escape::escape_text(text).as_bytes());
            }
            NodeType::Comment if self.with_comments => {
                let top_level = self.before_top_level(node);
                self.bytes.extend_from_slice(b"<!--");
                self.bytes.extend_from_slice(node.text().unwrap_or("").as_bytes());
                self.bytes.extend_from_slice(b"-->");
                self.after_top_level(node, top_level);
            }
            NodeType::PI => {
                let Some(pi) = node.pi() else { return };
                let top_level = self.before_top_level(node);
                self.bytes.extend_from_slice(b"<?");
                self.bytes.extend_from_slice(pi.target.as_bytes());
                if let Some(value) = pi.value.filter(|v| !v.is_empty()) {
                    self.bytes.push(b' ');
                    self.bytes.extend_from_slice(escape::escape_pi(value).as_bytes());
                }
                self.bytes.extend_from_slice(b"?>");
                self.after_top_level(node, top_level);
            }
            _ => {}
        }
    }

    // Comments and PIs outside the document element are separated from it
    // by a single line feed.
    fn before_top_level(&mut self, node: Node<'_, '_>) -> bool {
        let top_level = node.parent().is_some_and(|p| p.node_type() == NodeType::Root);
        let after_root = std::iter::successors(node.prev_sibling(), |n| n.prev_sibling())
            .any(|s| s.is_element());
        if top_level && after_root {
            self.bytes.push(b'\n');
        }
        top_level
    }

    fn after_top_level(&mut self, node: Node<'_, '_>, top_level: bool) {
        let before_root = std::iter::successors(node.next_sibling(), |n| n.next_sibling())
            .any(|s| s.is_element());
        if top_level && before_root {
            self.bytes.push(b'\n');
        }
    }
}

/// `xml:*` attributes a document-subset apex inherits from its ancestors.
///
/// `only` restricts the inherited names (C14N 1.1 inherits `lang` and
/// `space` only); `None` inherits every `xml:*` attribute.
pub fn inherited_xml_attrs(node: Node<'_, '_>, existing: &[Attr], only: Option<&[&str]>) -> Vec<Attr> {
    let mut inherited: BTreeMap<&str, &str> = BTreeMap::new();
    for ancestor in node.ancestors().skip(1).filter(|a| a.is_element()) {
        for attr in ancestor.attributes() {
            if attr.namespace() != Some(ns::XML) {
                continue;
            }
            if only.is_some_and(|names| !names.contains(&attr.name())) {
                continue;
            }
            inherited.entry(attr.name()).or_insert(attr.value());
        }
    }

    inherited
        .into_iter()
        .filter(|(name, _)| {
            !existing
                .iter()
                .any(|a| a.ns_uri == ns::XML && a.local_name == *name)
        })
        .map(|(name, value)| Attr {
            ns_uri: ns::XML.to_owned(),
            local_name: name.to_owned(),
            qualified_name: format!("xml:{name}"),
            value: value.to_owned(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ns_decl_order() {
        let mut decls = vec![
            NsDecl { prefix: "b".into(), uri: "urn:b".into() },
            NsDecl { prefix: String::new(), uri: "urn:d".into() },
            NsDecl { prefix: "a".into(), uri: "urn:a".into() },
        ];
        decls.sort();
        let prefixes: Vec<_> = decls.iter().map(|d| d.prefix.as_str()).collect();
        assert_eq!(prefixes, vec!["", "a", "b"]);
    }

    #[test]
    fn test_attr_order_by_namespace_then_name() {
        let attr = |ns: &str, local: &str| Attr {
            ns_uri: ns.into(),
            local_name: local.into(),
            qualified_name: local.into(),
            value: String::new(),
        };
        let mut attrs = vec![attr("urn:z", "a"), attr("", "z"), attr("urn:a", "b"), attr("", "a")];
        attrs.sort();
        let order: Vec<_> = attrs
            .iter()
            .map(|a| format!("{}|{}", a.ns_uri, a.local_name))
            .collect();
        assert_eq!(order, vec!["|a", "|z", "urn:a|b", "urn:z|a"]);
    }
}
