#![forbid(unsafe_code)]

//! Exclusive Canonical XML 1.0 (exc-C14N).
//!
//! Algorithm URI: `http://www.w3.org/2001/10/xml-exc-c14n#`
//! With comments: `http://www.w3.org/2001/10/xml-exc-c14n#WithComments`
//!
//! The key difference from inclusive C14N: only "visibly utilized" namespace
//! declarations are output.  A namespace is visibly utilized if:
//! 1. Its prefix is used by the element's tag name (`""` when unprefixed), OR
//! 2. Its prefix is used by one of the element's attributes, OR
//! 3. The prefix appears in the InclusiveNamespaces PrefixList
//!    (`#default` naming the default namespace).
//!
//! `xml:*` attributes are never inherited into a subset apex.

use crate::render::{NsContext, NsDecl, Output};
use roxmltree::{Document, Node, NodeType};
use std::collections::BTreeSet;
use xmldsig_core::Error;
use xmldsig_xml::document::QualifiedNames;
use xmldsig_xml::NodeSet;

/// Canonicalize using Exclusive C14N 1.0.
pub fn canonicalize(
    doc: &Document<'_>,
    with_comments: bool,
    node_set: Option<&NodeSet>,
    inclusive_prefixes: &[String],
) -> Result<Vec<u8>, Error> {
    let forced = inclusive_prefixes
        .iter()
        .map(|p| if p == "#default" { String::new() } else { p.clone() })
        .collect();
    let mut ctx = ExcC14nContext {
        out: Output::new(with_comments, node_set),
        forced,
    };
    ctx.process_node(doc.root(), &NsContext::new());
    Ok(ctx.out.bytes)
}

struct ExcC14nContext<'s> {
    out: Output<'s>,
    forced: BTreeSet<String>,
}

impl ExcC14nContext<'_> {
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
            for child in node.children() {
                self.process_node(child, rendered);
            }
            return;
        }

        let names = QualifiedNames::of(node);
        let mut attrs = self.out.visible_attributes(node, &names);
        attrs.sort();

        let mut utilized: BTreeSet<String> = self.forced.clone();
        utilized.insert(names.element_prefix().to_owned());
        for prefix in attrs.iter().filter_map(|a| a.prefix()) {
            if prefix != "xml" {
                utilized.insert(prefix.to_owned());
            }
        }

        let in_scope = self.out.visible_namespaces(node);
        let mut ns_decls: Vec<NsDecl> = Vec::new();
        for prefix in &utilized {
            match in_scope.get(prefix) {
                Some(uri) if rendered.get(prefix) != Some(uri) => ns_decls.push(NsDecl {
                    prefix: prefix.clone(),
                    uri: uri.clone(),
                }),
                Some(_) => {}
                None if prefix.is_empty() => {
                    // Element outside any default namespace below an output
                    // ancestor that rendered one.
                    if rendered.get("").is_some_and(|uri| !uri.is_empty()) {
                        ns_decls.push(NsDecl {
                            prefix: String::new(),
                            uri: String::new(),
                        });
                    }
                }
                None => {}
            }
        }
        ns_decls.sort();

        self.out.start_tag(&names.element, &ns_decls, &attrs);

        let mut child_rendered = rendered.clone();
        for decl in &ns_decls {
            child_rendered.insert(decl.prefix.clone(), decl.uri.clone());
        }
        for child in node.children() {
            self.process_node(child, &child_rendered);
        }

        self.out.end_tag(&names.element);
    }
}
