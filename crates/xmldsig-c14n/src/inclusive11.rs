#![forbid(unsafe_code)]

//! Inclusive Canonical XML 1.1 (C14N 1.1).
//!
//! Algorithm URI: `http://www.w3.org/2006/12/xml-c14n11`
//! With comments: `http://www.w3.org/2006/12/xml-c14n11#WithComments`
//!
//! Identical to C14N 1.0 except that a document-subset apex inherits only
//! `xml:lang` and `xml:space` from omitted ancestors.  `xml:id` is never
//! inherited.  `xml:base` fix-up is not performed.

use crate::inclusive::{canonicalize_with, XmlAttrInheritance};
use xmldsig_core::Error;
use xmldsig_xml::NodeSet;

/// Canonicalize using Inclusive C14N 1.1.
pub fn canonicalize(
    doc: &roxmltree::Document<'_>,
    with_comments: bool,
    node_set: Option<&NodeSet>,
) -> Result<Vec<u8>, Error> {
    canonicalize_with(doc, with_comments, node_set, XmlAttrInheritance::LangAndSpace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xml_id_not_inherited() {
        let xml = r#"<root xml:id="top" xml:lang="en"><a>t</a></root>"#;
        let doc = xmldsig_xml::parse(xml).unwrap();
        let a = doc.descendants().find(|n| n.has_tag_name("a")).unwrap();
        let set = NodeSet::tree_without_comments(a);

        let out11 = String::from_utf8(canonicalize(&doc, false, Some(&set)).unwrap()).unwrap();
        assert_eq!(out11, r#"<a xml:lang="en">t</a>"#);

        let out10 =
            String::from_utf8(crate::inclusive::canonicalize(&doc, false, Some(&set)).unwrap())
                .unwrap();
        assert_eq!(out10, r#"<a xml:id="top" xml:lang="en">t</a>"#);
    }
}
