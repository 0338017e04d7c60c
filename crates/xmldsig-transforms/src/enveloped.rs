#![forbid(unsafe_code)]

//! Enveloped signature transform.
//!
//! Of the `ds:Signature` elements in the input node set, the one with the
//! fewest ancestors (the first such in document order on a tie) is removed
//! together with its descendants.  Without any signature the input passes
//! through unchanged.

use crate::pipeline::TransformData;
use xmldsig_core::{ns, Error};
use xmldsig_xml::document::is_element_named;
use xmldsig_xml::NodeSet;

pub(crate) fn apply(input: TransformData) -> Result<TransformData, Error> {
    let (xml_text, node_set) = input.into_xml()?;
    let doc = xmldsig_xml::parse(&xml_text)?;
    let mut set = node_set.unwrap_or_else(|| NodeSet::all(&doc));

    let shallowest = doc
        .descendants()
        .filter(|n| set.contains(*n) && is_element_named(n, ns::DSIG, ns::node::SIGNATURE))
        .min_by_key(|n| n.ancestors().count());

    match shallowest {
        Some(sig) => {
            tracing::debug!(position = sig.range().start, "removing enveloped signature");
            set.remove_subtree(sig);
        }
        None => tracing::debug!("no signature in input, enveloped transform is a no-op"),
    }

    Ok(TransformData::Xml {
        xml_text,
        node_set: Some(set),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(text: &str, node_set: Option<NodeSet>) -> Vec<u8> {
        let out = apply(TransformData::Xml {
            xml_text: text.to_owned(),
            node_set,
        })
        .unwrap();
        out.to_binary().unwrap()
    }

    #[test]
    fn test_removes_shallowest_signature() {
        let text = r#"<r xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><c><ds:Signature Id="inner"/></c><ds:Signature Id="outer"/></r>"#;
        let out = String::from_utf8(run(text, None)).unwrap();
        assert!(out.contains("inner"));
        assert!(!out.contains("outer"));
    }

    #[test]
    fn test_only_considers_node_set() {
        let text = r#"<r xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><c><ds:Signature Id="inner"/></c><ds:Signature Id="outer"/></r>"#;
        let doc = xmldsig_xml::parse(text).unwrap();
        let c = doc.descendants().find(|n| n.has_tag_name("c")).unwrap();
        let out = String::from_utf8(run(text, Some(NodeSet::tree_with_comments(c)))).unwrap();
        assert_eq!(
            out,
            r#"<c xmlns:ds="http://www.w3.org/2000/09/xmldsig#"></c>"#
        );
    }

    #[test]
    fn test_document_order_breaks_ties() {
        let text = r#"<r xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:Signature Id="first"/><ds:Signature Id="second"/></r>"#;
        let out = String::from_utf8(run(text, None)).unwrap();
        assert!(!out.contains("first"));
        assert!(out.contains("second"));
    }

    #[test]
    fn test_no_signature_is_noop() {
        assert_eq!(run("<r><a/></r>", None), b"<r><a></a></r>");
    }

    #[test]
    fn test_binary_input_is_parsed() {
        let out = apply(TransformData::Binary(
            br#"<r><Signature xmlns="http://www.w3.org/2000/09/xmldsig#"/></r>"#.to_vec(),
        ))
        .unwrap();
        assert_eq!(out.to_binary().unwrap(), b"<r></r>");
    }
}
