#![forbid(unsafe_code)]

//! XPath filtering transform (`REC-xpath-19991116`).
//!
//! The expression is evaluated once per node of the input node set,
//! including every attribute and namespace node, with that node as the
//! context.  Nodes for which it is false are dropped from the set.  Only
//! the node itself is dropped: its children are judged on their own.

use crate::pipeline::TransformData;
use roxmltree::Node;
use std::collections::HashMap;
use xmldsig_core::{ns, Error};
use xmldsig_xml::document::{find_child_element, text_content};
use xmldsig_xml::xpath::{XNode, XPath};
use xmldsig_xml::NodeSet;

/// A compiled XPath filter.
#[derive(Debug, Clone)]
pub struct XPathFilter {
    xpath: XPath,
}

impl XPathFilter {
    /// Compile `expr`, resolving prefixes through `namespaces`.
    pub fn new(expr: &str, namespaces: &HashMap<String, String>) -> Result<Self, Error> {
        Ok(Self {
            xpath: XPath::parse(expr.trim(), namespaces)?,
        })
    }

    /// Build the filter from a `ds:Transform` element holding a `ds:XPath`
    /// child.  Prefixes are resolved against the bindings in scope on the
    /// `ds:XPath` element.
    pub fn from_element(transform: Node<'_, '_>) -> Result<Self, Error> {
        let xpath = find_child_element(transform, ns::DSIG, ns::node::XPATH)
            .ok_or_else(|| Error::MissingElement("XPath in XPath transform".into()))?;
        let namespaces: HashMap<String, String> = xpath
            .namespaces()
            .filter_map(|n| n.name().map(|p| (p.to_owned(), n.uri().to_owned())))
            .collect();
        Self::new(&text_content(xpath), &namespaces)
    }

    /// The expression text.
    pub fn expression(&self) -> &str {
        self.xpath.source()
    }

    pub fn apply(&self, input: TransformData) -> Result<TransformData, Error> {
        let (xml_text, node_set) = input.into_xml()?;
        let doc = xmldsig_xml::parse(&xml_text)?;
        let mut set = node_set.unwrap_or_else(|| NodeSet::all(&doc));
        let input_set = set.clone();

        for node in doc.descendants().skip(1).filter(|n| input_set.contains(*n)) {
            if !self.xpath.matches(XNode::Node(node))? {
                set.remove(node);
            }
            if node.is_element() {
                self.filter_attributes(node, &input_set, &mut set)?;
            }
        }

        tracing::debug!(
            expr = self.expression(),
            before = input_set.len(),
            after = set.len(),
            "applied XPath filter"
        );
        Ok(TransformData::Xml {
            xml_text,
            node_set: Some(set),
        })
    }

    fn filter_attributes(
        &self,
        element: Node<'_, '_>,
        input_set: &NodeSet,
        set: &mut NodeSet,
    ) -> Result<(), Error> {
        for i in 0..element.attributes().count() {
            if input_set.contains_attribute(element, i)
                && !self.xpath.matches(XNode::Attribute(element, i))?
            {
                set.remove_attribute(element, i);
            }
        }
        for (i, namespace) in element.namespaces().enumerate() {
            let prefix = namespace.name().unwrap_or("");
            if input_set.contains_namespace(element, prefix)
                && !self.xpath.matches(XNode::Namespace(element, i))?
            {
                set.remove_namespace(element, prefix);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Transform, TransformChain};

    const DOC: &str = r#"<r xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><a keep="1" drop="2">x</a><ds:Signature><ds:SignatureValue>v</ds:SignatureValue></ds:Signature></r>"#;

    fn filter(expr: &str) -> XPathFilter {
        let mut namespaces = HashMap::new();
        namespaces.insert("dsig".to_owned(), ns::DSIG.to_owned());
        XPathFilter::new(expr, &namespaces).unwrap()
    }

    fn run(filter: &XPathFilter) -> String {
        let out = filter
            .apply(TransformData::Xml {
                xml_text: DOC.to_owned(),
                node_set: None,
            })
            .unwrap();
        String::from_utf8(out.to_binary().unwrap()).unwrap()
    }

    #[test]
    fn test_excludes_signature() {
        let out = run(&filter("not(ancestor-or-self::dsig:Signature)"));
        assert_eq!(
            out,
            r#"<r xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><a drop="2" keep="1">x</a></r>"#
        );
    }

    #[test]
    fn test_filters_attributes() {
        let out = run(&filter("not(self::node()[name() = 'drop'])"));
        assert!(out.contains(r#"<a keep="1">x</a>"#));
        assert!(out.contains("<ds:SignatureValue>v</ds:SignatureValue>"));
    }

    #[test]
    fn test_node_removal_keeps_children() {
        let out = run(&filter("not(self::a)"));
        assert!(out.contains("<r xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\">x<ds:Signature>"));
    }

    #[test]
    fn test_from_element_uses_in_scope_prefixes() {
        let transforms = r#"<ds:Transforms xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
            <ds:Transform Algorithm="http://www.w3.org/TR/1999/REC-xpath-19991116">
              <ds:XPath xmlns:sig="http://www.w3.org/2000/09/xmldsig#">not(ancestor-or-self::sig:Signature)</ds:XPath>
            </ds:Transform>
          </ds:Transforms>"#;
        let doc = xmldsig_xml::parse(transforms).unwrap();
        let chain = TransformChain::from_transforms_element(Some(doc.root_element())).unwrap();
        let Transform::XPathFilter(f) = &chain.transforms()[0] else {
            panic!("expected XPath filter");
        };
        assert_eq!(f.expression(), "not(ancestor-or-self::sig:Signature)");
        assert!(!run(f).contains("Signature"));
    }

    #[test]
    fn test_missing_xpath_element() {
        let doc = xmldsig_xml::parse(
            r#"<Transform xmlns="http://www.w3.org/2000/09/xmldsig#" Algorithm="http://www.w3.org/TR/1999/REC-xpath-19991116"/>"#,
        )
        .unwrap();
        assert!(XPathFilter::from_element(doc.root_element()).is_err());
    }

    #[test]
    fn test_bad_expression() {
        assert!(XPathFilter::new("not(", &HashMap::new()).is_err());
    }

    #[test]
    fn test_deeply_nested_expression_is_rejected() {
        let expr = format!("{}1{}", "(".repeat(20_000), ")".repeat(20_000));
        let err = XPathFilter::new(&expr, &HashMap::new()).unwrap_err();
        assert!(matches!(err, Error::Transform(ref msg) if msg.contains("nested too deeply")));
    }
}
