#![forbid(unsafe_code)]

//! Transform definitions and the transform chain.

use crate::enveloped;
use crate::xpath_filter::XPathFilter;
use roxmltree::Node;
use xmldsig_c14n::C14nMode;
use xmldsig_core::{algorithm, ns, Error};
use xmldsig_xml::document::{find_child_element, find_child_elements};
use xmldsig_xml::NodeSet;

/// Data flowing through the transform chain.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformData {
    /// A parsed XML document restricted to a node set.  `None` means the
    /// whole document.
    Xml {
        xml_text: String,
        node_set: Option<NodeSet>,
    },
    /// Raw octets.
    Binary(Vec<u8>),
}

impl TransformData {
    /// Convert to octets.  Node sets are serialized with C14N 1.0 without
    /// comments; binary data is returned as is.
    pub fn to_binary(&self) -> Result<Vec<u8>, Error> {
        match self {
            TransformData::Binary(data) => Ok(data.clone()),
            TransformData::Xml { xml_text, node_set } => {
                let doc = xmldsig_xml::parse(xml_text)?;
                xmldsig_c14n::canonicalize_doc(&doc, C14nMode::Inclusive, node_set.as_ref(), &[])
            }
        }
    }

    /// Whether this value is a node set.
    pub fn is_xml(&self) -> bool {
        matches!(self, TransformData::Xml { .. })
    }

    /// View the value as XML text plus node set, parsing octets as a
    /// document when needed.
    pub(crate) fn into_xml(self) -> Result<(String, Option<NodeSet>), Error> {
        match self {
            TransformData::Xml { xml_text, node_set } => Ok((xml_text, node_set)),
            TransformData::Binary(data) => {
                let text = String::from_utf8(data)
                    .map_err(|e| Error::Transform(format!("octet input is not UTF-8: {e}")))?;
                xmldsig_xml::parse(&text)?;
                Ok((text, None))
            }
        }
    }
}

/// A single transform.
#[derive(Debug, Clone)]
pub enum Transform {
    /// Canonicalize the input.  `inclusive_prefixes` is only used by the
    /// exclusive variants.
    Canonicalize {
        mode: C14nMode,
        inclusive_prefixes: Vec<String>,
    },
    /// Remove the enclosing `Signature` from the node set.
    EnvelopedSignature,
    /// Keep only nodes for which an XPath expression is true.
    XPathFilter(XPathFilter),
}

impl Transform {
    /// Build a transform from a `ds:Transform` element.
    ///
    /// Unknown algorithms yield `Ok(None)`; the chain treats them as identity.
    pub fn from_element(node: Node<'_, '_>) -> Result<Option<Self>, Error> {
        let uri = node
            .attribute(ns::attr::ALGORITHM)
            .ok_or_else(|| Error::MissingAttribute("Algorithm on Transform".into()))?;

        if let Some(mode) = C14nMode::from_uri(uri) {
            let inclusive_prefixes = if mode.is_exclusive() {
                find_child_element(node, ns::EXC_C14N, ns::node::INCLUSIVE_NAMESPACES)
                    .and_then(|n| n.attribute(ns::attr::PREFIX_LIST))
                    .map(xmldsig_c14n::parse_prefix_list)
                    .unwrap_or_default()
            } else {
                Vec::new()
            };
            return Ok(Some(Transform::Canonicalize {
                mode,
                inclusive_prefixes,
            }));
        }

        match uri {
            algorithm::ENVELOPED_SIGNATURE => Ok(Some(Transform::EnvelopedSignature)),
            algorithm::XPATH => Ok(Some(Transform::XPathFilter(XPathFilter::from_element(node)?))),
            _ => {
                tracing::warn!(uri, "unsupported transform, treating as identity");
                Ok(None)
            }
        }
    }

    /// The algorithm URI for this transform.
    pub fn uri(&self) -> &str {
        match self {
            Transform::Canonicalize { mode, .. } => mode.uri(),
            Transform::EnvelopedSignature => algorithm::ENVELOPED_SIGNATURE,
            Transform::XPathFilter(_) => algorithm::XPATH,
        }
    }

    pub fn is_c14n(&self) -> bool {
        matches!(self, Transform::Canonicalize { .. })
    }

    /// Execute the transform on the given data.
    pub fn apply(&self, input: TransformData) -> Result<TransformData, Error> {
        match self {
            Transform::Canonicalize {
                mode,
                inclusive_prefixes,
            } => {
                let (xml_text, node_set) = input.into_xml()?;
                let doc = xmldsig_xml::parse(&xml_text)?;
                let bytes = xmldsig_c14n::canonicalize_doc(
                    &doc,
                    *mode,
                    node_set.as_ref(),
                    inclusive_prefixes,
                )?;
                Ok(TransformData::Binary(bytes))
            }
            Transform::EnvelopedSignature => enveloped::apply(input),
            Transform::XPathFilter(filter) => filter.apply(input),
        }
    }
}

/// An ordered chain of transforms.
///
/// Canonicalization always runs last: on construction every
/// canonicalization entry is moved behind the other transforms, keeping
/// the relative order within both groups.
#[derive(Debug, Clone, Default)]
pub struct TransformChain {
    transforms: Vec<Transform>,
}

impl TransformChain {
    pub fn new(transforms: Vec<Transform>) -> Self {
        let (c14n, mut transforms): (Vec<_>, Vec<_>) =
            transforms.into_iter().partition(Transform::is_c14n);
        transforms.extend(c14n);
        Self { transforms }
    }

    /// Build the chain from a `ds:Transforms` element.  `None` gives an
    /// empty chain.
    pub fn from_transforms_element(transforms: Option<Node<'_, '_>>) -> Result<Self, Error> {
        let Some(transforms) = transforms else {
            return Ok(Self::default());
        };
        let mut parsed = Vec::new();
        for node in find_child_elements(transforms, ns::DSIG, ns::node::TRANSFORM) {
            if let Some(t) = Transform::from_element(node)? {
                parsed.push(t);
            }
        }
        Ok(Self::new(parsed))
    }

    /// Execute all transforms in order.
    pub fn apply(&self, input: TransformData) -> Result<TransformData, Error> {
        let mut data = input;
        for transform in &self.transforms {
            tracing::debug!(uri = transform.uri(), "applying transform");
            data = transform.apply(data)?;
        }
        Ok(data)
    }

    /// The transforms in execution order.
    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIGNED: &str = r#"<root xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><a  b="1" >text</a><ds:Signature><ds:SignedInfo/></ds:Signature></root>"#;

    fn xml(text: &str) -> TransformData {
        TransformData::Xml {
            xml_text: text.to_owned(),
            node_set: None,
        }
    }

    fn c14n(mode: C14nMode) -> Transform {
        Transform::Canonicalize {
            mode,
            inclusive_prefixes: Vec::new(),
        }
    }

    fn chain_from(transforms_xml: &str) -> TransformChain {
        let doc = xmldsig_xml::parse(transforms_xml).unwrap();
        TransformChain::from_transforms_element(Some(doc.root_element())).unwrap()
    }

    #[test]
    fn test_c14n_moved_last() {
        let chain = TransformChain::new(vec![
            c14n(C14nMode::Exclusive),
            Transform::EnvelopedSignature,
            c14n(C14nMode::Inclusive),
        ]);
        let uris: Vec<_> = chain.transforms().iter().map(Transform::uri).collect();
        assert_eq!(
            uris,
            [algorithm::ENVELOPED_SIGNATURE, algorithm::EXC_C14N, algorithm::C14N]
        );
    }

    #[test]
    fn test_reordered_chain_matches_explicit_order() {
        let authored = TransformChain::new(vec![
            c14n(C14nMode::Exclusive),
            Transform::EnvelopedSignature,
        ]);
        let explicit = TransformChain::new(vec![
            Transform::EnvelopedSignature,
            c14n(C14nMode::Exclusive),
        ]);
        let a = authored.apply(xml(SIGNED)).unwrap().to_binary().unwrap();
        let b = explicit.apply(xml(SIGNED)).unwrap().to_binary().unwrap();
        assert_eq!(a, b);
        assert_eq!(String::from_utf8(a).unwrap(), r#"<root><a b="1">text</a></root>"#);
    }

    #[test]
    fn test_from_element() {
        let chain = chain_from(
            r#"<ds:Transforms xmlns:ds="http://www.w3.org/2000/09/xmldsig#" xmlns:ec="http://www.w3.org/2001/10/xml-exc-c14n#">
                 <ds:Transform Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"><ec:InclusiveNamespaces PrefixList="ds  xs"/></ds:Transform>
                 <ds:Transform Algorithm="urn:example:unknown"/>
                 <ds:Transform Algorithm="http://www.w3.org/2000/09/xmldsig#enveloped-signature"/>
               </ds:Transforms>"#,
        );
        assert_eq!(chain.len(), 2);
        assert!(matches!(chain.transforms()[0], Transform::EnvelopedSignature));
        match &chain.transforms()[1] {
            Transform::Canonicalize {
                mode,
                inclusive_prefixes,
            } => {
                assert_eq!(*mode, C14nMode::Exclusive);
                assert_eq!(inclusive_prefixes, &["ds", "xs"]);
            }
            other => panic!("unexpected transform {other:?}"),
        }
    }

    #[test]
    fn test_missing_algorithm_is_error() {
        let doc = xmldsig_xml::parse(
            r#"<Transforms xmlns="http://www.w3.org/2000/09/xmldsig#"><Transform/></Transforms>"#,
        )
        .unwrap();
        assert!(TransformChain::from_transforms_element(Some(doc.root_element())).is_err());
    }

    #[test]
    fn test_empty_chain_is_identity() {
        let chain = TransformChain::from_transforms_element(None).unwrap();
        assert!(chain.is_empty());
        let out = chain.apply(xml("<a><!--c--><b/></a>")).unwrap();
        assert!(out.is_xml());
        assert_eq!(out.to_binary().unwrap(), b"<a><b></b></a>");
    }

    #[test]
    fn test_canonicalize_binary_input() {
        let out = c14n(C14nMode::Inclusive)
            .apply(TransformData::Binary(b"<a  x='1'/>".to_vec()))
            .unwrap();
        assert_eq!(out, TransformData::Binary(b"<a x=\"1\"></a>".to_vec()));
        assert!(c14n(C14nMode::Inclusive)
            .apply(TransformData::Binary(vec![0xff, 0xfe]))
            .is_err());
    }
}
