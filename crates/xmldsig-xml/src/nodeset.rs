#![forbid(unsafe_code)]

//! NodeSet type for XML canonicalization and transforms.
//!
//! A `NodeSet` represents a set of nodes from one parsed document,
//! identified by their `NodeId`.  Attribute and namespace nodes are visible
//! whenever their owner element is, unless they have been hidden
//! explicitly (the XPath filter transform can drop them one by one).
//!
//! Transforms never mutate the document; they shrink the node set and
//! canonicalization renders only what is left.

use roxmltree::{Document, Node, NodeId};
use std::collections::HashSet;

/// A set of XML document nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSet {
    nodes: HashSet<NodeId>,
    hidden_attrs: HashSet<(NodeId, usize)>,
    hidden_ns: HashSet<(NodeId, String)>,
}

impl NodeSet {
    /// Create an empty node set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every node in the document, comments included.
    pub fn all(doc: &Document<'_>) -> Self {
        Self::tree_with_comments(doc.root())
    }

    /// Every node in the document except comments.
    pub fn all_without_comments(doc: &Document<'_>) -> Self {
        Self::tree_without_comments(doc.root())
    }

    /// The subtree rooted at `root`, comments included.
    pub fn tree_with_comments(root: Node<'_, '_>) -> Self {
        Self {
            nodes: root.descendants().map(|n| n.id()).collect(),
            ..Self::default()
        }
    }

    /// The subtree rooted at `root`, without comments.
    pub fn tree_without_comments(root: Node<'_, '_>) -> Self {
        Self {
            nodes: root
                .descendants()
                .filter(|n| !n.is_comment())
                .map(|n| n.id())
                .collect(),
            ..Self::default()
        }
    }

    /// Check if a node is in this set.
    pub fn contains(&self, node: Node<'_, '_>) -> bool {
        self.nodes.contains(&node.id())
    }

    /// Remove a node from this set.  Its descendants are kept.
    pub fn remove(&mut self, node: Node<'_, '_>) {
        self.nodes.remove(&node.id());
    }

    /// Remove a node and all of its descendants.
    pub fn remove_subtree(&mut self, node: Node<'_, '_>) {
        for n in node.descendants() {
            self.nodes.remove(&n.id());
        }
    }

    /// Whether the `index`-th attribute of `owner` is in the set.
    pub fn contains_attribute(&self, owner: Node<'_, '_>, index: usize) -> bool {
        self.contains(owner) && !self.hidden_attrs.contains(&(owner.id(), index))
    }

    /// Hide the `index`-th attribute of `owner`.
    pub fn remove_attribute(&mut self, owner: Node<'_, '_>, index: usize) {
        self.hidden_attrs.insert((owner.id(), index));
    }

    /// Whether the namespace node for `prefix` on `owner` is in the set.
    /// The default namespace uses the prefix `""`.
    pub fn contains_namespace(&self, owner: Node<'_, '_>, prefix: &str) -> bool {
        self.contains(owner) && !self.hidden_ns.contains(&(owner.id(), prefix.to_owned()))
    }

    /// Hide the namespace node for `prefix` on `owner`.
    pub fn remove_namespace(&mut self, owner: Node<'_, '_>, prefix: &str) {
        self.hidden_ns.insert((owner.id(), prefix.to_owned()));
    }

    /// Check if this set is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of nodes in the set (attributes and namespaces not counted).
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML: &str = "<r><a x='1'><!--c--><b/></a><d/></r>";

    #[test]
    fn test_all_and_without_comments() {
        let doc = crate::parse(XML).unwrap();
        let all = NodeSet::all(&doc);
        let plain = NodeSet::all_without_comments(&doc);
        assert_eq!(all.len(), plain.len() + 1);
        let comment = doc.descendants().find(|n| n.is_comment()).unwrap();
        assert!(all.contains(comment));
        assert!(!plain.contains(comment));
    }

    #[test]
    fn test_remove_subtree_keeps_siblings() {
        let doc = crate::parse(XML).unwrap();
        let mut set = NodeSet::all(&doc);
        let a = doc.descendants().find(|n| n.has_tag_name("a")).unwrap();
        set.remove_subtree(a);
        assert!(!doc.descendants().filter(|n| n.has_tag_name("b")).any(|b| set.contains(b)));
        assert!(set.contains(doc.descendants().find(|n| n.has_tag_name("d")).unwrap()));
        assert!(!set.contains_attribute(a, 0));
    }

    #[test]
    fn test_hidden_attribute() {
        let doc = crate::parse(XML).unwrap();
        let mut set = NodeSet::all(&doc);
        let a = doc.descendants().find(|n| n.has_tag_name("a")).unwrap();
        assert!(set.contains_attribute(a, 0));
        set.remove_attribute(a, 0);
        assert!(set.contains(a));
        assert!(!set.contains_attribute(a, 0));
    }
}
