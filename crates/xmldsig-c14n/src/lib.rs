#![forbid(unsafe_code)]

//! XML Canonicalization (C14N) for the xmldsig workspace.
//!
//! Implements all six W3C canonicalization variants:
//! - Canonical XML 1.0 (with and without comments)
//! - Canonical XML 1.1 (with and without comments)
//! - Exclusive Canonical XML 1.0 (with and without comments)
//!
//! Canonicalization is a pure function of the parsed tree and an optional
//! node set; the input is never modified.

pub mod escape;
pub mod exclusive;
pub mod inclusive;
pub mod inclusive11;
pub mod render;

use roxmltree::{Document, Node};
use xmldsig_core::{algorithm, Error};
use xmldsig_xml::NodeSet;

/// The canonicalization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum C14nMode {
    /// Canonical XML 1.0
    #[default]
    Inclusive,
    /// Canonical XML 1.0 with comments
    InclusiveWithComments,
    /// Canonical XML 1.1
    Inclusive11,
    /// Canonical XML 1.1 with comments
    Inclusive11WithComments,
    /// Exclusive Canonical XML 1.0
    Exclusive,
    /// Exclusive Canonical XML 1.0 with comments
    ExclusiveWithComments,
}

impl C14nMode {
    /// Get the algorithm URI for this mode.
    pub fn uri(&self) -> &'static str {
        match self {
            Self::Inclusive => algorithm::C14N,
            Self::InclusiveWithComments => algorithm::C14N_WITH_COMMENTS,
            Self::Inclusive11 => algorithm::C14N11,
            Self::Inclusive11WithComments => algorithm::C14N11_WITH_COMMENTS,
            Self::Exclusive => algorithm::EXC_C14N,
            Self::ExclusiveWithComments => algorithm::EXC_C14N_WITH_COMMENTS,
        }
    }

    /// Parse a C14N mode from an algorithm URI.
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            algorithm::C14N => Some(Self::Inclusive),
            algorithm::C14N_WITH_COMMENTS => Some(Self::InclusiveWithComments),
            algorithm::C14N11 => Some(Self::Inclusive11),
            algorithm::C14N11_WITH_COMMENTS => Some(Self::Inclusive11WithComments),
            algorithm::EXC_C14N => Some(Self::Exclusive),
            algorithm::EXC_C14N_WITH_COMMENTS => Some(Self::ExclusiveWithComments),
            _ => None,
        }
    }

    /// Like [`C14nMode::from_uri`], but unknown or absent identifiers fall
    /// back to plain C14N 1.0 instead of failing.
    pub fn from_uri_or_default(uri: Option<&str>) -> Self {
        match uri {
            Some(u) => Self::from_uri(u).unwrap_or_else(|| {
                tracing::warn!(uri = u, "unknown canonicalization method, using C14N 1.0");
                Self::Inclusive
            }),
            None => Self::Inclusive,
        }
    }

    pub fn with_comments(&self) -> bool {
        matches!(
            self,
            Self::InclusiveWithComments
                | Self::Inclusive11WithComments
                | Self::ExclusiveWithComments
        )
    }

    /// The same variant with comment retention switched on or off.
    pub fn set_comments(self, with_comments: bool) -> Self {
        match (self, with_comments) {
            (Self::Inclusive | Self::InclusiveWithComments, false) => Self::Inclusive,
            (Self::Inclusive | Self::InclusiveWithComments, true) => Self::InclusiveWithComments,
            (Self::Inclusive11 | Self::Inclusive11WithComments, false) => Self::Inclusive11,
            (Self::Inclusive11 | Self::Inclusive11WithComments, true) => {
                Self::Inclusive11WithComments
            }
            (Self::Exclusive | Self::ExclusiveWithComments, false) => Self::Exclusive,
            (Self::Exclusive | Self::ExclusiveWithComments, true) => Self::ExclusiveWithComments,
        }
    }

    pub fn is_exclusive(&self) -> bool {
        matches!(self, Self::Exclusive | Self::ExclusiveWithComments)
    }
}

/// Canonicalize XML text.
///
/// - `xml`: the raw XML text
/// - `mode`: which C14N variant to use
/// - `node_set`: optional node set (for document-subset canonicalization)
/// - `inclusive_prefixes`: for exclusive C14N, the InclusiveNamespaces PrefixList
///
/// A node set only makes sense against the tree it was built from, so
/// callers holding one should use [`canonicalize_doc`] instead.
pub fn canonicalize(
    xml: &str,
    mode: C14nMode,
    inclusive_prefixes: &[String],
) -> Result<Vec<u8>, Error> {
    let doc = xmldsig_xml::parse(xml)?;
    canonicalize_doc(&doc, mode, None, inclusive_prefixes)
}

/// Canonicalize a pre-parsed document, optionally restricted to a node set.
pub fn canonicalize_doc(
    doc: &Document<'_>,
    mode: C14nMode,
    node_set: Option<&NodeSet>,
    inclusive_prefixes: &[String],
) -> Result<Vec<u8>, Error> {
    match mode {
        C14nMode::Inclusive | C14nMode::InclusiveWithComments => {
            inclusive::canonicalize(doc, mode.with_comments(), node_set)
        }
        C14nMode::Inclusive11 | C14nMode::Inclusive11WithComments => {
            inclusive11::canonicalize(doc, mode.with_comments(), node_set)
        }
        C14nMode::Exclusive | C14nMode::ExclusiveWithComments => {
            exclusive::canonicalize(doc, mode.with_comments(), node_set, inclusive_prefixes)
        }
    }
}

/// Canonicalize the subtree rooted at `node`.
///
/// The subtree is treated as a document subset, so namespace declarations
/// and (for inclusive modes) `xml:*` attributes in scope from ancestors are
/// rendered on the apex.
pub fn canonicalize_node(
    node: Node<'_, '_>,
    mode: C14nMode,
    inclusive_prefixes: &[String],
) -> Result<Vec<u8>, Error> {
    let set = if mode.with_comments() {
        NodeSet::tree_with_comments(node)
    } else {
        NodeSet::tree_without_comments(node)
    };
    canonicalize_doc(node.document(), mode, Some(&set), inclusive_prefixes)
}

/// Split an InclusiveNamespaces `PrefixList` into prefixes.
pub fn parse_prefix_list(list: &str) -> Vec<String> {
    list.split_whitespace().map(str::to_owned).collect()
}
