#![forbid(unsafe_code)]

//! XML document abstraction for the xmldsig workspace.
//!
//! Provides an owned document over `roxmltree` that can be edited in place,
//! plus the `NodeSet` and XPath machinery needed by canonicalization and
//! signature transforms.

pub mod document;
pub mod nodeset;
pub mod xpath;

pub use document::{IdAttribute, TextEdit, XmlDocument};
pub use nodeset::NodeSet;

/// Return roxmltree parsing options that allow DTD.
///
/// roxmltree never fetches external entities and only expands internal
/// ones, so accepting a DTD does not widen the attack surface.
pub fn parsing_options() -> roxmltree::ParsingOptions {
    roxmltree::ParsingOptions {
        allow_dtd: true,
        ..roxmltree::ParsingOptions::default()
    }
}

/// Parse XML text into a temporary `roxmltree::Document`.
pub fn parse(text: &str) -> Result<roxmltree::Document<'_>, xmldsig_core::Error> {
    roxmltree::Document::parse_with_options(text, parsing_options())
        .map_err(|e| xmldsig_core::Error::XmlParse(e.to_string()))
}
