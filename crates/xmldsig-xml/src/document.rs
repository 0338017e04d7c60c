#![forbid(unsafe_code)]

//! Owned XML document with in-place text editing.
//!
//! The document keeps the original text and re-parses it on demand with
//! `roxmltree`.  Writing a `DigestValue` or `SignatureValue` is done by
//! splicing the text at the element's byte range, so everything outside
//! the edited element stays byte-for-byte identical.

use roxmltree::{Document, Node};
use std::ops::Range;
use xmldsig_core::{ns, Error};

/// An owned XML document.  Stores the text and nothing else.
///
/// To work with the parsed tree, call [`XmlDocument::parse_doc`] which
/// returns a temporary `roxmltree::Document` borrowing from the text.
#[derive(Debug, Clone)]
pub struct XmlDocument {
    text: String,
}

/// A pending replacement of a byte range in the document text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    pub range: Range<usize>,
    pub replacement: String,
}

impl XmlDocument {
    /// Parse and validate XML from a string, taking ownership.
    pub fn parse(text: String) -> Result<Self, Error> {
        crate::parse(&text)?;
        Ok(Self { text })
    }

    /// Get the raw XML text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Parse the document and return a temporary `roxmltree::Document`.
    ///
    /// This re-parses the XML from the stored text.  Parse once at the top
    /// of a processing step and pass the tree down the call chain.
    pub fn parse_doc(&self) -> Result<Document<'_>, Error> {
        crate::parse(&self.text)
    }

    /// Apply a batch of edits computed against the current text.
    ///
    /// Edits must not overlap.  The edited text is re-validated; on failure
    /// the document is left unchanged.
    pub fn apply_edits(&mut self, mut edits: Vec<TextEdit>) -> Result<(), Error> {
        if edits.is_empty() {
            return Ok(());
        }
        edits.sort_by(|a, b| b.range.start.cmp(&a.range.start));
        let mut text = self.text.clone();
        let mut floor = usize::MAX;
        for edit in &edits {
            if edit.range.end > floor || edit.range.end > text.len() {
                return Err(Error::Other(format!(
                    "overlapping or out-of-bounds edit at {:?}",
                    edit.range
                )));
            }
            text.replace_range(edit.range.clone(), &edit.replacement);
            floor = edit.range.start;
        }
        crate::parse(&text)?;
        self.text = text;
        Ok(())
    }

    /// Whether the text starts with an XML declaration.
    pub fn has_declaration(&self) -> bool {
        self.text.trim_start_matches('\u{feff}').starts_with("<?xml")
    }

    /// Serialize the document.
    ///
    /// With `emit_declaration` the full text is returned, prefixed by a
    /// default declaration when the source had none.  Without it only the
    /// document element is returned.
    pub fn to_xml(&self, emit_declaration: bool) -> Result<String, Error> {
        if emit_declaration {
            if self.has_declaration() {
                return Ok(self.text.clone());
            }
            return Ok(format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}", self.text));
        }
        let doc = self.parse_doc()?;
        let range = doc.root_element().range();
        Ok(self.text[range].to_owned())
    }

    /// Find the first descendant element with the given local name and namespace.
    pub fn find_element<'a, 'input>(
        doc: &'a Document<'input>,
        ns: &str,
        local_name: &str,
    ) -> Option<Node<'a, 'input>> {
        doc.descendants().find(|n| is_element_named(n, ns, local_name))
    }

    /// Find all descendant elements with the given local name and namespace.
    pub fn find_elements<'a, 'input>(
        doc: &'a Document<'input>,
        ns: &str,
        local_name: &str,
    ) -> Vec<Node<'a, 'input>> {
        doc.descendants()
            .filter(|n| is_element_named(n, ns, local_name))
            .collect()
    }

    /// Find an element by the value of an id attribute.
    ///
    /// The value is compared as data, never spliced into a query, so crafted
    /// id values cannot change what is selected.  More than one match is
    /// rejected: two elements claiming the same id is the shape of a
    /// signature-wrapping attempt.
    pub fn find_by_id<'a, 'input>(
        doc: &'a Document<'input>,
        id_attrs: &[IdAttribute],
        id: &str,
    ) -> Result<Node<'a, 'input>, Error> {
        let mut found: Option<Node<'a, 'input>> = None;
        for node in doc.descendants().filter(|n| n.is_element()) {
            if !id_attrs.iter().any(|a| a.value_of(node) == Some(id)) {
                continue;
            }
            if found.is_some() {
                return Err(Error::AmbiguousReference(format!(
                    "more than one element carries id '{id}'"
                )));
            }
            found = Some(node);
        }
        found.ok_or_else(|| Error::ReferencedNodeNotFound(format!("no element with id '{id}'")))
    }
}

/// An attribute that carries an element's id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdAttribute {
    prefix: Option<String>,
    local: String,
}

impl IdAttribute {
    /// Parse an attribute name such as `ID`, `MyID` or `wsu:Id`.
    pub fn new(name: &str) -> Self {
        match name.split_once(':') {
            Some((prefix, local)) => Self {
                prefix: Some(prefix.to_owned()),
                local: local.to_owned(),
            },
            None => Self {
                prefix: None,
                local: name.to_owned(),
            },
        }
    }

    /// The unprefixed `ID` attribute.
    pub fn id() -> Self {
        Self::new(ns::attr::ID)
    }

    /// The WS-Security `wsu:Id` attribute.
    pub fn wsu_id() -> Self {
        Self {
            prefix: Some("wsu".to_owned()),
            local: ns::attr::WSU_ID.to_owned(),
        }
    }

    /// The value of this attribute on `node`, if present.
    pub fn value_of<'a>(&self, node: Node<'a, '_>) -> Option<&'a str> {
        match &self.prefix {
            None => node.attribute(self.local.as_str()),
            Some(prefix) => {
                let uri = node
                    .lookup_namespace_uri(Some(prefix.as_str()))
                    .or_else(|| ns::lookup_prefix(prefix))?;
                node.attribute((uri, self.local.as_str()))
            }
        }
    }
}

/// Check whether `n` is an element with the given namespace and local name.
pub fn is_element_named(n: &Node<'_, '_>, ns: &str, local_name: &str) -> bool {
    n.is_element()
        && n.tag_name().name() == local_name
        && n.tag_name().namespace().unwrap_or("") == ns
}

/// Find the first child element with the given local name and namespace.
pub fn find_child_element<'a, 'input>(
    parent: Node<'a, 'input>,
    ns: &str,
    local_name: &str,
) -> Option<Node<'a, 'input>> {
    parent.children().find(|n| is_element_named(n, ns, local_name))
}

/// Find all child elements with the given local name and namespace.
pub fn find_child_elements<'a, 'input>(
    parent: Node<'a, 'input>,
    ns: &str,
    local_name: &str,
) -> Vec<Node<'a, 'input>> {
    parent
        .children()
        .filter(|n| is_element_named(n, ns, local_name))
        .collect()
}

/// Find the first descendant element (excluding `parent`) with the given name.
pub fn find_descendant_element<'a, 'input>(
    parent: Node<'a, 'input>,
    ns: &str,
    local_name: &str,
) -> Option<Node<'a, 'input>> {
    parent
        .descendants()
        .skip(1)
        .find(|n| is_element_named(n, ns, local_name))
}

/// Concatenated text content of an element.
pub fn text_content(node: Node<'_, '_>) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect()
}

/// Source text of a node (for elements, the whole element).
pub fn source_text<'input>(node: Node<'_, 'input>) -> &'input str {
    &node.document().input_text()[node.range()]
}

/// Build an edit that replaces the content of `element` with `value`.
pub fn replace_content_edit(element: Node<'_, '_>, value: &str) -> Result<TextEdit, Error> {
    let escaped = escape_content(value);
    if let (Some(first), Some(last)) = (element.first_child(), element.last_child()) {
        return Ok(TextEdit {
            range: first.range().start..last.range().end,
            replacement: escaped,
        });
    }

    let range = element.range();
    let raw = source_text(element);
    if raw.ends_with("/>") {
        let names = QualifiedNames::of(element);
        return Ok(TextEdit {
            range: range.end - 2..range.end,
            replacement: format!(">{escaped}</{}>", names.element),
        });
    }
    let close = raw
        .rfind("</")
        .ok_or_else(|| Error::XmlStructure(format!("no end tag for {}", element.tag_name().name())))?;
    let at = range.start + close;
    Ok(TextEdit {
        range: at..at,
        replacement: escaped,
    })
}

fn escape_content(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Qualified names of an element and its attributes as written in the source.
///
/// roxmltree resolves prefixes away; canonical output needs them back, so
/// they are read from the start tag.  `attributes` lines up with
/// `Node::attributes()` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedNames {
    pub element: String,
    pub attributes: Vec<String>,
}

impl QualifiedNames {
    pub fn of(node: Node<'_, '_>) -> Self {
        let raw = source_text(node);
        let (element, mut attributes) = scan_start_tag(raw);
        if attributes.len() != node.attributes().count() {
            // Start tag does not line up with the parsed attributes; fall back
            // to rebuilding names from in-scope bindings.
            attributes = node
                .attributes()
                .map(|a| match a.namespace() {
                    Some(uri) => match prefix_for(node, uri) {
                        Some(p) => format!("{p}:{}", a.name()),
                        None => a.name().to_owned(),
                    },
                    None => a.name().to_owned(),
                })
                .collect();
        }
        let element = if element.is_empty() {
            node.tag_name().name().to_owned()
        } else {
            element
        };
        Self { element, attributes }
    }

    /// The prefix of the element name, or `""`.
    pub fn element_prefix(&self) -> &str {
        prefix_of(&self.element)
    }
}

/// The prefix part of a qualified name, or `""`.
pub fn prefix_of(qname: &str) -> &str {
    qname.split_once(':').map(|(p, _)| p).unwrap_or("")
}

fn prefix_for<'a>(node: Node<'a, '_>, uri: &str) -> Option<&'a str> {
    if uri == ns::XML {
        return Some("xml");
    }
    node.namespaces()
        .find(|n| n.name().is_some() && n.uri() == uri)
        .and_then(|n| n.name())
}

/// Scan `<name attr="v" ...>` and return the element name and the
/// attribute names, skipping namespace declarations.
fn scan_start_tag(raw: &str) -> (String, Vec<String>) {
    let bytes = raw.as_bytes();
    let mut i = 1;
    let is_name_end = |b: u8| b.is_ascii_whitespace() || b == b'/' || b == b'>' || b == b'=';

    let start = i;
    while i < bytes.len() && !is_name_end(bytes[i]) {
        i += 1;
    }
    let element = raw[start..i].to_owned();

    let mut attributes = Vec::new();
    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] == b'>' || bytes[i] == b'/' {
            break;
        }
        let name_start = i;
        while i < bytes.len() && !is_name_end(bytes[i]) {
            i += 1;
        }
        let name = &raw[name_start..i];
        while i < bytes.len() && bytes[i] != b'"' && bytes[i] != b'\'' {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }
        let quote = bytes[i];
        i += 1;
        while i < bytes.len() && bytes[i] != quote {
            i += 1;
        }
        i += 1;
        if name != "xmlns" && !name.starts_with("xmlns:") {
            attributes.push(name.to_owned());
        }
    }
    (element, attributes)
}
