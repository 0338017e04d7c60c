#![forbid(unsafe_code)]

//! Structural validation of `ds:Signature` elements.
//!
//! The built-in profiles check the XML-DSig content models of `Signature`,
//! `SignedInfo`, `Reference`, `Transforms`, `KeyInfo`, `X509Data` and
//! `X509IssuerSerial`, the mandatory `Algorithm` attributes, the
//! base64-typed values and the form of `X509SerialNumber`.  Content in
//! other namespaces and the inside of `Object`, `KeyValue`, `PGPData`,
//! `SPKIData` and `RetrievalMethod` are not checked; plug a full XSD engine
//! in through [`Schema::Custom`] for that.  [`Schema::Relaxed`] accepts
//! serial numbers longer than the 24 digits the strict schema allows,
//! which some issuers emit.

use crate::encoding;
use roxmltree::Node;
use xmldsig_core::{ns, Error};
use xmldsig_xml::document::{find_child_elements, is_element_named, text_content};

/// Longest `X509SerialNumber` accepted by [`Schema::Strict`].
pub const MAX_SERIAL_DIGITS: usize = 24;

/// A caller supplied validator, e.g. a binding to an XSD engine.
pub trait SchemaValidator: Send + Sync {
    /// Check a `ds:Signature` element and return every violation found.
    fn validate(&self, signature: Node<'_, '_>) -> Vec<String>;
}

/// Which schema a signature is checked against.
pub enum Schema {
    Strict,
    Relaxed,
    Custom(Box<dyn SchemaValidator>),
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Schema::Strict => write!(f, "Strict"),
            Schema::Relaxed => write!(f, "Relaxed"),
            Schema::Custom(_) => write!(f, "Custom"),
        }
    }
}

impl Schema {
    /// Validate a `ds:Signature` element.
    pub fn validate(&self, signature: Node<'_, '_>) -> Result<(), Error> {
        let violations = match self {
            Schema::Strict => Profile {
                max_serial_digits: Some(MAX_SERIAL_DIGITS),
            }
            .check(signature),
            Schema::Relaxed => Profile {
                max_serial_digits: None,
            }
            .check(signature),
            Schema::Custom(validator) => validator.validate(signature),
        };
        if violations.is_empty() {
            Ok(())
        } else {
            tracing::debug!(?violations, "schema validation failed");
            Err(Error::Schema(violations))
        }
    }
}

#[derive(Clone, Copy)]
enum Occurs {
    One,
    Optional,
    ZeroOrMore,
    OneOrMore,
}

impl Occurs {
    fn allows(self, count: usize) -> bool {
        match self {
            Occurs::One => count == 1,
            Occurs::Optional => count <= 1,
            Occurs::ZeroOrMore => true,
            Occurs::OneOrMore => count >= 1,
        }
    }
}

struct Profile {
    max_serial_digits: Option<usize>,
}

impl Profile {
    fn check(&self, signature: Node<'_, '_>) -> Vec<String> {
        let mut errors = Vec::new();
        if !is_element_named(&signature, ns::DSIG, ns::node::SIGNATURE) {
            errors.push(format!("expected ds:Signature, found {}", signature.tag_name().name()));
            return errors;
        }

        use ns::node::*;
        check_sequence(
            signature,
            &[
                (SIGNED_INFO, Occurs::One),
                (SIGNATURE_VALUE, Occurs::One),
                (KEY_INFO, Occurs::Optional),
                (OBJECT, Occurs::ZeroOrMore),
            ],
            &mut errors,
        );
        for value in find_child_elements(signature, ns::DSIG, SIGNATURE_VALUE) {
            check_base64(value, &mut errors);
        }
        for key_info in find_child_elements(signature, ns::DSIG, KEY_INFO) {
            check_key_info(key_info, &mut errors);
        }

        for signed_info in find_child_elements(signature, ns::DSIG, SIGNED_INFO) {
            check_sequence(
                signed_info,
                &[
                    (CANONICALIZATION_METHOD, Occurs::One),
                    (SIGNATURE_METHOD, Occurs::One),
                    (REFERENCE, Occurs::OneOrMore),
                ],
                &mut errors,
            );
            for method in [CANONICALIZATION_METHOD, SIGNATURE_METHOD] {
                for node in find_child_elements(signed_info, ns::DSIG, method) {
                    require_algorithm(node, &mut errors);
                }
            }
            for reference in find_child_elements(signed_info, ns::DSIG, REFERENCE) {
                self.check_reference(reference, &mut errors);
            }
        }

        let serials = signature
            .descendants()
            .filter(|n| is_element_named(n, ns::DSIG, X509_SERIAL_NUMBER));
        for serial in serials {
            self.check_serial(serial.text().unwrap_or("").trim(), &mut errors);
        }
        errors
    }

    fn check_reference(&self, reference: Node<'_, '_>, errors: &mut Vec<String>) {
        use ns::node::*;
        check_sequence(
            reference,
            &[
                (TRANSFORMS, Occurs::Optional),
                (DIGEST_METHOD, Occurs::One),
                (DIGEST_VALUE, Occurs::One),
            ],
            errors,
        );
        for digest_method in find_child_elements(reference, ns::DSIG, DIGEST_METHOD) {
            require_algorithm(digest_method, errors);
        }
        for digest_value in find_child_elements(reference, ns::DSIG, DIGEST_VALUE) {
            check_base64(digest_value, errors);
        }
        for transforms in find_child_elements(reference, ns::DSIG, TRANSFORMS) {
            check_sequence(transforms, &[(TRANSFORM, Occurs::OneOrMore)], errors);
            for transform in find_child_elements(transforms, ns::DSIG, TRANSFORM) {
                require_algorithm(transform, errors);
            }
        }
    }

    fn check_serial(&self, serial: &str, errors: &mut Vec<String>) {
        let digits = serial.strip_prefix('-').unwrap_or(serial);
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            errors.push(format!("X509SerialNumber '{serial}' is not an integer"));
            return;
        }
        if let Some(max) = self.max_serial_digits {
            if digits.len() > max {
                errors.push(format!(
                    "X509SerialNumber has {} digits, at most {max} allowed",
                    digits.len()
                ));
            }
        }
    }
}

/// `KeyInfo` holds one or more key hints; ds elements must be known ones.
fn check_key_info(key_info: Node<'_, '_>, errors: &mut Vec<String>) {
    use ns::node::*;
    let mut children = key_info.children().filter(|n| n.is_element()).peekable();
    if children.peek().is_none() {
        errors.push("KeyInfo: expected at least one child element".into());
    }
    for child in children.filter(|n| n.tag_name().namespace() == Some(ns::DSIG)) {
        match child.tag_name().name() {
            X509_DATA => check_x509_data(child, errors),
            KEY_NAME | KEY_VALUE | RETRIEVAL_METHOD | PGP_DATA | SPKI_DATA | MGMT_DATA => {}
            other => errors.push(format!("KeyInfo: unexpected element {other}")),
        }
    }
}

fn check_x509_data(x509_data: Node<'_, '_>, errors: &mut Vec<String>) {
    use ns::node::*;
    let mut children = x509_data.children().filter(|n| n.is_element()).peekable();
    if children.peek().is_none() {
        errors.push("X509Data: expected at least one child element".into());
    }
    for child in children.filter(|n| n.tag_name().namespace() == Some(ns::DSIG)) {
        match child.tag_name().name() {
            X509_ISSUER_SERIAL => check_sequence(
                child,
                &[(X509_ISSUER_NAME, Occurs::One), (X509_SERIAL_NUMBER, Occurs::One)],
                errors,
            ),
            X509_SKI | X509_CERTIFICATE | X509_CRL => check_base64(child, errors),
            X509_SUBJECT_NAME => {}
            other => errors.push(format!("X509Data: unexpected element {other}")),
        }
    }
}

fn check_base64(node: Node<'_, '_>, errors: &mut Vec<String>) {
    let name = node.tag_name().name();
    if encoding::decode(&text_content(node), name).is_err() {
        errors.push(format!("{name} is not valid base64"));
    }
}

fn require_algorithm(node: Node<'_, '_>, errors: &mut Vec<String>) {
    if node.attribute(ns::attr::ALGORITHM).is_none() {
        errors.push(format!("{} is missing the Algorithm attribute", node.tag_name().name()));
    }
}

/// Check the child elements of `parent` against an ordered content model.
fn check_sequence(parent: Node<'_, '_>, model: &[(&str, Occurs)], errors: &mut Vec<String>) {
    let children: Vec<Node<'_, '_>> = parent.children().filter(|n| n.is_element()).collect();
    let parent_name = parent.tag_name().name();
    let mut pos = 0;
    for (name, occurs) in model {
        let count = children[pos..]
            .iter()
            .take_while(|n| is_element_named(n, ns::DSIG, name))
            .count();
        if !occurs.allows(count) {
            errors.push(format!("{parent_name}: unexpected number of {name} elements ({count})"));
        }
        pos += count;
    }
    if let Some(extra) = children.get(pos) {
        errors.push(format!(
            "{parent_name}: unexpected element {}",
            extra.tag_name().name()
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signature(serial: &str) -> String {
        format!(
            r##"<ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
  <ds:SignedInfo>
    <ds:CanonicalizationMethod Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"/>
    <ds:SignatureMethod Algorithm="http://www.w3.org/2001/04/xmldsig-more#rsa-sha256"/>
    <ds:Reference URI="#foo">
      <ds:Transforms><ds:Transform Algorithm="http://www.w3.org/2000/09/xmldsig#enveloped-signature"/></ds:Transforms>
      <ds:DigestMethod Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"/>
      <ds:DigestValue/>
    </ds:Reference>
  </ds:SignedInfo>
  <ds:SignatureValue/>
  <ds:KeyInfo><ds:X509Data><ds:X509IssuerSerial><ds:X509IssuerName>CN=x</ds:X509IssuerName><ds:X509SerialNumber>{serial}</ds:X509SerialNumber></ds:X509IssuerSerial></ds:X509Data></ds:KeyInfo>
</ds:Signature>"##
        )
    }

    fn check(schema: &Schema, xml: &str) -> Result<(), Error> {
        let doc = xmldsig_xml::parse(xml).unwrap();
        schema.validate(doc.root_element())
    }

    #[test]
    fn test_valid_signature() {
        check(&Schema::Strict, &signature("12345")).unwrap();
        check(&Schema::Relaxed, &signature("12345")).unwrap();
    }

    #[test]
    fn test_long_serial_number() {
        let long = "1".repeat(40);
        let err = check(&Schema::Strict, &signature(&long)).unwrap_err();
        assert!(matches!(err, Error::Schema(ref v) if v.len() == 1));
        check(&Schema::Relaxed, &signature(&long)).unwrap();
        assert!(check(&Schema::Relaxed, &signature("12a")).is_err());
    }

    #[test]
    fn test_structure_violations() {
        let missing_algorithm = signature("1").replace(
            r#"<ds:DigestMethod Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"/>"#,
            "<ds:DigestMethod/>",
        );
        assert!(check(&Schema::Strict, &missing_algorithm).is_err());

        let out_of_order = signature("1").replace(
            "<ds:SignatureValue/>\n  <ds:KeyInfo>",
            "<ds:KeyInfo>",
        );
        let out_of_order = out_of_order.replace("</ds:KeyInfo>", "</ds:KeyInfo><ds:SignatureValue/>");
        let err = check(&Schema::Strict, &out_of_order).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));

        let no_reference = r#"<ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:SignedInfo><ds:CanonicalizationMethod Algorithm="a"/><ds:SignatureMethod Algorithm="b"/></ds:SignedInfo><ds:SignatureValue/></ds:Signature>"#;
        assert!(check(&Schema::Strict, no_reference).is_err());
    }

    #[test]
    fn test_key_info_content() {
        let issuer_serial = "<ds:X509IssuerSerial><ds:X509IssuerName>CN=x</ds:X509IssuerName><ds:X509SerialNumber>1</ds:X509SerialNumber></ds:X509IssuerSerial>";
        let violations = |replacement: &str| {
            let xml = signature("1").replace(issuer_serial, replacement);
            match check(&Schema::Strict, &xml) {
                Err(Error::Schema(v)) => v,
                other => panic!("expected schema error, got {other:?}"),
            }
        };

        assert_eq!(
            violations("<ds:X509IssuerSerial><ds:X509SerialNumber>1</ds:X509SerialNumber></ds:X509IssuerSerial>").len(),
            1
        );
        assert!(violations("<ds:X509Thumbprint/>")[0].contains("X509Thumbprint"));
        assert!(violations("<ds:X509Certificate>not base64!</ds:X509Certificate>")[0]
            .contains("X509Certificate"));

        let empty_key_info = signature("1").replace(
            &format!("<ds:X509Data>{issuer_serial}</ds:X509Data>"),
            "",
        );
        assert!(check(&Schema::Strict, &empty_key_info).is_err());

        let other_namespace = signature("1").replace(
            issuer_serial,
            r#"<ds:X509Certificate>MIIB</ds:X509Certificate><x:Extra xmlns:x="urn:x"/>"#,
        );
        check(&Schema::Strict, &other_namespace).unwrap();
    }

    #[test]
    fn test_value_elements_are_base64() {
        let bad_digest = signature("1").replace("<ds:DigestValue/>", "<ds:DigestValue>%%%</ds:DigestValue>");
        assert!(check(&Schema::Relaxed, &bad_digest).is_err());
        let bad_signature =
            signature("1").replace("<ds:SignatureValue/>", "<ds:SignatureValue>a b c</ds:SignatureValue>");
        assert!(check(&Schema::Relaxed, &bad_signature).is_err());
        let wrapped = signature("1").replace(
            "<ds:SignatureValue/>",
            "<ds:SignatureValue>aGVs\n bG8=</ds:SignatureValue>",
        );
        check(&Schema::Relaxed, &wrapped).unwrap();
    }

    #[test]
    fn test_custom_validator() {
        struct RejectAll;
        impl SchemaValidator for RejectAll {
            fn validate(&self, _: Node<'_, '_>) -> Vec<String> {
                vec!["rejected".into()]
            }
        }
        let err = check(&Schema::Custom(Box::new(RejectAll)), &signature("1")).unwrap_err();
        assert_eq!(err.to_string(), "schema validation failed: rejected");
    }
}
