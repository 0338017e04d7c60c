#![forbid(unsafe_code)]

//! Character escaping for canonical output.
//!
//! | char | text     | attribute | PI data  |
//! |------|----------|-----------|----------|
//! | `&`  | `&amp;`  | `&amp;`   |          |
//! | `<`  | `&lt;`   | `&lt;`    |          |
//! | `>`  | `&gt;`   |           |          |
//! | `"`  |          | `&quot;`  |          |
//! | TAB  |          | `&#x9;`   |          |
//! | LF   |          | `&#xA;`   |          |
//! | CR   | `&#xD;`  | `&#xD;`   | `&#xD;`  |

#[derive(Clone, Copy)]
enum Context {
    Text,
    Attribute,
    Pi,
}

fn escape(s: &str, context: Context) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        let replacement = match (ch, context) {
            ('\r', _) => "&#xD;",
            ('&', Context::Text | Context::Attribute) => "&amp;",
            ('<', Context::Text | Context::Attribute) => "&lt;",
            ('>', Context::Text) => "&gt;",
            ('"', Context::Attribute) => "&quot;",
            ('\t', Context::Attribute) => "&#x9;",
            ('\n', Context::Attribute) => "&#xA;",
            _ => {
                out.push(ch);
                continue;
            }
        };
        out.push_str(replacement);
    }
    out
}

/// Escape text node content.
pub fn escape_text(s: &str) -> String {
    escape(s, Context::Text)
}

/// Escape an attribute value.
pub fn escape_attr(s: &str) -> String {
    escape(s, Context::Attribute)
}

/// Escape processing instruction data.
pub fn escape_pi(s: &str) -> String {
    escape(s, Context::Pi)
}
