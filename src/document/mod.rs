//! The persisted review document: an XML file in the
//! `urn:git-annotate:review:1` namespace, validated against
//! `schema/review.xsd` whenever it is written.

pub mod reader;
pub mod schema;
pub mod writer;

pub use reader::{DocumentFile, ReviewDocument, parse_document};
pub use writer::{serialize, serialize_with_assets};

use log::warn;
use std::path::PathBuf;
use thiserror::Error;

/// Namespace of the review document's elements.
pub const NAMESPACE: &str = "urn:git-annotate:review:1";

/// Directory next to the output document that holds attachment payloads.
pub const ASSET_DIR: &str = ".git-annotate-assets";

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("review document does not match the schema:\n  {}", .0.join("\n  "))]
    SchemaViolation(Vec<String>),
    #[error("review document has no <review> root element")]
    MissingRoot,
    #[error("review document is not well-formed XML: {0}")]
    Malformed(#[from] roxmltree::Error),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, DocumentError>;

/// Escape text for element content or attribute values.
///
/// Carriage returns are written as a character reference so parsers do not
/// fold them into newlines. Characters XML 1.0 cannot carry at all (most C0
/// controls, U+FFFE, U+FFFF) are replaced with U+FFFD.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut replaced = 0usize;
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\r' => out.push_str("&#13;"),
            c if !is_xml_char(c) => {
                out.push(char::REPLACEMENT_CHARACTER);
                replaced += 1;
            }
            c => out.push(c),
        }
    }
    if replaced > 0 {
        warn!("replaced {replaced} characters that XML cannot represent");
    }
    out
}

/// The XML 1.0 `Char` production.
fn is_xml_char(c: char) -> bool {
    matches!(
        c,
        '\t' | '\n' | '\r' | '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_handles_all_special_characters() {
        assert_eq!(
            escape(r#"Use <X> & "y" 'z'"#),
            "Use &lt;X&gt; &amp; &quot;y&quot; &apos;z&apos;"
        );
    }

    #[test]
    fn escape_does_not_double_escape_entities_in_input() {
        assert_eq!(escape("&lt;"), "&amp;lt;");
        assert_eq!(escape("a\r\nb"), "a&#13;\nb");
        assert_eq!(escape("plain"), "plain");
    }

    #[test]
    fn escape_replaces_characters_xml_cannot_carry() {
        assert_eq!(escape("a\u{1b}[31mb"), "a\u{FFFD}[31mb");
        assert_eq!(escape("\u{0}\u{8}\u{b}\u{c}"), "\u{FFFD}".repeat(4));
        assert_eq!(escape("\u{FFFE}\u{FFFF}"), "\u{FFFD}\u{FFFD}");
        assert_eq!(escape("tab\there\nnext \u{1F600}"), "tab\there\nnext \u{1F600}");
    }
}
