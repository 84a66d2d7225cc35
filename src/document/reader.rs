use super::{DocumentError, Result};
use crate::ChangeType;
use crate::review::{
    Attachment, AttachmentData, LineRange, Provenance, ReviewComment, Side, Suggestion,
    new_comment_id,
};
use chrono::{DateTime, FixedOffset};
use log::{debug, warn};
use roxmltree::{Document, Node};

/// A review document read back into memory.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewDocument {
    pub timestamp: Option<DateTime<FixedOffset>>,
    pub provenance: Provenance,
    pub files: Vec<DocumentFile>,
    pub comments: Vec<ReviewComment>,
}

/// Per-file flags recorded in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFile {
    pub path: String,
    pub change_type: ChangeType,
    pub viewed: bool,
}

/// Parse a review document produced by [`super::serialize`].
///
/// Only a missing `<review>` root is an error. Everything else is read
/// leniently: a missing body becomes empty, files without a path are
/// skipped, and each comment receives a fresh id. Attachments are returned
/// as path references; their bytes are not read.
pub fn parse_document(text: &str) -> Result<ReviewDocument> {
    let doc = Document::parse(text)?;
    let root = doc.root_element();
    if root.tag_name().name() != "review" {
        return Err(DocumentError::MissingRoot);
    }

    let timestamp = root
        .attribute("timestamp")
        .and_then(|value| DateTime::parse_from_rfc3339(value).ok());

    let mut files = Vec::new();
    let mut comments = Vec::new();
    for file in children(root, "file") {
        let Some(path) = file.attribute("path") else {
            warn!("skipping <file> without a path attribute");
            continue;
        };

        files.push(DocumentFile {
            path: path.to_string(),
            change_type: file
                .attribute("change-type")
                .and_then(|value| value.parse().ok())
                .unwrap_or_default(),
            viewed: matches!(file.attribute("viewed"), Some("true" | "1")),
        });
        comments.extend(children(file, "comment").map(|node| read_comment(node, path)));
    }

    debug!(
        "read review document with {} files and {} comments",
        files.len(),
        comments.len()
    );

    Ok(ReviewDocument {
        timestamp,
        provenance: read_provenance(root),
        files,
        comments,
    })
}

fn read_provenance(root: Node) -> Provenance {
    let diff_args = root.attribute("git-diff-args");
    let repository = root.attribute("repository");
    if diff_args.is_some() || repository.is_some() {
        return Provenance::Git {
            diff_args: diff_args.unwrap_or_default().to_string(),
            repository: repository.unwrap_or_default().to_string(),
        };
    }

    match root.attribute("source-path") {
        Some(source_path) => Provenance::Directory {
            source_path: source_path.to_string(),
        },
        None => Provenance::Welcome,
    }
}

fn read_comment(node: Node, file_path: &str) -> ReviewComment {
    ReviewComment {
        id: new_comment_id(),
        file_path: file_path.to_string(),
        line_range: read_range(node, Side::Old).or_else(|| read_range(node, Side::New)),
        body: child_text(node, "body").unwrap_or_default(),
        category: child_text(node, "category"),
        suggestion: children(node, "suggestion").next().map(|s| Suggestion {
            original_code: child_text(s, "original-code").unwrap_or_default(),
            proposed_code: child_text(s, "proposed-code").unwrap_or_default(),
        }),
        attachments: children(node, "attachment")
            .filter_map(|a| {
                Some(Attachment {
                    media_type: a.attribute("media-type").unwrap_or_default().to_string(),
                    data: AttachmentData::Path(a.attribute("path")?.to_string()),
                })
            })
            .collect(),
    }
}

/// Read `<side>-line-start`/`<side>-line-end`. A missing end means a
/// single-line range.
fn read_range(node: Node, side: Side) -> Option<LineRange> {
    let start = node
        .attribute(format!("{side}-line-start").as_str())?
        .parse()
        .ok()?;
    let end = node
        .attribute(format!("{side}-line-end").as_str())
        .and_then(|value| value.parse().ok())
        .unwrap_or(start);
    LineRange::new(side, start, end)
}

fn children<'a, 'input>(
    node: Node<'a, 'input>,
    name: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children()
        .filter(move |child| child.is_element() && child.tag_name().name() == name)
}

/// Full text of the first child element called `name`.
fn child_text(node: Node, name: &'static str) -> Option<String> {
    children(node, name).next().map(|child| {
        child
            .children()
            .filter(|n| n.is_text())
            .filter_map(|n| n.text())
            .collect()
    })
}
