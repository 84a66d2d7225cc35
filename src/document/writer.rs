use super::schema::{REVIEW_SCHEMA, Schema};
use super::{ASSET_DIR, DocumentError, NAMESPACE, Result, escape};
use crate::review::{Attachment, AttachmentData, FileReviewState, Provenance, ReviewComment, ReviewState};
use chrono::SecondsFormat;
use log::{debug, warn};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Render `state` as a review document and validate it.
///
/// No asset directory is available here, so attachments holding in-memory
/// bytes are left out of the document. Use [`serialize_with_assets`] or
/// [`write_document`] to keep them.
pub fn serialize(state: &ReviewState) -> Result<String> {
    let mut assets = AssetStore::new(None);
    validated(render(state, &mut assets), REVIEW_SCHEMA)
}

/// Render `state` for a document stored in `document_dir`, writing in-memory
/// attachment payloads to the asset directory beside it.
pub fn serialize_with_assets(state: &ReviewState, document_dir: &Path) -> Result<String> {
    let mut assets = AssetStore::new(Some(document_dir));
    validated(render(state, &mut assets), REVIEW_SCHEMA)
}

/// Serialize `state` and write it to `output`, assets included.
pub fn write_document(state: &ReviewState, output: &Path) -> Result<()> {
    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let text = serialize_with_assets(state, dir)?;
    fs::write(output, text).map_err(|source| DocumentError::Io {
        path: output.to_path_buf(),
        source,
    })
}

/// Validate `text` against the schema in `schema_source`.
///
/// A schema that cannot be compiled means validation cannot run at all; the
/// text is then returned unvalidated so the review is not lost.
fn validated(text: String, schema_source: &str) -> Result<String> {
    let schema = match Schema::compile(schema_source) {
        Ok(schema) => schema,
        Err(err) => {
            warn!("schema validator unavailable, saving review unvalidated: {err}");
            return Ok(text);
        }
    };

    schema
        .validate(&text)
        .map_err(DocumentError::SchemaViolation)?;
    debug!("review document validated ({} bytes)", text.len());
    Ok(text)
}

/// Writes attachment payloads into the asset directory on demand.
struct AssetStore<'a> {
    document_dir: Option<&'a Path>,
    created: bool,
}

impl<'a> AssetStore<'a> {
    fn new(document_dir: Option<&'a Path>) -> Self {
        Self {
            document_dir,
            created: false,
        }
    }

    /// The document-relative path for `attachment`, or `None` if it could
    /// not be stored.
    fn reference(
        &mut self,
        comment: &ReviewComment,
        index: usize,
        attachment: &Attachment,
    ) -> Option<String> {
        let bytes = match &attachment.data {
            AttachmentData::Path(path) => return Some(path.clone()),
            AttachmentData::Bytes(bytes) => bytes,
        };

        let Some(dir) = self.document_dir else {
            warn!(
                "dropping attachment {index} of comment {}: no asset directory",
                comment.id
            );
            return None;
        };

        let asset_dir = dir.join(ASSET_DIR);
        if !self.created {
            if let Err(err) = fs::create_dir_all(&asset_dir) {
                warn!("failed to create {}: {err}", asset_dir.display());
                return None;
            }
            self.created = true;
        }

        // Named by content, so saving a resumed review reuses the file.
        let file_name = format!(
            "{}.{}",
            content_hash(bytes),
            extension_for(&attachment.media_type)
        );
        let asset_path = asset_dir.join(&file_name);
        if fs::read(&asset_path).is_ok_and(|existing| existing == *bytes) {
            debug!("attachment {file_name} already stored");
            return Some(format!("{ASSET_DIR}/{file_name}"));
        }
        match fs::write(&asset_path, bytes) {
            Ok(()) => Some(format!("{ASSET_DIR}/{file_name}")),
            Err(err) => {
                warn!("failed to write attachment {file_name}: {err}");
                None
            }
        }
    }
}

fn render(state: &ReviewState, assets: &mut AssetStore) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(&format!("<review xmlns=\"{NAMESPACE}\""));
    push_attr(
        &mut out,
        "timestamp",
        &state.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
    );
    match &state.provenance {
        Provenance::Git {
            diff_args,
            repository,
        } => {
            push_attr(&mut out, "git-diff-args", diff_args);
            push_attr(&mut out, "repository", repository);
        }
        Provenance::Directory { source_path } => push_attr(&mut out, "source-path", source_path),
        Provenance::Welcome => {}
    }
    out.push_str(">\n");

    for file in state.files.iter() {
        render_file(&mut out, file, assets);
    }

    out.push_str("</review>\n");
    out
}

fn render_file(out: &mut String, file: &FileReviewState, assets: &mut AssetStore) {
    out.push_str("  <file");
    push_attr(out, "path", &file.path);
    push_attr(out, "change-type", file.change_type.as_str());
    push_attr(out, "viewed", if file.viewed { "true" } else { "false" });

    if file.comments.is_empty() {
        out.push_str("/>\n");
        return;
    }

    out.push_str(">\n");
    for comment in file.comments.iter() {
        render_comment(out, comment, assets);
    }
    out.push_str("  </file>\n");
}

fn render_comment(out: &mut String, comment: &ReviewComment, assets: &mut AssetStore) {
    out.push_str("    <comment");
    if let Some(range) = comment.line_range {
        push_attr(out, &format!("{}-line-start", range.side), &range.start.to_string());
        push_attr(out, &format!("{}-line-end", range.side), &range.end.to_string());
    }
    out.push_str(">\n");

    push_text(out, 6, "body", &comment.body);
    if let Some(category) = &comment.category {
        push_text(out, 6, "category", category);
    }
    if let Some(suggestion) = &comment.suggestion {
        out.push_str("      <suggestion>\n");
        push_text(out, 8, "original-code", &suggestion.original_code);
        push_text(out, 8, "proposed-code", &suggestion.proposed_code);
        out.push_str("      </suggestion>\n");
    }
    for (index, attachment) in comment.attachments.iter().enumerate() {
        if let Some(path) = assets.reference(comment, index, attachment) {
            out.push_str("      <attachment");
            push_attr(out, "path", &path);
            push_attr(out, "media-type", &attachment.media_type);
            out.push_str("/>\n");
        }
    }

    out.push_str("    </comment>\n");
}

fn push_attr(out: &mut String, name: &str, value: &str) {
    // Parsers turn raw whitespace in attribute values into spaces.
    let value = escape(value).replace('\n', "&#10;").replace('\t', "&#9;");
    out.push_str(&format!(" {name}=\"{value}\""));
}

fn push_text(out: &mut String, indent: usize, tag: &str, text: &str) {
    out.push_str(&format!("{:indent$}<{tag}>{}</{tag}>\n", "", escape(text)));
}

/// Compute SHA-256 hash of an attachment payload.
fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn extension_for(media_type: &str) -> &'static str {
    match media_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "text/plain" => "txt",
        "application/pdf" => "pdf",
        _ => "bin",
    }
}
