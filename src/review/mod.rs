use crate::{ChangeType, DiffFile};
use chrono::{DateTime, Utc};
use log::warn;
use std::fmt;
use std::sync::Arc;

/// Which version of a file a line number refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Old,
    New,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Old => f.write_str("old"),
            Side::New => f.write_str("new"),
        }
    }
}

/// An inclusive range of line numbers on one side of a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    pub side: Side,
    pub start: u32,
    pub end: u32,
}

impl LineRange {
    /// Returns `None` if `start > end`.
    pub fn new(side: Side, start: u32, end: u32) -> Option<Self> {
        (start <= end).then_some(Self { side, start, end })
    }

    pub fn single(side: Side, line: u32) -> Self {
        Self {
            side,
            start: line,
            end: line,
        }
    }

    pub fn contains(&self, side: Side, line: u32) -> bool {
        self.side == side && self.start <= line && line <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub original_code: String,
    pub proposed_code: String,
}

/// Where an attachment's bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentData {
    /// Payload held in memory, written to the asset directory on save.
    Bytes(Vec<u8>),
    /// Reference to an already stored asset, relative to the review document.
    Path(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub media_type: String,
    pub data: AttachmentData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewComment {
    pub id: String,
    pub file_path: String,
    /// `None` for a comment on the whole file.
    pub line_range: Option<LineRange>,
    pub body: String,
    pub category: Option<String>,
    pub suggestion: Option<Suggestion>,
    pub attachments: Vec<Attachment>,
}

/// The fields of a comment that the caller chooses; the id is minted by the model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentDraft {
    pub file_path: String,
    pub line_range: Option<LineRange>,
    pub body: String,
    pub category: Option<String>,
    pub suggestion: Option<Suggestion>,
    pub attachments: Vec<Attachment>,
}

impl CommentDraft {
    pub fn new(file_path: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn with_range(mut self, range: LineRange) -> Self {
        self.line_range = Some(range);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: Suggestion) -> Self {
        self.suggestion = Some(suggestion);
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    fn into_comment(self) -> ReviewComment {
        ReviewComment {
            id: new_comment_id(),
            file_path: self.file_path,
            line_range: self.line_range,
            body: self.body,
            category: self.category,
            suggestion: self.suggestion,
            attachments: self.attachments,
        }
    }
}

/// A partial update for [`ReviewModel::update_comment`]. `None` leaves the
/// field unchanged; the nested options clear a field with `Some(None)`.
#[derive(Debug, Clone, Default)]
pub struct CommentPatch {
    pub line_range: Option<Option<LineRange>>,
    pub body: Option<String>,
    pub category: Option<Option<String>>,
    pub suggestion: Option<Option<Suggestion>>,
    pub attachments: Option<Vec<Attachment>>,
}

impl CommentPatch {
    fn apply(&self, comment: &ReviewComment) -> ReviewComment {
        let mut updated = comment.clone();
        if let Some(range) = self.line_range {
            updated.line_range = range;
        }
        if let Some(body) = &self.body {
            updated.body = body.clone();
        }
        if let Some(category) = &self.category {
            updated.category = category.clone();
        }
        if let Some(suggestion) = &self.suggestion {
            updated.suggestion = suggestion.clone();
        }
        if let Some(attachments) = &self.attachments {
            updated.attachments = attachments.clone();
        }
        updated
    }
}

/// Review state of one file in the loaded diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReviewState {
    pub path: String,
    pub change_type: ChangeType,
    pub viewed: bool,
    pub comments: Arc<[ReviewComment]>,
}

impl FileReviewState {
    pub fn new(path: impl Into<String>, change_type: ChangeType) -> Self {
        Self {
            path: path.into(),
            change_type,
            viewed: false,
            comments: Arc::from(Vec::new()),
        }
    }
}

/// Immutable snapshot of every file's review state.
///
/// Mutators return a new snapshot. Untouched files keep sharing their
/// comment lists with the previous snapshot, touched ones get fresh lists,
/// so `Arc::ptr_eq` tells observers exactly what changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewModel {
    files: Arc<[FileReviewState]>,
}

impl Default for ReviewModel {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ReviewModel {
    pub fn new(files: Vec<FileReviewState>) -> Self {
        Self {
            files: Arc::from(files),
        }
    }

    /// One unviewed, uncommented entry per file in the diff.
    pub fn from_diff(files: &[DiffFile]) -> Self {
        Self::new(
            files
                .iter()
                .map(|file| FileReviewState::new(file.path(), file.change_type))
                .collect(),
        )
    }

    pub fn files(&self) -> &Arc<[FileReviewState]> {
        &self.files
    }

    pub fn file(&self, path: &str) -> Option<&FileReviewState> {
        self.files.iter().find(|file| file.path == path)
    }

    pub fn comment(&self, id: &str) -> Option<&ReviewComment> {
        self.files
            .iter()
            .flat_map(|file| file.comments.iter())
            .find(|comment| comment.id == id)
    }

    /// Append a comment with a freshly minted id. Unknown files are ignored.
    pub fn add_comment(&self, draft: CommentDraft) -> Self {
        if self.file(&draft.file_path).is_none() {
            warn!("ignoring comment for unknown file {}", draft.file_path);
            return self.clone();
        }
        let path = draft.file_path.clone();
        let comment = draft.into_comment();
        self.map_file(&path, move |file| {
            let comments = file.comments.iter().cloned().chain([comment]).collect();
            FileReviewState {
                comments,
                ..file.clone()
            }
        })
    }

    pub fn update_comment(&self, id: &str, patch: &CommentPatch) -> Self {
        let Some(path) = self.comment(id).map(|c| c.file_path.clone()) else {
            return self.clone();
        };
        self.map_file(&path, |file| FileReviewState {
            comments: file
                .comments
                .iter()
                .map(|c| if c.id == id { patch.apply(c) } else { c.clone() })
                .collect(),
            ..file.clone()
        })
    }

    pub fn delete_comment(&self, id: &str) -> Self {
        let Some(path) = self.comment(id).map(|c| c.file_path.clone()) else {
            return self.clone();
        };
        self.map_file(&path, |file| FileReviewState {
            comments: file.comments.iter().filter(|c| c.id != id).cloned().collect(),
            ..file.clone()
        })
    }

    pub fn toggle_viewed(&self, path: &str) -> Self {
        self.map_file(path, |file| FileReviewState {
            viewed: !file.viewed,
            ..file.clone()
        })
    }

    pub fn set_viewed(&self, path: &str, viewed: bool) -> Self {
        match self.file(path) {
            Some(file) if file.viewed != viewed => self.toggle_viewed(path),
            _ => self.clone(),
        }
    }

    /// Append previously saved comments to the files they belong to.
    /// Comments for files absent from this model are dropped.
    pub fn seed(&self, comments: Vec<ReviewComment>) -> Self {
        let (known, unknown): (Vec<_>, Vec<_>) = comments
            .into_iter()
            .partition(|comment| self.file(&comment.file_path).is_some());
        for comment in &unknown {
            warn!(
                "dropping saved comment for {}: file is not part of this diff",
                comment.file_path
            );
        }
        if known.is_empty() {
            return self.clone();
        }

        let files: Vec<FileReviewState> = self
            .files
            .iter()
            .map(|file| {
                let mut matching = known.iter().filter(|c| c.file_path == file.path).peekable();
                if matching.peek().is_none() {
                    return file.clone();
                }
                FileReviewState {
                    comments: file.comments.iter().chain(matching).cloned().collect(),
                    ..file.clone()
                }
            })
            .collect();
        Self::new(files)
    }

    pub fn comments_for_file(&self, path: &str) -> &[ReviewComment] {
        self.file(path).map_or(&[][..], |file| &file.comments[..])
    }

    /// Comments whose range on `side` covers `line`. File-level comments
    /// never match.
    pub fn comments_for_line(&self, path: &str, line: u32, side: Side) -> Vec<&ReviewComment> {
        self.comments_for_file(path)
            .iter()
            .filter(|comment| {
                comment
                    .line_range
                    .is_some_and(|range| range.contains(side, line))
            })
            .collect()
    }

    pub fn comment_count(&self) -> usize {
        self.files.iter().map(|file| file.comments.len()).sum()
    }

    fn map_file<F>(&self, path: &str, f: F) -> Self
    where
        F: FnOnce(&FileReviewState) -> FileReviewState,
    {
        let Some(index) = self.files.iter().position(|file| file.path == path) else {
            return self.clone();
        };
        let mut files = self.files.to_vec();
        files[index] = f(&self.files[index]);
        Self::new(files)
    }
}

/// How the reviewed file set was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    Git {
        diff_args: String,
        repository: String,
    },
    Directory {
        source_path: String,
    },
    Welcome,
}

/// Everything persisted in a review document.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewState {
    pub timestamp: DateTime<Utc>,
    pub provenance: Provenance,
    pub files: Arc<[FileReviewState]>,
}

impl ReviewState {
    pub fn new(provenance: Provenance, model: &ReviewModel) -> Self {
        Self {
            timestamp: Utc::now(),
            provenance,
            files: model.files().clone(),
        }
    }
}

pub fn new_comment_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Whether every line of `range` exists on its side of `file`'s hunks.
pub fn range_in_diff(file: &DiffFile, range: &LineRange) -> bool {
    let lines = side_lines(file, range.side);
    (range.start..=range.end).all(|n| lines.iter().any(|(number, _)| *number == n))
}

/// The text of the lines covered by `range`, joined with newlines. This is
/// the code a suggestion proposes to replace.
pub fn original_snippet(file: &DiffFile, range: &LineRange) -> String {
    side_lines(file, range.side)
        .into_iter()
        .filter(|(number, _)| range.start <= *number && *number <= range.end)
        .map(|(_, content)| content)
        .collect::<Vec<_>>()
        .join("\n")
}

fn side_lines(file: &DiffFile, side: Side) -> Vec<(u32, &str)> {
    file.hunks
        .iter()
        .flat_map(|hunk| &hunk.lines)
        .filter_map(|line| {
            let number = match side {
                Side::Old => line.old_line_number,
                Side::New => line.new_line_number,
            }?;
            Some((number, line.content.as_str()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_diff;

    fn model() -> ReviewModel {
        ReviewModel::new(vec![
            FileReviewState::new("src/a.rs", ChangeType::Modified),
            FileReviewState::new("src/b.rs", ChangeType::Added),
        ])
    }

    #[test]
    fn line_range_rejects_inverted_bounds() {
        assert!(LineRange::new(Side::New, 5, 4).is_none());
        assert_eq!(
            LineRange::new(Side::Old, 3, 3),
            Some(LineRange::single(Side::Old, 3))
        );
    }

    #[test]
    fn add_comment_appends_with_unique_ids() {
        let m = model()
            .add_comment(CommentDraft::new("src/a.rs", "first"))
            .add_comment(CommentDraft::new("src/a.rs", "second"));
        let comments = m.comments_for_file("src/a.rs");
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].body, "first");
        assert_eq!(comments[1].body, "second");
        assert_ne!(comments[0].id, comments[1].id);
    }

    #[test]
    fn add_comment_for_unknown_file_is_noop() {
        let before = model();
        let after = before.add_comment(CommentDraft::new("nope.rs", "lost"));
        assert_eq!(after, before);
        assert_eq!(after.comment_count(), 0);
    }

    #[test]
    fn mutation_leaves_previous_snapshot_untouched() {
        let before = model();
        let after = before.add_comment(CommentDraft::new("src/a.rs", "hi"));

        assert!(before.comments_for_file("src/a.rs").is_empty());
        assert!(!Arc::ptr_eq(before.files(), after.files()));
        assert!(!Arc::ptr_eq(
            &before.files()[0].comments,
            &after.files()[0].comments
        ));
        // The untouched file shares its comment list.
        assert!(Arc::ptr_eq(
            &before.files()[1].comments,
            &after.files()[1].comments
        ));
    }

    #[test]
    fn update_comment_merges_fields() {
        let m = model().add_comment(
            CommentDraft::new("src/a.rs", "old body")
                .with_category("bug")
                .with_range(LineRange::single(Side::New, 4)),
        );
        let id = m.comments_for_file("src/a.rs")[0].id.clone();

        let patch = CommentPatch {
            body: Some("new body".to_string()),
            ..CommentPatch::default()
        };
        let m = m.update_comment(&id, &patch);
        let comment = m.comment(&id).unwrap();
        assert_eq!(comment.body, "new body");
        assert_eq!(comment.category.as_deref(), Some("bug"));
        assert_eq!(comment.line_range, Some(LineRange::single(Side::New, 4)));

        let cleared = m.update_comment(
            &id,
            &CommentPatch {
                category: Some(None),
                ..CommentPatch::default()
            },
        );
        assert_eq!(cleared.comment(&id).unwrap().category, None);
    }

    #[test]
    fn update_and_delete_unknown_id_are_noops() {
        let m = model().add_comment(CommentDraft::new("src/a.rs", "keep"));
        assert_eq!(m.update_comment("missing", &CommentPatch::default()), m);
        assert_eq!(m.delete_comment("missing"), m);
    }

    #[test]
    fn delete_comment_removes_only_that_comment() {
        let m = model()
            .add_comment(CommentDraft::new("src/a.rs", "one"))
            .add_comment(CommentDraft::new("src/a.rs", "two"));
        let id = m.comments_for_file("src/a.rs")[0].id.clone();
        let m = m.delete_comment(&id);
        let remaining = m.comments_for_file("src/a.rs");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].body, "two");
    }

    #[test]
    fn toggle_viewed_flips_flag() {
        let m = model().toggle_viewed("src/b.rs");
        assert!(m.file("src/b.rs").unwrap().viewed);
        assert!(!m.file("src/a.rs").unwrap().viewed);
        let m = m.toggle_viewed("src/b.rs");
        assert!(!m.file("src/b.rs").unwrap().viewed);
        assert!(m.set_viewed("src/a.rs", true).file("src/a.rs").unwrap().viewed);
    }

    #[test]
    fn comments_for_line_matches_side_and_interval() {
        let m = model()
            .add_comment(
                CommentDraft::new("src/a.rs", "range").with_range(LineRange {
                    side: Side::New,
                    start: 10,
                    end: 12,
                }),
            )
            .add_comment(
                CommentDraft::new("src/a.rs", "old side").with_range(LineRange::single(Side::Old, 11)),
            )
            .add_comment(CommentDraft::new("src/a.rs", "whole file"));

        let hits = m.comments_for_line("src/a.rs", 11, Side::New);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].body, "range");

        assert_eq!(m.comments_for_line("src/a.rs", 12, Side::New).len(), 1);
        assert!(m.comments_for_line("src/a.rs", 13, Side::New).is_empty());
        assert_eq!(m.comments_for_line("src/a.rs", 11, Side::Old)[0].body, "old side");
    }

    #[test]
    fn seed_keeps_only_known_files() {
        let saved = vec![
            ReviewComment {
                id: "x".to_string(),
                file_path: "src/b.rs".to_string(),
                line_range: None,
                body: "kept".to_string(),
                category: None,
                suggestion: None,
                attachments: Vec::new(),
            },
            ReviewComment {
                id: "y".to_string(),
                file_path: "gone.rs".to_string(),
                line_range: None,
                body: "dropped".to_string(),
                category: None,
                suggestion: None,
                attachments: Vec::new(),
            },
        ];
        let m = model().seed(saved);
        assert_eq!(m.comment_count(), 1);
        assert_eq!(m.comments_for_file("src/b.rs")[0].body, "kept");
    }

    #[test]
    fn snippet_and_range_follow_diff_sides() {
        let files = parse_diff("--- a/f\n+++ b/f\n@@ -1,3 +1,3 @@\n keep\n-before\n+after\n tail\n");
        let file = &files[0];

        let old = LineRange::new(Side::Old, 1, 2).unwrap();
        assert_eq!(original_snippet(file, &old), "keep\nbefore");
        assert!(range_in_diff(file, &old));

        let new = LineRange::new(Side::New, 2, 3).unwrap();
        assert_eq!(original_snippet(file, &new), "after\ntail");
        assert!(!range_in_diff(file, &LineRange::single(Side::New, 9)));
    }

    #[test]
    fn from_diff_uses_display_path() {
        let files = parse_diff(
            "--- a/gone.txt\n+++ /dev/null\n@@ -1 +0,0 @@\n-x\n--- /dev/null\n+++ b/new.txt\n@@ -0,0 +1 @@\n+y\n",
        );
        let m = ReviewModel::from_diff(&files);
        let paths: Vec<&str> = m.files().iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["gone.txt", "new.txt"]);
    }
}
