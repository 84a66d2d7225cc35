pub mod cli;
pub mod config;
pub mod document;
pub mod git;
pub mod parser;
pub mod review;
pub mod session;
pub mod synth;

use std::fmt;
use std::str::FromStr;

/// How a file changed between the old and new side of a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChangeType {
    Added,
    #[default]
    Modified,
    Deleted,
    Renamed,
}

impl ChangeType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeType::Added => "added",
            ChangeType::Modified => "modified",
            ChangeType::Deleted => "deleted",
            ChangeType::Renamed => "renamed",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "added" => Ok(ChangeType::Added),
            "modified" => Ok(ChangeType::Modified),
            "deleted" => Ok(ChangeType::Deleted),
            "renamed" => Ok(ChangeType::Renamed),
            other => Err(format!("unknown change type: {other}")),
        }
    }
}

/// Classification of a single rendered diff row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Addition,
    Deletion,
    Context,
}

/// One row of a hunk, with the diff marker stripped from `content`.
///
/// Additions carry only a new line number, deletions only an old one,
/// context lines carry both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    pub kind: LineKind,
    pub old_line_number: Option<u32>,
    pub new_line_number: Option<u32>,
    pub content: String,
}

/// A single diff hunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    /// The literal `@@ ... @@` line, including any trailing context text.
    pub header: String,
    pub old_start: u32,
    pub old_lines: u32,
    pub new_start: u32,
    pub new_lines: u32,
    pub lines: Vec<DiffLine>,
}

/// A file changed by a diff.
///
/// An empty `old_path` means the file did not exist before the change,
/// an empty `new_path` means it no longer exists after it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffFile {
    pub old_path: String,
    pub new_path: String,
    pub change_type: ChangeType,
    pub is_binary: bool,
    pub is_untracked: bool,
    pub hunks: Vec<Hunk>,
}

impl DiffFile {
    /// Path used to identify the file in a review: the new path, or the
    /// old path for deletions.
    pub fn path(&self) -> &str {
        if self.new_path.is_empty() {
            &self.old_path
        } else {
            &self.new_path
        }
    }

    pub fn additions(&self) -> usize {
        self.count_lines(LineKind::Addition)
    }

    pub fn deletions(&self) -> usize {
        self.count_lines(LineKind::Deletion)
    }

    fn count_lines(&self, kind: LineKind) -> usize {
        self.hunks
            .iter()
            .flat_map(|hunk| &hunk.lines)
            .filter(|line| line.kind == kind)
            .count()
    }
}
