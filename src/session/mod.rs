use crate::DiffFile;
use crate::document::{self, ReviewDocument, writer};
use crate::git::{self, DiffBackend};
use crate::review::{AttachmentData, Provenance, ReviewComment, ReviewModel, ReviewState};
use anyhow::{Context, Result};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};

/// Where the files under review come from.
#[derive(Debug, Clone)]
pub enum DiffSource {
    Git {
        args: Vec<String>,
        include_untracked: bool,
    },
    Directory(PathBuf),
    /// No files; a review started without a diff.
    Welcome,
}

/// The diff under review together with its annotation state.
///
/// Owns everything a review needs between loading the diff and saving the
/// document, so nothing is cached globally.
#[derive(Debug, Clone)]
pub struct ReviewSession {
    provenance: Provenance,
    files: Vec<DiffFile>,
    model: ReviewModel,
}

impl ReviewSession {
    pub fn open(source: &DiffSource, backend: &dyn DiffBackend) -> Result<Self> {
        match source {
            DiffSource::Git {
                args,
                include_untracked,
            } => {
                let repository = backend
                    .repo_root()
                    .context("Failed to locate repository root")?;
                let files = git::load_git_diff(backend, args, *include_untracked)
                    .context("Failed to load git diff")?;
                let provenance = Provenance::Git {
                    diff_args: args.join(" "),
                    repository: repository.display().to_string(),
                };
                Ok(Self::from_files(provenance, files))
            }
            DiffSource::Directory(root) => {
                let files = git::load_directory(root)
                    .with_context(|| format!("Failed to read directory {}", root.display()))?;
                let provenance = Provenance::Directory {
                    source_path: root.display().to_string(),
                };
                Ok(Self::from_files(provenance, files))
            }
            DiffSource::Welcome => Ok(Self::from_files(Provenance::Welcome, Vec::new())),
        }
    }

    pub fn from_files(provenance: Provenance, files: Vec<DiffFile>) -> Self {
        let model = ReviewModel::from_diff(&files);
        Self {
            provenance,
            files,
            model,
        }
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn files(&self) -> &[DiffFile] {
        &self.files
    }

    pub fn file(&self, path: &str) -> Option<&DiffFile> {
        self.files.iter().find(|file| file.path() == path)
    }

    pub fn model(&self) -> &ReviewModel {
        &self.model
    }

    /// Replace the model with the snapshot returned by `f`.
    pub fn update<F>(&mut self, f: F)
    where
        F: FnOnce(&ReviewModel) -> ReviewModel,
    {
        self.model = f(&self.model);
    }

    /// Reseed comments and viewed flags from a previously saved document.
    ///
    /// Attachment bytes referenced by that document are loaded so they are
    /// written again next to the new output.
    pub fn resume_from(&mut self, document_path: &Path) -> Result<()> {
        let text = fs::read_to_string(document_path)
            .with_context(|| format!("Failed to read {}", document_path.display()))?;
        let saved = document::parse_document(&text)
            .with_context(|| format!("Failed to parse {}", document_path.display()))?;

        let base = document_path.parent().unwrap_or(Path::new("."));
        self.apply_document(saved, base);
        Ok(())
    }

    fn apply_document(&mut self, saved: ReviewDocument, base: &Path) {
        let comments: Vec<ReviewComment> = saved
            .comments
            .into_iter()
            .map(|comment| load_attachments(comment, base))
            .collect();
        let count = comments.len();

        let mut model = self.model.seed(comments);
        for file in saved.files.iter().filter(|file| file.viewed) {
            model = model.set_viewed(&file.path, true);
        }
        self.model = model;
        info!("resumed {count} comments from saved review");
    }

    pub fn state(&self) -> ReviewState {
        ReviewState::new(self.provenance.clone(), &self.model)
    }

    /// Serialize the review to `output`, with attachments beside it.
    pub fn save(&self, output: &Path) -> Result<()> {
        writer::write_document(&self.state(), output)
            .with_context(|| format!("Failed to save review to {}", output.display()))?;
        info!(
            "saved {} comments on {} files to {}",
            self.model.comment_count(),
            self.model.files().len(),
            output.display()
        );
        Ok(())
    }
}

fn load_attachments(mut comment: ReviewComment, base: &Path) -> ReviewComment {
    for attachment in &mut comment.attachments {
        let AttachmentData::Path(relative) = &attachment.data else {
            continue;
        };
        match fs::read(base.join(relative)) {
            Ok(bytes) => attachment.data = AttachmentData::Bytes(bytes),
            Err(err) => warn!("keeping attachment {relative} as a reference: {err}"),
        }
    }
    comment
}
