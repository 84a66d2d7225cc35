use crate::DiffFile;
use crate::parser::parse_diff;
use crate::synth;
use log::debug;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("not in a git repository")]
    NotARepo,
    #[error("git command failed: {0}")]
    CommandFailed(String),
    #[error("invalid git diff argument: {0}")]
    InvalidArg(String),
    #[error("utf-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GitError>;

/// Source of diff text and repository facts for a review session.
pub trait DiffBackend {
    /// Raw unified diff text for the given `git diff` arguments.
    fn diff(&self, args: &[String]) -> Result<String>;
    /// Untracked, non-ignored files relative to the repository root.
    fn untracked_files(&self) -> Result<Vec<String>>;
    fn repo_root(&self) -> Result<PathBuf>;
    /// Contents of a file relative to the repository root.
    fn read_file(&self, path: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.repo_root().map_err(std::io::Error::other)?.join(path))
    }
}

/// Runs the `git` executable in `workdir` (or the current directory).
#[derive(Debug, Clone, Default)]
pub struct GitCli {
    workdir: Option<PathBuf>,
}

impl GitCli {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_dir(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: Some(workdir.into()),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new("git");
        if let Some(dir) = &self.workdir {
            command.current_dir(dir);
        }
        command
    }

    fn run(&self, args: &[&str], extra: &[String]) -> Result<String> {
        let output = self.command().args(args).args(extra).output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::CommandFailed(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8(output.stdout)?)
    }
}

impl DiffBackend for GitCli {
    fn diff(&self, args: &[String]) -> Result<String> {
        for arg in args {
            validate_diff_arg(arg)?;
        }
        self.run(&["diff", "--no-color", "--no-ext-diff"], args)
    }

    fn untracked_files(&self) -> Result<Vec<String>> {
        let stdout = self.run(&["ls-files", "--others", "--exclude-standard"], &[])?;
        Ok(stdout
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn repo_root(&self) -> Result<PathBuf> {
        let output = self
            .command()
            .arg("rev-parse")
            .arg("--show-toplevel")
            .output()?;

        if !output.status.success() {
            return Err(GitError::NotARepo);
        }

        let path = String::from_utf8(output.stdout)?.trim().to_string();

        Ok(PathBuf::from(path))
    }
}

/// Validate a diff argument to prevent shell injection.
///
/// Allows: alphanumeric, dash, underscore, slash, dot, tilde, caret, @, colon,
/// braces, equals and comma.
pub fn validate_diff_arg(arg: &str) -> Result<()> {
    if arg.is_empty() {
        return Err(GitError::InvalidArg("empty argument".to_string()));
    }

    // Check for shell metacharacters
    for ch in arg.chars() {
        if !ch.is_alphanumeric()
            && !matches!(
                ch,
                '-' | '_' | '/' | '.' | '~' | '^' | '@' | ':' | '{' | '}' | '=' | ','
            )
        {
            return Err(GitError::InvalidArg(format!(
                "invalid character '{}' in {:?}",
                ch, arg
            )));
        }
    }

    Ok(())
}

/// Load the diff for `args` and, optionally, untracked files as additions.
pub fn load_git_diff(
    backend: &dyn DiffBackend,
    args: &[String],
    include_untracked: bool,
) -> Result<Vec<DiffFile>> {
    let mut files = parse_diff(&backend.diff(args)?);
    debug!("git diff {:?} yielded {} files", args, files.len());

    if include_untracked {
        let untracked = backend.untracked_files()?;
        if !untracked.is_empty() {
            let text = synth::generate_with(&untracked, |path| backend.read_file(path));
            let mut extra = parse_diff(&text);
            for file in &mut extra {
                file.is_untracked = true;
            }
            debug!("added {} untracked files", extra.len());
            files.extend(extra);
        }
    }

    Ok(files)
}

/// Load every file under `root` as an addition.
pub fn load_directory(root: &Path) -> std::io::Result<Vec<DiffFile>> {
    let paths = synth::collect_directory(root)?;
    Ok(parse_diff(&synth::generate(&paths, root)))
}
