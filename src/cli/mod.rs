use crate::review::{LineRange, Side};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "git-annotate",
    about = "Annotate git diffs with line-anchored review comments"
)]
pub struct Cli {
    /// Enable debug logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (defaults to ~/.config/git-annotate/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the files in the diff.
    Files(SourceArgs),
    /// Print the hunks of one file with old/new line numbers.
    Show(ShowArgs),
    /// Add a comment and write the review document.
    Comment(CommentArgs),
    /// Write the review document without adding comments.
    Export(ExportArgs),
    /// Print the comments stored in a review document.
    Inspect(InspectArgs),
}

/// Where the reviewed files come from.
#[derive(Args, Debug, Clone, Default)]
pub struct SourceArgs {
    /// Treat every file in this directory as new instead of running git.
    #[arg(long, conflicts_with = "diff_args")]
    pub dir: Option<PathBuf>,

    /// Leave untracked files out of the git diff.
    #[arg(long)]
    pub no_untracked: bool,

    /// Arguments passed to `git diff` (after `--`).
    #[arg(last = true)]
    pub diff_args: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Path of the file to print.
    #[arg(short, long)]
    pub file: String,
}

#[derive(Args, Debug)]
pub struct OutputArgs {
    /// Where to write the review document.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Seed comments and viewed flags from an earlier review document.
    #[arg(long)]
    pub resume_from: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct CommentArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub output: OutputArgs,

    /// File the comment belongs to.
    #[arg(short, long)]
    pub file: String,

    /// Old-side line or range, e.g. `12` or `12-15`.
    #[arg(long, value_parser = parse_line_span, conflicts_with = "new")]
    pub old: Option<(u32, u32)>,

    /// New-side line or range, e.g. `12` or `12-15`.
    #[arg(long, value_parser = parse_line_span)]
    pub new: Option<(u32, u32)>,

    /// Comment text.
    #[arg(short, long)]
    pub body: String,

    #[arg(short, long)]
    pub category: Option<String>,

    /// Replacement code; the commented lines become the original code.
    #[arg(long)]
    pub suggest: Option<String>,

    /// Files to attach to the comment.
    #[arg(long)]
    pub attach: Vec<PathBuf>,
}

impl CommentArgs {
    pub fn line_range(&self) -> Option<LineRange> {
        match (self.old, self.new) {
            (Some((start, end)), _) => LineRange::new(Side::Old, start, end),
            (None, Some((start, end))) => LineRange::new(Side::New, start, end),
            (None, None) => None,
        }
    }
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub output: OutputArgs,

    /// Mark these files as viewed.
    #[arg(long)]
    pub viewed: Vec<String>,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Review document to read.
    pub document: PathBuf,
}

/// Parse `N` or `N-M` into an inclusive span.
pub fn parse_line_span(s: &str) -> Result<(u32, u32), String> {
    let (start, end) = match s.split_once('-') {
        Some((start, end)) => (start, end),
        None => (s, s),
    };
    let start: u32 = start
        .trim()
        .parse()
        .map_err(|_| format!("invalid line number: {start}"))?;
    let end: u32 = end
        .trim()
        .parse()
        .map_err(|_| format!("invalid line number: {end}"))?;
    if start > end {
        return Err(format!("range start {start} is after end {end}"));
    }
    Ok((start, end))
}

/// Parse CLI arguments.
pub fn parse_args() -> Cli {
    Cli::parse()
}
