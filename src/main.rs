use anyhow::{Context, Result, bail};
use log::warn;
use std::fs;
use std::path::{Path, PathBuf};

use git_annotate::LineKind;
use git_annotate::cli::{self, Commands, CommentArgs, ExportArgs, OutputArgs, ShowArgs, SourceArgs};
use git_annotate::config::{self, AppConfig};
use git_annotate::document::{self, ReviewDocument};
use git_annotate::git::GitCli;
use git_annotate::review::{
    Attachment, AttachmentData, CommentDraft, Provenance, Suggestion, original_snippet,
    range_in_diff,
};
use git_annotate::session::{DiffSource, ReviewSession};

const DEFAULT_OUTPUT: &str = "review.xml";

fn main() -> Result<()> {
    let args = cli::parse_args();
    init_logging(args.verbose);

    let config = config::load_config(args.config.as_deref())?;

    match args.command {
        Commands::Files(source) => handle_files(&source, &config),
        Commands::Show(show_args) => handle_show(&show_args, &config),
        Commands::Comment(comment_args) => handle_comment(&comment_args, &config),
        Commands::Export(export_args) => handle_export(&export_args, &config),
        Commands::Inspect(inspect_args) => handle_inspect(&inspect_args.document),
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

/// Build a session from `--dir` or git, with config defaults filled in.
fn open_session(source: &SourceArgs, config: &AppConfig) -> Result<ReviewSession> {
    let source = match &source.dir {
        Some(dir) => DiffSource::Directory(dir.clone()),
        None => DiffSource::Git {
            args: if source.diff_args.is_empty() {
                config.diff_args.clone()
            } else {
                source.diff_args.clone()
            },
            include_untracked: config.include_untracked && !source.no_untracked,
        },
    };

    ReviewSession::open(&source, &GitCli::new())
}

fn resume(session: &mut ReviewSession, output: &OutputArgs) -> Result<()> {
    if let Some(previous) = &output.resume_from {
        session.resume_from(previous)?;
    }
    Ok(())
}

fn output_path(output: &OutputArgs, config: &AppConfig) -> PathBuf {
    output
        .output
        .clone()
        .or_else(|| config.output.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT))
}

/// Handle the files command - list every file in the diff.
fn handle_files(source: &SourceArgs, config: &AppConfig) -> Result<()> {
    let session = open_session(source, config)?;

    if session.files().is_empty() {
        println!("No changes to review");
        return Ok(());
    }

    for file in session.files() {
        let stats = if file.is_binary {
            "binary".to_string()
        } else {
            format!("+{} -{}", file.additions(), file.deletions())
        };
        let untracked = if file.is_untracked { " (untracked)" } else { "" };
        println!(
            "{:9} {:>12}  {}{}",
            file.change_type.as_str(),
            stats,
            file.path(),
            untracked
        );
    }

    Ok(())
}

/// Handle the show command - print one file's hunks with line numbers.
fn handle_show(args: &ShowArgs, config: &AppConfig) -> Result<()> {
    let session = open_session(&args.source, config)?;
    let Some(file) = session.file(&args.file) else {
        bail!("{} is not part of the diff", args.file);
    };

    println!("--- {}", display_side(&file.old_path));
    println!("+++ {}", display_side(&file.new_path));
    if file.is_binary {
        println!("Binary file");
        return Ok(());
    }

    for hunk in &file.hunks {
        println!("{}", hunk.header);
        for line in &hunk.lines {
            let marker = match line.kind {
                LineKind::Addition => '+',
                LineKind::Deletion => '-',
                LineKind::Context => ' ',
            };
            println!(
                "{:>5} {:>5} {}{}",
                line.old_line_number.map(|n| n.to_string()).unwrap_or_default(),
                line.new_line_number.map(|n| n.to_string()).unwrap_or_default(),
                marker,
                line.content
            );
        }
    }

    Ok(())
}

/// Handle the comment command - add one comment and save the review.
fn handle_comment(args: &CommentArgs, config: &AppConfig) -> Result<()> {
    let mut session = open_session(&args.source, config)?;
    resume(&mut session, &args.output)?;

    let Some(file) = session.file(&args.file) else {
        bail!("{} is not part of the diff", args.file);
    };

    let range = args.line_range();
    let mut draft = CommentDraft::new(&args.file, &args.body);
    if let Some(range) = range {
        if !range_in_diff(file, &range) {
            warn!(
                "{} lines {}-{} of {} are not all shown in the diff",
                range.side, range.start, range.end, args.file
            );
        }
        draft = draft.with_range(range);
    }
    if let Some(category) = &args.category {
        draft = draft.with_category(category);
    }
    if let Some(proposed) = &args.suggest {
        let Some(range) = range else {
            bail!("--suggest needs --old or --new to know which lines it replaces");
        };
        draft = draft.with_suggestion(Suggestion {
            original_code: original_snippet(file, &range),
            proposed_code: proposed.clone(),
        });
    }
    for path in &args.attach {
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read attachment {}", path.display()))?;
        draft = draft.with_attachment(Attachment {
            media_type: media_type_for(path).to_string(),
            data: AttachmentData::Bytes(bytes),
        });
    }

    session.update(|model| model.add_comment(draft));

    let output = output_path(&args.output, config);
    session.save(&output)?;
    println!("✓ Comment added to {}", output.display());
    Ok(())
}

/// Handle the export command - save the review, marking files as viewed.
fn handle_export(args: &ExportArgs, config: &AppConfig) -> Result<()> {
    let mut session = open_session(&args.source, config)?;
    resume(&mut session, &args.output)?;

    for path in &args.viewed {
        if session.model().file(path).is_none() {
            warn!("{path} is not part of the diff");
            continue;
        }
        session.update(|model| model.set_viewed(path, true));
    }

    let output = output_path(&args.output, config);
    session.save(&output)?;
    println!(
        "✓ Review of {} files written to {}",
        session.model().files().len(),
        output.display()
    );
    Ok(())
}

/// Handle the inspect command - print a saved review.
fn handle_inspect(path: &Path) -> Result<()> {
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let review = document::parse_document(&text)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    print_review(&review);
    Ok(())
}

fn print_review(review: &ReviewDocument) {
    let when = review
        .timestamp
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "unknown time".to_string());
    match &review.provenance {
        Provenance::Git {
            diff_args,
            repository,
        } => println!("Review of git diff {diff_args} in {repository} ({when})"),
        Provenance::Directory { source_path } => {
            println!("Review of directory {source_path} ({when})")
        }
        Provenance::Welcome => println!("Review ({when})"),
    }

    for file in &review.files {
        let viewed = if file.viewed { ", viewed" } else { "" };
        println!("{} [{}{}]", file.path, file.change_type, viewed);

        for comment in review.comments.iter().filter(|c| c.file_path == file.path) {
            let location = match comment.line_range {
                Some(range) if range.start == range.end => format!("{} {}", range.side, range.start),
                Some(range) => format!("{} {}-{}", range.side, range.start, range.end),
                None => "file".to_string(),
            };
            let category = comment
                .category
                .as_deref()
                .map(|c| format!(" [{c}]"))
                .unwrap_or_default();
            println!("  {location}{category}: {}", comment.body);
            if let Some(suggestion) = &comment.suggestion {
                println!("    suggestion: {}", suggestion.proposed_code);
            }
            for attachment in &comment.attachments {
                if let AttachmentData::Path(p) = &attachment.data {
                    println!("    attachment: {p} ({})", attachment.media_type);
                }
            }
        }
    }
}

fn display_side(path: &str) -> &str {
    if path.is_empty() { "/dev/null" } else { path }
}

fn media_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "txt" | "log" => "text/plain",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}
