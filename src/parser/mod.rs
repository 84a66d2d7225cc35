use crate::{ChangeType, DiffFile, DiffLine, Hunk, LineKind};
use log::debug;

/// Parse unified diff text into structured `DiffFile` entries.
///
/// Accepts `git diff` output as well as plain `diff -u` output. Never fails:
/// malformed constructs are dropped or read as context. A file is kept only
/// if it is binary or produced at least one hunk, so pure renames and files
/// with missing hunk data do not appear in the result.
pub fn parse_diff(input: &str) -> Vec<DiffFile> {
    if input.trim().is_empty() {
        return Vec::new();
    }

    let mut parser = DiffParser::default();
    for line in input.lines() {
        parser.feed(line);
    }
    parser.finish()
}

/// The file currently being assembled, plus which path headers it has seen.
#[derive(Default)]
struct FileCursor {
    file: DiffFile,
    saw_old_header: bool,
    saw_new_header: bool,
}

#[derive(Default)]
struct DiffParser {
    files: Vec<DiffFile>,
    file: Option<FileCursor>,
    hunk: Option<Hunk>,
    old_line: u32,
    new_line: u32,
    old_remaining: u32,
    new_remaining: u32,
}

impl DiffParser {
    fn feed(&mut self, line: &str) {
        if line.starts_with("diff --git ") {
            self.flush_file();
            self.file = Some(FileCursor::default());
            return;
        }

        if line.starts_with("@@") {
            self.start_hunk(line);
            return;
        }

        // While the open hunk still expects lines, everything is content.
        if self.hunk.is_some() && !self.hunk_exhausted() {
            self.push_hunk_line(line);
            return;
        }

        if self.parse_header(line) {
            return;
        }

        self.push_hunk_line(line);
    }

    fn finish(mut self) -> Vec<DiffFile> {
        self.flush_file();
        self.files
    }

    fn hunk_exhausted(&self) -> bool {
        self.old_remaining == 0 && self.new_remaining == 0
    }

    /// Handle file-level header lines. Returns `false` if `line` is not one.
    fn parse_header(&mut self, line: &str) -> bool {
        if let Some(raw) = line.strip_prefix("--- ") {
            // A second `---` (or one after hunks) starts the next file in
            // output without `diff --git` separators.
            let needs_new_file = self.file.as_ref().is_none_or(|cursor| {
                cursor.saw_old_header || self.hunk.is_some() || !cursor.file.hunks.is_empty()
            });
            if needs_new_file {
                self.flush_file();
            }
            let cursor = self.file.get_or_insert_with(FileCursor::default);
            cursor.file.old_path = normalize_path(raw);
            cursor.saw_old_header = true;
            return true;
        }

        let Some(cursor) = self.file.as_mut() else {
            return false;
        };
        let file = &mut cursor.file;

        if let Some(raw) = line.strip_prefix("+++ ") {
            file.new_path = normalize_path(raw);
            cursor.saw_new_header = true;
        } else if line.starts_with("new file mode") {
            file.change_type = ChangeType::Added;
        } else if line.starts_with("deleted file mode") {
            file.change_type = ChangeType::Deleted;
        } else if let Some(raw) = line.strip_prefix("rename from ") {
            file.change_type = ChangeType::Renamed;
            file.old_path = unquote(raw);
        } else if let Some(raw) = line.strip_prefix("rename to ") {
            file.change_type = ChangeType::Renamed;
            file.new_path = unquote(raw);
        } else if line.starts_with("Binary files ") {
            file.is_binary = true;
            if let Some((old, new)) = binary_paths(line) {
                if !cursor.saw_old_header {
                    file.old_path = normalize_path(old);
                }
                if !cursor.saw_new_header {
                    file.new_path = normalize_path(new);
                }
            }
        } else {
            return false;
        }

        true
    }

    fn start_hunk(&mut self, line: &str) {
        self.flush_hunk();

        let Some(hunk) = parse_hunk_header(line) else {
            debug!("skipping unparsable hunk header: {line}");
            return;
        };

        if self.file.is_none() {
            self.file = Some(FileCursor::default());
        }
        self.old_line = hunk.old_start;
        self.new_line = hunk.new_start;
        self.old_remaining = hunk.old_lines;
        self.new_remaining = hunk.new_lines;
        self.hunk = Some(hunk);
    }

    fn push_hunk_line(&mut self, line: &str) {
        let expects_both = self.old_remaining > 0 && self.new_remaining > 0;
        let Some(hunk) = self.hunk.as_mut() else {
            return;
        };

        let (kind, content) = match line.as_bytes().first() {
            Some(b'+') => (LineKind::Addition, &line[1..]),
            Some(b'-') => (LineKind::Deletion, &line[1..]),
            Some(b' ') => (LineKind::Context, &line[1..]),
            Some(b'\\') => return,
            Some(_) => (LineKind::Context, line),
            // Some tools strip the lone space of an empty context line.
            None if expects_both => (LineKind::Context, ""),
            None => return,
        };

        let takes_old = kind != LineKind::Addition;
        let takes_new = kind != LineKind::Deletion;
        let next_old = if takes_old { self.old_line.checked_add(1) } else { Some(self.old_line) };
        let next_new = if takes_new { self.new_line.checked_add(1) } else { Some(self.new_line) };
        let (Some(next_old), Some(next_new)) = (next_old, next_new) else {
            debug!("line number overflow, dropping line: {line}");
            return;
        };

        let mut old_line_number = None;
        let mut new_line_number = None;
        if takes_old {
            old_line_number = Some(self.old_line);
            self.old_remaining = self.old_remaining.saturating_sub(1);
        }
        if takes_new {
            new_line_number = Some(self.new_line);
            self.new_remaining = self.new_remaining.saturating_sub(1);
        }
        self.old_line = next_old;
        self.new_line = next_new;

        hunk.lines.push(DiffLine {
            kind,
            old_line_number,
            new_line_number,
            content: content.to_string(),
        });
    }

    fn flush_hunk(&mut self) {
        self.old_remaining = 0;
        self.new_remaining = 0;
        if let Some(hunk) = self.hunk.take()
            && let Some(cursor) = self.file.as_mut()
        {
            cursor.file.hunks.push(hunk);
        }
    }

    fn flush_file(&mut self) {
        self.flush_hunk();
        let Some(cursor) = self.file.take() else {
            return;
        };

        let file = cursor.file;
        if file.is_binary || !file.hunks.is_empty() {
            self.files.push(file);
        } else {
            debug!(
                "dropping diff entry without hunks: {:?}",
                if file.path().is_empty() { "<unnamed>" } else { file.path() }
            );
        }
    }
}

/// Parse a hunk header like `@@ -5,4 +5,5 @@ fn main()`. Counts default to 1.
fn parse_hunk_header(line: &str) -> Option<Hunk> {
    let rest = line.strip_prefix("@@ ")?;
    let end = rest.find(" @@")?;
    let mut parts = rest[..end].split(' ');

    let (old_start, old_lines) = parse_range(parts.next()?.strip_prefix('-')?)?;
    let (new_start, new_lines) = parse_range(parts.next()?.strip_prefix('+')?)?;
    if parts.next().is_some() {
        return None;
    }
    // Every announced line must have a representable number.
    old_start.checked_add(old_lines)?;
    new_start.checked_add(new_lines)?;

    Some(Hunk {
        header: line.to_string(),
        old_start,
        old_lines,
        new_start,
        new_lines,
        lines: Vec::new(),
    })
}

/// Parse a range like "start,count" or "start" (count defaults to 1).
fn parse_range(s: &str) -> Option<(u32, u32)> {
    match s.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((s.parse().ok()?, 1)),
    }
}

/// Turn a `---`/`+++`/`Binary files` path into a repository path.
///
/// `/dev/null` becomes the empty string. A one-letter prefix such as `a/`,
/// `b/` or the mnemonic `c/`, `i/`, `w/`, `o/` is stripped only when the
/// path is longer than the prefix itself.
fn normalize_path(raw: &str) -> String {
    // `diff -u` appends a tab and a timestamp.
    let raw = raw.split('\t').next().unwrap_or(raw);
    let path = unquote(raw);

    if path == "/dev/null" {
        return String::new();
    }

    if path.len() > 2 && path.as_bytes()[1] == b'/' {
        path[2..].to_string()
    } else {
        path
    }
}

/// Undo git's C-style quoting of paths with unusual characters.
fn unquote(raw: &str) -> String {
    let Some(inner) = raw
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    else {
        return raw.to_string();
    };

    let mut bytes = Vec::with_capacity(inner.len());
    let mut chars = inner.bytes().peekable();
    while let Some(b) = chars.next() {
        if b != b'\\' {
            bytes.push(b);
            continue;
        }
        match chars.next() {
            Some(b'n') => bytes.push(b'\n'),
            Some(b't') => bytes.push(b'\t'),
            Some(b'r') => bytes.push(b'\r'),
            Some(b'a') => bytes.push(0x07),
            Some(b'b') => bytes.push(0x08),
            Some(b'f') => bytes.push(0x0c),
            Some(b'v') => bytes.push(0x0b),
            Some(d @ b'0'..=b'7') => {
                let mut value = u32::from(d - b'0');
                for _ in 0..2 {
                    match chars.peek() {
                        Some(&o @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(o - b'0');
                            chars.next();
                        }
                        _ => break,
                    }
                }
                bytes.push((value & 0xff) as u8);
            }
            Some(other) => bytes.push(other),
            None => bytes.push(b'\\'),
        }
    }

    String::from_utf8_lossy(&bytes).into_owned()
}

/// Extract the two paths from `Binary files X and Y differ`.
fn binary_paths(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix("Binary files ")?.strip_suffix(" differ")?;
    let split = rest
        .find(" and b/")
        .or_else(|| rest.find(" and /dev/null"))
        .or_else(|| rest.find(" and "))?;
    Some((&rest[..split], &rest[split + " and ".len()..]))
}
