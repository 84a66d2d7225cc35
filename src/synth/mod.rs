use crate::document::ASSET_DIR;
use log::warn;
use std::fs;
use std::io;
use std::path::Path;
use walkdir::WalkDir;

/// Number of leading bytes inspected for a NUL byte when detecting binaries.
const BINARY_PROBE_LEN: usize = 8 * 1024;

/// Directory names never listed when scanning a directory.
const IGNORED_DIRS: &[&str] = &[".git", ASSET_DIR];

/// Render every path under `root` as a brand-new file in unified diff form.
///
/// The result is meant to be fed to [`crate::parser::parse_diff`]. Files
/// that cannot be read are skipped.
pub fn generate<S: AsRef<str>>(paths: &[S], root: &Path) -> String {
    generate_with(paths, |path| fs::read(root.join(path)))
}

/// Like [`generate`], with file contents supplied by `read`.
pub fn generate_with<S, F>(paths: &[S], mut read: F) -> String
where
    S: AsRef<str>,
    F: FnMut(&str) -> io::Result<Vec<u8>>,
{
    let mut stanzas = Vec::with_capacity(paths.len());

    for path in paths {
        let path = path.as_ref();
        match read(path) {
            Ok(bytes) => stanzas.push(file_stanza(path, &bytes)),
            Err(err) => warn!("skipping {path}: {err}"),
        }
    }

    stanzas.join("\n")
}

/// A file is treated as binary if its first 8 KiB contain a NUL byte.
pub fn is_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(BINARY_PROBE_LEN).any(|&b| b == 0)
}

fn file_stanza(path: &str, bytes: &[u8]) -> String {
    let old = quote_path(&format!("a/{path}"));
    let new = quote_path(&format!("b/{path}"));
    let mut out = format!("diff --git {old} {new}\nnew file mode 100644\n");

    if is_binary(bytes) {
        out.push_str(&format!("Binary files /dev/null and {new} differ"));
        return out;
    }

    let text = String::from_utf8_lossy(bytes);
    let mut lines: Vec<&str> = text.split('\n').collect();
    let ends_with_newline = text.ends_with('\n');
    if ends_with_newline {
        lines.pop();
    }
    if text.is_empty() {
        lines.clear();
    }

    out.push_str(&format!("--- /dev/null\n+++ {new}\n"));
    if lines.is_empty() {
        out.push_str("@@ -0,0 +0,0 @@");
        return out;
    }

    out.push_str(&format!("@@ -0,0 +1,{} @@", lines.len()));
    for line in &lines {
        out.push_str("\n+");
        out.push_str(line);
    }
    if !ends_with_newline {
        out.push_str("\n\\ No newline at end of file");
    }

    out
}

/// Quote a header path the way git does when it holds a double quote, a
/// backslash or a control character. Other paths are returned unchanged.
fn quote_path(path: &str) -> String {
    if !path.chars().any(|c| c == '"' || c == '\\' || c.is_control()) {
        return path.to_string();
    }

    let mut out = String::from("\"");
    for c in path.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c if c.is_control() => {
                let mut buf = [0u8; 4];
                for byte in c.encode_utf8(&mut buf).bytes() {
                    out.push_str(&format!("\\{byte:03o}"));
                }
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// List every regular file under `root` as a sorted, `/`-separated path
/// relative to `root`. VCS metadata and review asset directories are skipped.
pub fn collect_directory(root: &Path) -> io::Result<Vec<String>> {
    if !root.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("not a directory: {}", root.display()),
        ));
    }

    let mut paths: Vec<String> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !IGNORED_DIRS.contains(&entry.file_name().to_string_lossy().as_ref())
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(root).ok()?;
            let parts: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            Some(parts.join("/"))
        })
        .collect();

    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_diff;
    use crate::{ChangeType, LineKind};

    #[test]
    fn text_file_becomes_single_addition_hunk() {
        let text = generate_with(&["a.txt"], |_| Ok(b"one\ntwo\n".to_vec()));
        assert_eq!(
            text,
            "diff --git a/a.txt b/a.txt\nnew file mode 100644\n--- /dev/null\n+++ b/a.txt\n@@ -0,0 +1,2 @@\n+one\n+two"
        );
    }

    #[test]
    fn missing_trailing_newline_gets_marker() {
        let text = generate_with(&["a.txt"], |_| Ok(b"one\ntwo".to_vec()));
        assert!(text.ends_with("+two\n\\ No newline at end of file"));

        let files = parse_diff(&text);
        assert_eq!(files[0].hunks[0].lines.len(), 2);
    }

    #[test]
    fn nul_byte_marks_binary() {
        let text = generate_with(&["img.bin"], |_| Ok(vec![0x89, b'P', 0, 1]));
        let files = parse_diff(&text);
        assert_eq!(files.len(), 1);
        assert!(files[0].is_binary);
        assert!(files[0].hunks.is_empty());
        assert_eq!(files[0].new_path, "img.bin");
        assert_eq!(files[0].change_type, ChangeType::Added);
    }

    #[test]
    fn nul_byte_after_probe_window_is_text() {
        let mut bytes = vec![b'a'; BINARY_PROBE_LEN];
        bytes.push(0);
        assert!(!is_binary(&bytes));
        assert!(is_binary(&[b'a', 0]));
    }

    #[test]
    fn unreadable_files_are_skipped() {
        let text = generate_with(&["gone.txt", "here.txt"], |path| {
            if path == "gone.txt" {
                Err(io::Error::new(io::ErrorKind::NotFound, "raced"))
            } else {
                Ok(b"x\n".to_vec())
            }
        });
        let files = parse_diff(&text);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path(), "here.txt");
    }

    #[test]
    fn empty_file_keeps_an_empty_hunk() {
        let files = parse_diff(&generate_with(&["empty"], |_| Ok(Vec::new())));
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].hunks.len(), 1);
        assert!(files[0].hunks[0].lines.is_empty());
    }

    #[test]
    fn generated_lines_are_numbered_from_one() {
        let files = parse_diff(&generate_with(&["f"], |_| Ok(b"a\nb\nc\n".to_vec())));
        let lines = &files[0].hunks[0].lines;
        assert!(lines.iter().all(|l| l.kind == LineKind::Addition));
        let numbers: Vec<_> = lines.iter().map(|l| l.new_line_number).collect();
        assert_eq!(numbers, vec![Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn collect_directory_skips_metadata() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::create_dir_all(dir.path().join(ASSET_DIR)).unwrap();
        fs::write(dir.path().join("src/nested/b.rs"), "b").unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();
        fs::write(dir.path().join(ASSET_DIR).join("x.png"), "x").unwrap();

        let paths = collect_directory(dir.path()).unwrap();
        assert_eq!(paths, vec!["a.txt".to_string(), "src/nested/b.rs".to_string()]);
    }

    #[test]
    fn unusual_paths_are_quoted_and_survive_parsing() {
        assert_eq!(quote_path("b/plain name.txt"), "b/plain name.txt");
        assert_eq!(quote_path("b/tab\there"), "\"b/tab\\there\"");

        let paths = ["tab\there.txt", "say \"hi\".md", "back\\slash", "bell\u{7}.bin"];
        let text = generate_with(&paths, |_| Ok(b"x\n".to_vec()));
        let files = parse_diff(&text);
        let parsed: Vec<_> = files.iter().map(|f| f.new_path.as_str()).collect();
        assert_eq!(parsed, paths);
        assert!(files.iter().all(|f| f.old_path.is_empty()));

        let binary = parse_diff(&generate_with(&["tab\tlogo.png"], |_| Ok(vec![0, 1])));
        assert_eq!(binary[0].new_path, "tab\tlogo.png");
    }

    #[test]
    fn collect_directory_rejects_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_directory(&dir.path().join("nope")).is_err());
    }
}
