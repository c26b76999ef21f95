//! Architectural Enforcement
//!
//! Source scanners backing the policy tests in `tests/`:
//! - no sleep calls in production code
//! - no blocking I/O inside async functions
//!
//! Scanning is line based. A file's trailing `#[cfg(test)] mod tests { .. }`
//! block is excluded, as are support files that are only compiled for tests.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Production source roots, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["rootcause/core/src", "rootcause/probe/src"];

/// Files compiled only under `#[cfg(test)]`
pub const TEST_ONLY_FILES: &[&str] = &["test_server.rs"];

/// Workspace root (two levels above this crate)
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// A Rust source file with its contents loaded
#[derive(Debug)]
pub struct SourceFile {
    /// Path on disk
    pub path: PathBuf,
    /// File contents
    pub content: String,
}

impl SourceFile {
    /// Lines that belong to production code (the test module tail removed)
    #[must_use]
    pub fn production_lines(&self) -> Vec<&str> {
        production_lines(&self.content)
    }
}

/// One policy breach
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File the breach is in
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// Which rule was broken
    pub rule: &'static str,
    /// Offending source line
    pub text: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.rule,
            self.text
        )
    }
}

/// Load every production `.rs` file under [`PRODUCTION_DIRS`]
///
/// # Panics
///
/// Panics if a production root is missing, so a moved crate cannot silently
/// pass every policy.
#[must_use]
pub fn production_files() -> Vec<SourceFile> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        assert!(path.is_dir(), "production source root missing: {}", path.display());

        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
        {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            let is_test_only = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| TEST_ONLY_FILES.contains(&name));
            if is_test_only {
                continue;
            }
            if let Ok(content) = fs::read_to_string(path) {
                files.push(SourceFile {
                    path: path.to_path_buf(),
                    content,
                });
            }
        }
    }
    files
}

/// Lines before the `#[cfg(test)]` test module, if there is one
///
/// A `#[cfg(test)]` on a single item (for example a test-only `mod x;`
/// declaration) does not end production code.
#[must_use]
pub fn production_lines(content: &str) -> Vec<&str> {
    let lines: Vec<&str> = content.lines().collect();
    let tail = lines.iter().enumerate().position(|(i, line)| {
        line.trim() == "#[cfg(test)]"
            && lines[i + 1..]
                .iter()
                .map(|l| l.trim())
                .find(|l| !l.is_empty())
                .is_some_and(|next| next.starts_with("mod ") && next.ends_with('{'))
    });
    match tail {
        Some(end) => lines[..end].to_vec(),
        None => lines,
    }
}

/// Code part of a line (line comments stripped)
#[must_use]
pub fn code_part(line: &str) -> &str {
    let trimmed = line.trim_start();
    if trimmed.starts_with("//") {
        return "";
    }
    match line.find(" //") {
        Some(at) => &line[..at],
        None => line,
    }
}

/// Kind of function a line sits in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FnContext {
    /// `async fn`
    Async,
    /// plain `fn`
    Sync,
    /// No enclosing function found before a module or impl boundary
    None,
}

/// Classify the nearest function signature above `idx`
#[must_use]
pub fn enclosing_fn(lines: &[&str], idx: usize) -> FnContext {
    if lines.is_empty() {
        return FnContext::None;
    }
    for line in lines[..=idx.min(lines.len() - 1)].iter().rev() {
        let signature = strip_visibility(line.trim());
        if signature.starts_with("async fn ") {
            return FnContext::Async;
        }
        if signature.starts_with("fn ") {
            return FnContext::Sync;
        }
        if signature.starts_with("mod ")
            || signature.starts_with("impl ")
            || signature.starts_with("impl<")
        {
            return FnContext::None;
        }
    }
    FnContext::None
}

fn strip_visibility(line: &str) -> &str {
    for prefix in ["pub(crate) ", "pub(super) ", "pub "] {
        if let Some(rest) = line.strip_prefix(prefix) {
            return rest;
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_module_tail_is_dropped() {
        let content = "fn a() {}\n#[cfg(test)]\nmod tests {\n    fn b() {}\n}\n";
        assert_eq!(production_lines(content), vec!["fn a() {}"]);
    }

    #[test]
    fn test_single_test_item_keeps_rest() {
        let content = "#[cfg(test)]\nmod helper;\nfn a() {}\n";
        assert_eq!(production_lines(content).len(), 3);
    }

    #[test]
    fn test_enclosing_fn() {
        let lines = vec![
            "impl Store {",
            "    pub async fn save(&self) {",
            "        write();",
            "    }",
            "    pub(crate) fn load() {",
            "        read();",
            "    }",
            "}",
        ];
        assert_eq!(enclosing_fn(&lines, 2), FnContext::Async);
        assert_eq!(enclosing_fn(&lines, 5), FnContext::Sync);
        assert_eq!(enclosing_fn(&lines, 0), FnContext::None);
    }

    #[test]
    fn test_code_part() {
        assert_eq!(code_part("    // sleep(1)"), "");
        assert_eq!(code_part("let a = 1; // sleep(1)"), "let a = 1;");
        assert_eq!(code_part("let url = \"http://x\";"), "let url = \"http://x\";");
    }

    #[test]
    fn test_workspace_root_has_production_dirs() {
        let root = workspace_root();
        for dir in PRODUCTION_DIRS {
            assert!(root.join(dir).is_dir(), "{dir}");
        }
    }
}
