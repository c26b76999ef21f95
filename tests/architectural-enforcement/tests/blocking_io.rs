//! Blocking I/O Prohibition
//!
//! **Policy**: async production code uses `tokio::fs`, `tokio::net` and async
//! HTTP. Blocking calls are allowed only in plain `fn`s that run before the
//! runtime does real work (configuration loading, argument parsing).

use architectural_enforcement::{
    code_part, enclosing_fn, production_files, FnContext, Violation,
};

/// Substring, rule name
const BLOCKING_PATTERNS: &[(&str, &str)] = &[
    ("std::fs::", "blocking file I/O"),
    ("use std::fs", "blocking file I/O"),
    ("std::net::", "blocking network I/O"),
    ("use std::net", "blocking network I/O"),
    ("std::process::Command", "blocking process I/O"),
    ("reqwest::blocking", "blocking HTTP client"),
    ("std::io::stdin()", "blocking stdin"),
];

#[test]
fn test_no_blocking_io_in_async_code() {
    let violations = find_blocking_io_violations();

    if !violations.is_empty() {
        eprintln!("\nBlocking I/O found in async production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nUse instead:");
        eprintln!("  - tokio::fs::read / write / rename");
        eprintln!("  - tokio::net::TcpStream");
        eprintln!("  - reqwest::Client (async)");

        panic!(
            "Found {} blocking I/O violation(s) in production code",
            violations.len()
        );
    }
}

fn find_blocking_io_violations() -> Vec<Violation> {
    let mut violations = Vec::new();
    for file in production_files() {
        let lines = file.production_lines();
        violations.extend(check_lines(&file.path, &lines));
    }
    violations
}

fn check_lines(path: &std::path::Path, lines: &[&str]) -> Vec<Violation> {
    let mut violations = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        let code = code_part(line);
        let Some(&(_, rule)) = BLOCKING_PATTERNS
            .iter()
            .find(|(pattern, _)| code.contains(pattern))
        else {
            continue;
        };
        if enclosing_fn(lines, idx) == FnContext::Sync {
            continue;
        }
        violations.push(Violation {
            path: path.to_path_buf(),
            line: idx + 1,
            rule,
            text: line.trim().to_string(),
        });
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_blocking_read_in_async_fn_is_flagged() {
        let lines = vec![
            "pub async fn load(&self) -> Result<String> {",
            "    let raw = std::fs::read_to_string(&self.path)?;",
            "}",
        ];
        let found = check_lines(Path::new("x.rs"), &lines);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].line, 2);
        assert_eq!(found[0].rule, "blocking file I/O");
    }

    #[test]
    fn test_blocking_read_in_sync_fn_is_allowed() {
        let lines = vec![
            "pub fn load_config(path: &Path) -> Result<Config> {",
            "    let raw = std::fs::read_to_string(path)?;",
            "}",
        ];
        assert!(check_lines(Path::new("x.rs"), &lines).is_empty());
    }

    #[test]
    fn test_module_level_import_is_flagged() {
        let lines = vec!["use std::net::TcpStream;"];
        assert_eq!(check_lines(Path::new("x.rs"), &lines).len(), 1);
    }

    #[test]
    fn test_commented_call_is_ignored() {
        let lines = vec!["async fn f() {", "    // std::fs::write(p, b)", "}"];
        assert!(check_lines(Path::new("x.rs"), &lines).is_empty());
    }
}
