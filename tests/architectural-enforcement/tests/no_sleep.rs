//! Sleep Prohibition
//!
//! **Policy**: production code never sleeps to wait for something. Provider
//! calls are bounded with `tokio::time::timeout`, expiration is read from a
//! `Clock`, and periodic work uses `tokio::time::interval`.
//!
//! **Exception**: exponential backoff in retry logic.

use architectural_enforcement::{code_part, production_files, Violation};

#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();

    if !violations.is_empty() {
        eprintln!("\nSleep calls found in production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nUse instead:");
        eprintln!("  - tokio::time::timeout around the awaited operation");
        eprintln!("  - tokio::time::interval for periodic tasks");
        eprintln!("  - a Clock (ManualClock in tests) for expiration");

        panic!("Found {} sleep violation(s) in production code", violations.len());
    }
}

fn find_sleep_violations() -> Vec<Violation> {
    let mut violations = Vec::new();
    for file in production_files() {
        let lines = file.production_lines();
        for (idx, line) in lines.iter().enumerate() {
            let code = code_part(line);
            if !(code.contains("::sleep(") || code.contains(".sleep(")) {
                continue;
            }
            if is_backoff_context(&lines, idx) || is_interval_pattern(&lines, idx) {
                continue;
            }
            violations.push(Violation {
                path: file.path.clone(),
                line: idx + 1,
                rule: "sleep",
                text: line.trim().to_string(),
            });
        }
    }
    violations
}

/// Sleep computing an exponential delay inside retry logic
fn is_backoff_context(lines: &[&str], idx: usize) -> bool {
    let window = &lines[idx.saturating_sub(15)..(idx + 5).min(lines.len())];

    let has_backoff_calc = window
        .iter()
        .any(|l| l.contains("<<") || l.contains("pow") || l.contains("* 2"));
    let has_retry_context = window.iter().any(|l| {
        let l = l.to_lowercase();
        l.contains("retry") || l.contains("backoff") || l.contains("attempt")
    });

    has_backoff_calc && has_retry_context
}

/// Sleep next to an `interval.tick()` loop
fn is_interval_pattern(lines: &[&str], idx: usize) -> bool {
    lines[idx.saturating_sub(20)..(idx + 5).min(lines.len())]
        .iter()
        .any(|l| l.contains("interval.tick()") || l.contains("tokio::time::interval"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_detection() {
        let lines = vec![
            "async fn reconnect(attempt: u32) {",
            "    let delay = base_delay * (1 << attempt);",
            "    tokio::time::sleep(Duration::from_millis(delay)).await;",
            "}",
        ];
        assert!(is_backoff_context(&lines, 2));
    }

    #[test]
    fn test_plain_sleep_is_not_backoff() {
        let lines = vec![
            "async fn wait_for_server() {",
            "    tokio::time::sleep(Duration::from_millis(50)).await;",
            "}",
        ];
        assert!(!is_backoff_context(&lines, 1));
        assert!(!is_interval_pattern(&lines, 1));
    }
}
