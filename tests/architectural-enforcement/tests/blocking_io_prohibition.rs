//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async code in the realtime crates MUST NOT block the runtime.
//! **Required**: Use `tokio::fs`, `tokio::net`, `tokio::time::sleep`, not their `std` counterparts.
//!
//! Synchronous functions (config loading before the runtime starts) and test
//! code are exempt.

use architectural_enforcement::{all_production_lines, SourceLine};

/// Blocking call patterns and what to report for each
const BLOCKING_PATTERNS: &[(&str, &str)] = &[
    ("std::fs::", "Blocking file I/O"),
    ("std::net::", "Blocking network I/O"),
    ("std::thread::sleep", "Blocking sleep"),
    ("thread::sleep(", "Blocking sleep"),
    ("std::process::Command", "Blocking process I/O"),
    ("std::io::stdin()", "Blocking stdin"),
    ("reqwest::blocking", "Blocking HTTP client"),
];

/// Test that async production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_async_code() {
    let violations = find_blocking_io_violations(&all_production_lines());

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking calls found in async production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ REQUIRED async equivalents:");
        eprintln!("  - tokio::fs::read_to_string().await");
        eprintln!("  - tokio::net::TcpStream::connect().await");
        eprintln!("  - tokio::time::sleep().await");

        panic!(
            "\nFound {} blocking call(s) in async production code.\nFix these before merging!",
            violations.len()
        );
    }
}

/// Test that the detector itself flags what it should
#[test]
fn test_detector_flags_blocking_sleep_in_async_fn() {
    let line = |code: &str, in_async_fn: bool| SourceLine {
        path: "probe.rs".into(),
        number: 1,
        text: code.to_string(),
        code: code.to_string(),
        in_async_fn,
    };

    let lines = vec![
        line("std::thread::sleep(Duration::from_secs(1));", true),
        line("let text = std::fs::read_to_string(path)?;", false),
        line("tokio::time::sleep(Duration::from_secs(1)).await;", true),
    ];

    let violations = find_blocking_io_violations(&lines);
    assert_eq!(violations.len(), 1, "{violations:?}");
    assert!(violations[0].contains("Blocking sleep"));
}

fn find_blocking_io_violations(lines: &[SourceLine]) -> Vec<String> {
    let mut violations = Vec::new();

    for line in lines.iter().filter(|l| l.in_async_fn) {
        if let Some((_, kind)) = BLOCKING_PATTERNS
            .iter()
            .find(|(pattern, _)| line.code.contains(pattern))
        {
            violations.push(line.violation(kind));
        }
    }

    violations
}
