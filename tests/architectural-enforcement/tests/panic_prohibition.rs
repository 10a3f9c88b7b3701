//! Integration Test: Panic Prohibition
//!
//! **Policy**: Production code propagates failures as `Result` values.
//! `.unwrap()` and `.expect(..)` belong in tests only.

use architectural_enforcement::{all_production_lines, SourceLine};

const PANICKING_CALLS: &[&str] = &[".unwrap()", ".expect(", "panic!(", "unimplemented!(", "todo!("];

#[test]
fn test_no_unwrap_or_expect_in_production_code() {
    let violations = find_panic_violations(&all_production_lines());

    if !violations.is_empty() {
        eprintln!("\n❌ Panicking calls found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ Use `?`, `ok_or`, `unwrap_or_else` or log and continue.");

        panic!(
            "\nFound {} panicking call(s) in production code.",
            violations.len()
        );
    }
}

#[test]
fn test_detector_ignores_fallible_combinators() {
    let line = |code: &str| SourceLine {
        path: "probe.rs".into(),
        number: 1,
        text: code.to_string(),
        code: code.to_string(),
        in_async_fn: false,
    };

    let lines = vec![
        line("let n = value.unwrap_or(0);"),
        line("let n = value.unwrap_or_default();"),
        line("let n = value.unwrap();"),
    ];

    assert_eq!(find_panic_violations(&lines).len(), 1);
}

fn find_panic_violations(lines: &[SourceLine]) -> Vec<String> {
    lines
        .iter()
        .filter(|line| PANICKING_CALLS.iter().any(|call| line.code.contains(call)))
        .map(|line| line.violation("Panicking call"))
        .collect()
}
