//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! across the realtime crates:
//! - All I/O inside async code goes through tokio
//! - Production code propagates errors instead of panicking on them
//!
//! The helpers here walk the production sources and hand each test the lines
//! that are not test code.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["realtime/core/src", "realtime/daemon/src"];

/// Files that only exist for tests
const TEST_ONLY_FILES: &[&str] = &["test_utils.rs"];

/// A production source line
#[derive(Debug, Clone)]
pub struct SourceLine {
    /// File the line came from
    pub path: PathBuf,
    /// 1-based line number
    pub number: usize,
    /// Raw line text
    pub text: String,
    /// Line text with any trailing `//` comment removed
    pub code: String,
    /// Whether the nearest enclosing `fn` is `async`
    pub in_async_fn: bool,
}

impl SourceLine {
    /// Format a violation message for this line
    pub fn violation(&self, kind: &str) -> String {
        format!(
            "{}:{} - {}: {}",
            self.path.display(),
            self.number,
            kind,
            self.text.trim()
        )
    }
}

/// Workspace root, two levels above this package
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .unwrap_or_else(|_| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../.."))
}

/// All `.rs` files under the production directories
pub fn production_files() -> Vec<PathBuf> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
        {
            let path = entry.path();
            let is_rust = path.extension().and_then(|s| s.to_str()) == Some("rs");
            let test_only = path
                .file_name()
                .and_then(|s| s.to_str())
                .is_some_and(|name| TEST_ONLY_FILES.contains(&name));
            if is_rust && !test_only {
                files.push(path.to_path_buf());
            }
        }
    }

    files.sort();
    files
}

/// Production lines of one file: doc comments, comments and
/// `#[cfg(test)] mod ... { }` blocks are skipped
pub fn production_lines(path: &Path) -> Vec<SourceLine> {
    let Ok(content) = fs::read_to_string(path) else {
        return Vec::new();
    };
    let lines: Vec<&str> = content.lines().collect();

    let mut out = Vec::new();
    let mut in_async_fn = false;
    let mut idx = 0;

    while idx < lines.len() {
        let trimmed = lines[idx].trim();

        if trimmed == "#[cfg(test)]" && opens_module(&lines, idx + 1) {
            idx = skip_block(&lines, idx + 1);
            continue;
        }

        if trimmed.starts_with("//") {
            idx += 1;
            continue;
        }

        if let Some(is_async) = fn_signature(trimmed) {
            in_async_fn = is_async;
        }

        let code = lines[idx].split("//").next().unwrap_or(lines[idx]);
        out.push(SourceLine {
            path: path.to_path_buf(),
            number: idx + 1,
            text: lines[idx].to_string(),
            code: code.to_string(),
            in_async_fn,
        });
        idx += 1;
    }

    out
}

/// Every production line across the workspace
pub fn all_production_lines() -> Vec<SourceLine> {
    production_files()
        .iter()
        .flat_map(|path| production_lines(path))
        .collect()
}

/// `Some(is_async)` when `line` starts a function
fn fn_signature(line: &str) -> Option<bool> {
    let line = line
        .trim_start_matches("pub(crate) ")
        .trim_start_matches("pub(super) ")
        .trim_start_matches("pub ");
    if line.starts_with("async fn ") {
        Some(true)
    } else if line.starts_with("fn ") || line.starts_with("const fn ") {
        Some(false)
    } else {
        None
    }
}

fn opens_module(lines: &[&str], from: usize) -> bool {
    lines[from..]
        .iter()
        .map(|l| l.trim())
        .find(|l| !l.is_empty())
        .is_some_and(|l| l.starts_with("mod ") && l.ends_with('{'))
}

/// Index just past the brace block that opens at or after `from`
fn skip_block(lines: &[&str], from: usize) -> usize {
    let mut depth = 0usize;
    let mut opened = false;

    for (offset, line) in lines[from..].iter().enumerate() {
        for ch in line.chars() {
            match ch {
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => depth = depth.saturating_sub(1),
                _ => {}
            }
        }
        if opened && depth == 0 {
            return from + offset + 1;
        }
    }

    lines.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_signature_detection() {
        assert_eq!(fn_signature("pub async fn get(&self) {"), Some(true));
        assert_eq!(fn_signature("pub(crate) fn failed(id: String) -> Self {"), Some(false));
        assert_eq!(fn_signature("let f = 1;"), None);
    }

    #[test]
    fn test_skip_block_handles_nesting() {
        let lines = ["mod tests {", "    fn a() {", "    }", "}", "after"];
        assert_eq!(skip_block(&lines, 0), 4);
    }

    #[test]
    fn test_production_files_found() {
        assert!(
            !production_files().is_empty(),
            "no production sources under {}",
            workspace_root().display()
        );
    }
}
