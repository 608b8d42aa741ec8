//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce resource-lifecycle
//! and safety rules over the workspace sources:
//! - Every `unsafe` block or impl carries a `// SAFETY:` comment
//! - No `unwrap()`, `expect()` or `panic!` in library code
//! - No sleep() calls in production code
//! - Teardown unlinks recorded names, never string literals
//!
//! The helpers here walk the production part of each source file: everything
//! above the first `#[cfg(test)]` line, which by convention opens the
//! file's test module.

use std::fs;
use std::path::{Path, PathBuf};

/// Library sources
pub const CORE_SRC: &str = "ipcx/core/src";

/// Demo binary sources
pub const DEMO_SRC: &str = "ipcx/demo/src";

/// How many lines above an `unsafe` site a `// SAFETY:` comment may sit
pub const SAFETY_COMMENT_WINDOW: usize = 6;

/// One line of production code
#[derive(Debug, Clone)]
pub struct SourceLine {
    /// File the line came from
    pub path: PathBuf,
    /// 1-based line number
    pub number: usize,
    /// Full line text
    pub text: String,
}

impl SourceLine {
    /// The line with any trailing `//` comment removed
    #[must_use]
    pub fn code(&self) -> &str {
        self.text.split("//").next().unwrap_or(&self.text)
    }

    /// `path:line - text`, for violation reports
    #[must_use]
    pub fn describe(&self) -> String {
        format!("{}:{} - {}", self.path.display(), self.number, self.text.trim())
    }
}

/// Workspace root, two levels above this package
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// All `.rs` files under `dir` (relative to the workspace root)
#[must_use]
pub fn rust_files(dir: &str) -> Vec<PathBuf> {
    let root = workspace_root().join(dir);
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(|e| e.path().to_path_buf())
        .collect()
}

/// Production lines of one file: everything before its `#[cfg(test)]` module
#[must_use]
pub fn production_lines(path: &Path) -> Vec<SourceLine> {
    let Ok(content) = fs::read_to_string(path) else {
        return Vec::new();
    };
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| !line.trim_start().starts_with("#[cfg(test)]"))
        .map(|(idx, line)| SourceLine {
            path: path.to_path_buf(),
            number: idx + 1,
            text: line.to_string(),
        })
        .collect()
}

/// Production lines of every file under `dir`
#[must_use]
pub fn production_lines_in(dir: &str) -> Vec<Vec<SourceLine>> {
    rust_files(dir)
        .iter()
        .map(|path| production_lines(path))
        .collect()
}

/// Print violations and fail the calling test
///
/// # Panics
///
/// Always, when `violations` is non-empty.
pub fn report(rule: &str, violations: &[String]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n❌ {rule}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    panic!(
        "\nFound {} violation(s) of: {rule}\nFix these before merging!",
        violations.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sources_are_found() {
        assert!(!rust_files(CORE_SRC).is_empty());
        assert!(!rust_files(DEMO_SRC).is_empty());
    }

    #[test]
    fn test_code_strips_comments() {
        let line = SourceLine {
            path: PathBuf::from("x.rs"),
            number: 1,
            text: "let a = 1; // note".to_string(),
        };
        assert_eq!(line.code(), "let a = 1; ");
    }
}
