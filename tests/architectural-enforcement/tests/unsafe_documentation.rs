//! Integration Test: Unsafe Documentation
//!
//! **Policy**: every `unsafe { .. }` block and `unsafe impl` in production
//! code is preceded by a `// SAFETY:` comment explaining why the raw
//! pointer, descriptor or syscall use is sound.
//! **Exceptions**: `unsafe fn` declarations (documented with `# Safety`),
//! test code.

use architectural_enforcement::{
    production_lines_in, report, CORE_SRC, DEMO_SRC, SAFETY_COMMENT_WINDOW,
};

#[test]
fn test_unsafe_blocks_have_safety_comments() {
    let mut violations = Vec::new();

    for dir in [CORE_SRC, DEMO_SRC] {
        for lines in production_lines_in(dir) {
            for (idx, line) in lines.iter().enumerate() {
                let code = line.code();
                if !(code.contains("unsafe {") || code.contains("unsafe impl")) {
                    continue;
                }
                let start = idx.saturating_sub(SAFETY_COMMENT_WINDOW);
                if !lines[start..=idx].iter().any(|l| l.text.contains("SAFETY:")) {
                    violations.push(line.describe());
                }
            }
        }
    }

    report("unsafe without a // SAFETY: comment", &violations);
}
