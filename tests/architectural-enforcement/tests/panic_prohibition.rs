//! Integration Test: Panic Prohibition
//!
//! **Policy**: library code reports failures through `IpcError`; it MUST NOT
//! call `unwrap()`, `expect()` or `panic!`. A panic while a process-shared
//! mutex is held leaves it locked for every other process.
//! **Exceptions**: test code, the demo binary.

use architectural_enforcement::{production_lines_in, report, CORE_SRC};

const FORBIDDEN: [&str; 4] = [".unwrap()", ".expect(", "panic!(", "unreachable!("];

#[test]
fn test_no_panics_in_library_code() {
    let violations: Vec<String> = production_lines_in(CORE_SRC)
        .iter()
        .flatten()
        .filter(|line| FORBIDDEN.iter().any(|pat| line.code().contains(pat)))
        .map(|line| line.describe())
        .collect();

    report("panicking call in library code", &violations);
}
