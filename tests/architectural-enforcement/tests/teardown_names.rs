//! Integration Test: Teardown Uses Recorded Names
//!
//! **Policy**: every unlink/remove call in the library takes the name
//! recorded when the resource was created. A string literal passed to an
//! unlink call would remove whatever happens to carry that name.

use architectural_enforcement::{production_lines_in, report, CORE_SRC};

const UNLINK_CALLS: [&str; 5] = [
    "shm_unlink(\"",
    "mq_unlink(\"",
    "sem_unlink(c\"",
    "remove_file(\"",
    "unlink(\"",
];

#[test]
fn test_no_literal_names_in_teardown() {
    let violations: Vec<String> = production_lines_in(CORE_SRC)
        .iter()
        .flatten()
        .filter(|line| UNLINK_CALLS.iter().any(|pat| line.code().contains(pat)))
        .map(|line| line.describe())
        .collect();

    report("teardown with a literal name", &violations);
}
