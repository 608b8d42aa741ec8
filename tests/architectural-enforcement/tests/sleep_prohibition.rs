//! Integration Test: Sleep Prohibition
//!
//! **Policy**: production code MUST NOT call sleep methods. Cross-process
//! ordering goes through semaphores, mutexes or blocking I/O, never timing.
//! **Exceptions**: test code.

use architectural_enforcement::{production_lines_in, report, CORE_SRC, DEMO_SRC};

#[test]
fn test_no_sleep_in_production_code() {
    let violations: Vec<String> = [CORE_SRC, DEMO_SRC]
        .into_iter()
        .flat_map(production_lines_in)
        .flatten()
        .filter(|line| {
            let code = line.code();
            code.contains("::sleep(") || code.contains(".sleep(")
        })
        .map(|line| line.describe())
        .collect();

    report("sleep in production code", &violations);
}
