//! Failing-test extraction from captured test-runner output.
//!
//! This is a heuristic scrape of free-form console text and is lossy by
//! nature: it recognizes the two common shapes
//!
//! ```text
//!   Failed MyTests.Add_Test [12 ms]
//!   Error Message:
//!    Assert.Equal() Failure
//!   Stack Trace:
//!      at MyTests.Add_Test() in ...
//! ```
//!
//! and the runner-style `MyTests.Add_Test [FAIL]`. Anything else is ignored.

use std::sync::LazyLock;

use regex::Regex;

static FAILED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Failed\s+(.+?)\s*\[").expect("valid regex"));

static FAIL_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?)\s*\[FAIL\]").expect("valid regex"));

/// How far past a `Failed` line to look for its `Error Message:` block.
const MESSAGE_LOOKAHEAD: usize = 20;

/// Maximum number of message lines kept per failure.
const MESSAGE_MAX_LINES: usize = 10;

const DEFAULT_REASON: &str = "Test failed";

/// A failing test and the reason the runner printed for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFailure {
    pub test_name: String,
    pub failure_reason: String,
}

/// Extract failing tests from captured stdout of the test command.
#[must_use]
pub fn extract_failing_tests(output: &str) -> Vec<TestFailure> {
    let lines: Vec<&str> = output.lines().map(str::trim).collect();
    let mut failures: Vec<TestFailure> = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        if let Some(caps) = FAILED_RE.captures(line) {
            let test_name = caps[1].trim().to_string();
            let failure_reason =
                failure_message(&lines[i + 1..]).unwrap_or_else(|| DEFAULT_REASON.to_string());
            failures.push(TestFailure {
                test_name,
                failure_reason,
            });
            continue;
        }

        if line.contains("xUnit.net") {
            continue;
        }
        if let Some(caps) = FAIL_MARKER_RE.captures(line) {
            let test_name = caps[1].trim().to_string();
            if !failures.iter().any(|f| f.test_name == test_name) {
                failures.push(TestFailure {
                    test_name,
                    failure_reason: DEFAULT_REASON.to_string(),
                });
            }
        }
    }

    failures
}

/// Find the `Error Message:` block following a `Failed` line and join its
/// non-stack-frame lines. Returns `None` when no message is found before the
/// next result line.
fn failure_message(following: &[&str]) -> Option<String> {
    let mut rest = following.iter().take(MESSAGE_LOOKAHEAD).enumerate();
    let start = loop {
        let (idx, line) = rest.next()?;
        if *line == "Error Message:" {
            break idx + 1;
        }
        if line.starts_with("Failed ")
            || line.starts_with("Passed ")
            || line.contains("Test run")
            || line.contains("Total tests")
        {
            return None;
        }
    };

    let details: Vec<&str> = following[start..]
        .iter()
        .take(MESSAGE_MAX_LINES)
        .take_while(|l| !l.is_empty() && **l != "Stack Trace:")
        .filter(|l| !l.starts_with("at "))
        .copied()
        .collect();

    if details.is_empty() {
        None
    } else {
        Some(details.join(" "))
    }
}
