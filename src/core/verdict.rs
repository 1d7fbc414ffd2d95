use itertools::{EitherOrBoth, Itertools};

use crate::core::domain::{ExecutionOutcome, Verdict};

/// Classifies one execution against the expected output.
///
/// Returns the verdict and the diff report, which is empty unless the
/// verdict is `WrongAnswer`.
pub fn classify(outcome: &ExecutionOutcome, expected: &str) -> (Verdict, String) {
    if outcome.timed_out {
        return (Verdict::TimeLimit, String::new());
    }
    if outcome.is_failure() {
        return (Verdict::Error, String::new());
    }
    if outcome.stdout.trim() == expected.trim() {
        return (Verdict::Accepted, String::new());
    }

    (Verdict::WrongAnswer, diff(expected, &outcome.stdout))
}

/// Line-by-line report of where `actual` departs from `expected`.
///
/// Lines are compared with trailing whitespace stripped; a side that runs
/// out of lines contributes empty strings.
pub fn diff(expected: &str, actual: &str) -> String {
    expected
        .lines()
        .zip_longest(actual.lines())
        .enumerate()
        .filter_map(|(idx, pair)| {
            let (expected, actual) = match pair {
                EitherOrBoth::Both(e, a) => (e, a),
                EitherOrBoth::Left(e) => (e, ""),
                EitherOrBoth::Right(a) => ("", a),
            };
            let (expected, actual) = (expected.trim_end(), actual.trim_end());
            (expected != actual).then(|| {
                format!(
                    "Line {}: expected [{}] / got [{}]",
                    idx + 1,
                    expected,
                    actual
                )
            })
        })
        .join("\n")
}
