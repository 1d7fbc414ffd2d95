use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_TIMEOUT_MS;

#[derive(Clone, Debug)]
pub struct Problem {
    pub id: String,
    pub cases: Vec<CaseRef>,
}

/// A case as listed by the dataset: its name and where to read it from.
/// The contents are loaded only when the case is about to run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaseRef {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestCase {
    pub name: String,
    pub stdin: String,
    pub expected: String,
}

#[derive(Clone, Debug)]
pub struct Submission {
    pub code: String,
    /// Only honoured by single-shot execution.
    pub stdin: Option<String>,
    pub timeout_ms: u64,
}

impl Submission {
    /// Builds a submission, falling back to the default timeout when the
    /// requested one is absent or not positive.
    pub fn new(code: impl Into<String>, stdin: Option<String>, timeout_ms: Option<i64>) -> Self {
        Self::with_default_timeout(code, stdin, timeout_ms, DEFAULT_TIMEOUT_MS)
    }

    pub fn with_default_timeout(
        code: impl Into<String>,
        stdin: Option<String>,
        timeout_ms: Option<i64>,
        default_ms: u64,
    ) -> Self {
        let timeout_ms = match timeout_ms {
            Some(ms) if ms > 0 => ms as u64,
            _ => default_ms,
        };
        Self {
            code: code.into(),
            stdin,
            timeout_ms,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub stdout: String,
    /// Failure message, empty when the execution did not fail.
    pub stderr: String,
    pub elapsed_ms: u64,
    pub timed_out: bool,
    pub entry_point_invoked: bool,
}

impl ExecutionOutcome {
    pub fn is_failure(&self) -> bool {
        !self.stderr.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Accepted,
    #[serde(rename = "Wrong Answer")]
    WrongAnswer,
    Error,
    #[serde(rename = "Time Limit")]
    TimeLimit,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Accepted => "Accepted",
            Verdict::WrongAnswer => "Wrong Answer",
            Verdict::Error => "Error",
            Verdict::TimeLimit => "Time Limit",
        };
        write!(f, "{}", s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaseResult {
    pub name: String,
    pub verdict: Verdict,
    pub elapsed_ms: u64,
    /// Non-empty only for `Verdict::WrongAnswer`.
    pub diff: String,
    /// Raw failure message for `Error` and `TimeLimit`.
    pub message: String,
}

/// Lifecycle of one dataset validation request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum RunState {
    #[default]
    Idle,
    Loading,
    Running(usize),
    Completed,
    Cancelled,
    Failed { msg: String },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Cancelled | RunState::Failed { .. }
        )
    }
}

/// Progress of a validation run, in the order things happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationEvent {
    Started {
        problem: String,
        total_cases: usize,
    },
    CaseFinished {
        index: usize,
        total_cases: usize,
        result: CaseResult,
    },
    Completed {
        total_cases: usize,
    },
}
