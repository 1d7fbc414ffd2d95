use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::{
    constants::{TIME_LIMIT_MSG, TIMER_SLACK_MS},
    core::{
        cancel::CancelSignal,
        domain::{CaseResult, ExecutionOutcome, Submission, TestCase},
        traits::executor::{Executor, ExecutorError},
        verdict::classify,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaseError {
    #[error("request cancelled")]
    Cancelled,
    #[error(transparent)]
    Internal(#[from] ExecutorError),
}

/// Runs one test case of a submission and scores it.
///
/// Only the case's own stdin reaches the executor. A deadline hit is an
/// outcome to classify; cancellation of the request is returned as
/// `CaseError::Cancelled` and wins over a run that finishes late.
#[tracing::instrument(skip_all, fields(case = %case.name))]
pub async fn run_case(
    executor: &Arc<dyn Executor>,
    submission: &Submission,
    case: &TestCase,
    cancel: &CancelSignal,
) -> Result<CaseResult, CaseError> {
    if cancel.is_cancelled() {
        return Err(CaseError::Cancelled);
    }

    let timeout = submission.timeout();
    let started = Instant::now();

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(CaseError::Cancelled),
        _ = tokio::time::sleep(timeout + Duration::from_millis(TIMER_SLACK_MS)) => {
            tracing::warn!("Executor overran its deadline, abandoning the run");
            ExecutionOutcome {
                stderr: TIME_LIMIT_MSG.to_string(),
                timed_out: true,
                ..Default::default()
            }
        }
        res = executor.run(&submission.code, &case.stdin, timeout) => res?,
    };

    if cancel.is_cancelled() {
        return Err(CaseError::Cancelled);
    }

    let elapsed_ms = started.elapsed().as_millis() as u64;
    tracing::debug!(
        "Case finished: elapsed_ms={}, timed_out={}, entry_point_invoked={}",
        elapsed_ms,
        outcome.timed_out,
        outcome.entry_point_invoked
    );

    let (verdict, diff) = classify(&outcome, &case.expected);
    let message = if outcome.timed_out && outcome.stderr.is_empty() {
        TIME_LIMIT_MSG.to_string()
    } else {
        outcome.stderr
    };

    Ok(CaseResult {
        name: case.name.clone(),
        verdict,
        elapsed_ms,
        diff,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        cancel::cancellation, domain::Verdict, traits::executor::MockExecutor,
    };
    use mockall::predicate::{always, eq};

    fn case() -> TestCase {
        TestCase {
            name: "datos001.txt".to_string(),
            stdin: "3\n".to_string(),
            expected: "9\n".to_string(),
        }
    }

    fn outcome(stdout: &str, stderr: &str) -> ExecutionOutcome {
        ExecutionOutcome {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            elapsed_ms: 5,
            timed_out: false,
            entry_point_invoked: true,
        }
    }

    #[tokio::test]
    async fn test_case_stdin_overrides_submission_stdin() {
        let mut executor = MockExecutor::new();
        executor
            .expect_run()
            .with(eq("code"), eq("3\n"), eq(Duration::from_millis(1000)))
            .times(1)
            .return_const(Ok(outcome("9\n", "")));
        let executor: Arc<dyn Executor> = Arc::new(executor);

        let submission = Submission::new("code", Some("ignored".to_string()), Some(1000));
        let result = run_case(&executor, &submission, &case(), &CancelSignal::never())
            .await
            .unwrap();

        assert_eq!(result.verdict, Verdict::Accepted);
        assert!(result.diff.is_empty());
        assert!(result.message.is_empty());
        assert_eq!(result.name, "datos001.txt");
    }

    #[tokio::test]
    async fn test_default_timeout_is_used() {
        let mut executor = MockExecutor::new();
        executor
            .expect_run()
            .with(always(), always(), eq(Duration::from_millis(5000)))
            .return_const(Ok(outcome("9", "")));
        let executor: Arc<dyn Executor> = Arc::new(executor);

        let submission = Submission::new("code", None, None);
        let result = run_case(&executor, &submission, &case(), &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(result.verdict, Verdict::Accepted);
    }

    #[tokio::test]
    async fn test_failure_message_is_kept_verbatim() {
        let mut executor = MockExecutor::new();
        executor
            .expect_run()
            .return_const(Ok(outcome("", "terminate called after throwing")));
        let executor: Arc<dyn Executor> = Arc::new(executor);

        let result = run_case(
            &executor,
            &Submission::new("code", None, None),
            &case(),
            &CancelSignal::never(),
        )
        .await
        .unwrap();

        assert_eq!(result.verdict, Verdict::Error);
        assert!(result.diff.is_empty());
        assert_eq!(result.message, "terminate called after throwing");
    }

    #[tokio::test]
    async fn test_executor_timeout_becomes_time_limit() {
        let mut executor = MockExecutor::new();
        executor.expect_run().return_const(Ok(ExecutionOutcome {
            stdout: "partial".to_string(),
            stderr: TIME_LIMIT_MSG.to_string(),
            elapsed_ms: 200,
            timed_out: true,
            entry_point_invoked: true,
        }));
        let executor: Arc<dyn Executor> = Arc::new(executor);

        let result = run_case(
            &executor,
            &Submission::new("code", None, Some(200)),
            &case(),
            &CancelSignal::never(),
        )
        .await
        .unwrap();

        assert_eq!(result.verdict, Verdict::TimeLimit);
        assert_eq!(result.message, TIME_LIMIT_MSG);
    }

    #[tokio::test]
    async fn test_hanging_executor_is_cut_by_case_timer() {
        let executor: Arc<dyn Executor> = Arc::new(crate::stubs::executor::ExecutorStub::new(
            vec![Ok(outcome("9", ""))],
            Duration::from_secs(10),
        ));

        let started = std::time::Instant::now();
        let result = run_case(
            &executor,
            &Submission::new("code", None, Some(100)),
            &case(),
            &CancelSignal::never(),
        )
        .await
        .unwrap();

        assert_eq!(result.verdict, Verdict::TimeLimit);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_cancellation_is_not_classified() {
        let executor: Arc<dyn Executor> = Arc::new(crate::stubs::executor::ExecutorStub::new(
            vec![Ok(outcome("9", ""))],
            Duration::from_secs(10),
        ));
        let (handle, signal) = cancellation();

        let run = tokio::spawn(async move {
            run_case(
                &executor,
                &Submission::new("code", None, None),
                &case(),
                &signal,
            )
            .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();

        let res = tokio::time::timeout(Duration::from_millis(200), run)
            .await
            .expect("cancellation should be prompt")
            .unwrap();
        assert_eq!(res, Err(CaseError::Cancelled));
    }

    #[tokio::test]
    async fn test_already_cancelled_request_does_not_run() {
        let mut executor = MockExecutor::new();
        executor.expect_run().never();
        let executor: Arc<dyn Executor> = Arc::new(executor);
        let (handle, signal) = cancellation();
        handle.cancel();

        let res = run_case(&executor, &Submission::new("code", None, None), &case(), &signal).await;
        assert_eq!(res, Err(CaseError::Cancelled));
    }

    #[tokio::test]
    async fn test_internal_executor_error_propagates() {
        let mut executor = MockExecutor::new();
        executor.expect_run().return_const(Err(ExecutorError::Internal {
            msg: "compiler missing".to_string(),
        }));
        let executor: Arc<dyn Executor> = Arc::new(executor);

        let res = run_case(
            &executor,
            &Submission::new("code", None, None),
            &case(),
            &CancelSignal::never(),
        )
        .await;
        assert!(matches!(res, Err(CaseError::Internal(ExecutorError::Internal { .. }))));
    }
}
