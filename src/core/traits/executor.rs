use std::time::Duration;

use crate::core::domain::ExecutionOutcome;

/// Boundary around the code execution engine.
///
/// Every call must run in a freshly created context: nothing defined by one
/// invocation may be observable by the next. Compile and runtime failures are
/// reported inside the returned outcome; `Err` is reserved for the engine
/// itself being broken.
#[mockall::automock]
#[async_trait::async_trait]
pub trait Executor: std::fmt::Debug + Send + Sync {
    async fn run(
        &self,
        code: &str,
        stdin: &str,
        timeout: Duration,
    ) -> Result<ExecutionOutcome, ExecutorError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    #[error("execution engine failure: {msg}")]
    Internal { msg: String },
}
