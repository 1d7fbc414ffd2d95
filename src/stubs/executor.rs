use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::core::{
    domain::ExecutionOutcome,
    traits::executor::{Executor, ExecutorError},
};

/// Executor replaying scripted outcomes, one per call, after a fixed delay.
/// The last outcome is repeated once the script runs out.
#[derive(Debug)]
pub struct ExecutorStub {
    script: Mutex<VecDeque<Result<ExecutionOutcome, ExecutorError>>>,
    delay: Duration,
    calls: Mutex<Vec<String>>,
}

impl ExecutorStub {
    pub fn new(script: Vec<Result<ExecutionOutcome, ExecutorError>>, delay: Duration) -> Self {
        Self {
            script: Mutex::new(script.into()),
            delay,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Stdin of every call made so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn next_result(&self) -> Result<ExecutionOutcome, ExecutorError> {
        let mut script = self.script.lock().map_err(|e| ExecutorError::Internal {
            msg: e.to_string(),
        })?;
        match script.len() {
            0 => Ok(ExecutionOutcome::default()),
            1 => script[0].clone(),
            _ => script.pop_front().unwrap_or_else(|| Ok(ExecutionOutcome::default())),
        }
    }
}

#[async_trait::async_trait]
impl Executor for ExecutorStub {
    #[tracing::instrument(skip(self, code))]
    async fn run(
        &self,
        code: &str,
        stdin: &str,
        timeout: Duration,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        tracing::debug!("Start execution: code_len={}", code.len());
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(stdin.to_string());
        }
        tokio::time::sleep(self.delay).await;

        let result = self.next_result();
        tracing::debug!("Execution result: {:?}", result);
        result
    }
}
