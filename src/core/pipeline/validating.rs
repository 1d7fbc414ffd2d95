use std::sync::Arc;

use tokio::sync::mpsc::Sender;

use crate::core::{
    cancel::CancelSignal,
    domain::{Problem, RunState, Submission, ValidationEvent},
    pipeline::case_running::{CaseError, run_case},
    traits::{
        dataset::{DatasetError, DatasetSource},
        executor::Executor,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("dataset unavailable: {0}")]
    Dataset(#[from] DatasetError),
    #[error("internal error: {msg}")]
    Internal { msg: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
}

#[derive(Clone, Debug)]
pub struct Validator {
    dataset: Arc<dyn DatasetSource>,
    executor: Arc<dyn Executor>,
}

impl Validator {
    pub fn new(dataset: Arc<dyn DatasetSource>, executor: Arc<dyn Executor>) -> Self {
        Self { dataset, executor }
    }

    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    /// Resolves the problem's case list. Nothing is executed yet, so a
    /// missing dataset surfaces here as a request-level failure.
    #[tracing::instrument(skip(self))]
    pub async fn load(&self, problem_id: &str) -> Result<ValidationRun, ValidationError> {
        let mut run = ValidationRun {
            dataset: self.dataset.clone(),
            executor: self.executor.clone(),
            problem: Problem {
                id: problem_id.to_string(),
                cases: Vec::new(),
            },
            state: RunState::Idle,
        };
        run.change_state(RunState::Loading);

        match self.dataset.problem(problem_id).await {
            Ok(problem) => {
                tracing::info!(
                    "Loaded problem {} with {} cases",
                    problem.id,
                    problem.cases.len()
                );
                run.problem = problem;
                Ok(run)
            }
            Err(e) if e.is_configuration() => {
                tracing::warn!("Problem {} is not configured: {}", problem_id, e);
                Err(e.into())
            }
            Err(e) => {
                tracing::error!("Failed to load problem {}: {}", problem_id, e);
                Err(e.into())
            }
        }
    }
}

/// One validation request after its case list has been resolved.
#[derive(Debug)]
pub struct ValidationRun {
    dataset: Arc<dyn DatasetSource>,
    executor: Arc<dyn Executor>,
    problem: Problem,
    state: RunState,
}

impl ValidationRun {
    pub fn problem(&self) -> &Problem {
        &self.problem
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    fn change_state(&mut self, new_state: RunState) {
        if new_state.is_terminal() {
            tracing::info!("Run finished: {:?}", new_state);
        } else {
            tracing::debug!("Run state: {:?} -> {:?}", self.state, new_state);
        }
        self.state = new_state;
    }

    /// Runs every case in dataset order, one at a time, sending one event per
    /// finished case.
    ///
    /// Stops without error when the request is cancelled or the event
    /// receiver goes away. A case that fails to execute is reported as a
    /// verdict; only broken infrastructure ends the run with an error.
    #[tracing::instrument(skip_all, fields(problem = %self.problem.id))]
    pub async fn run(
        &mut self,
        submission: &Submission,
        events: &Sender<ValidationEvent>,
        cancel: &CancelSignal,
    ) -> Result<RunOutcome, ValidationError> {
        let total_cases = self.problem.cases.len();
        let started = ValidationEvent::Started {
            problem: self.problem.id.clone(),
            total_cases,
        };
        if !emit(events, started, cancel).await {
            return Ok(self.cancelled());
        }

        for index in 0..total_cases {
            if cancel.is_cancelled() {
                return Ok(self.cancelled());
            }
            self.change_state(RunState::Running(index));

            let case_ref = self.problem.cases[index].clone();
            let (dataset, problem_id) = (self.dataset.clone(), self.problem.id.clone());
            let case = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(self.cancelled()),
                res = dataset.load_case(&problem_id, &case_ref) => match res {
                    Ok(case) => case,
                    Err(e) => return Err(self.failed(ValidationError::Dataset(e))),
                },
            };

            let result = match run_case(&self.executor, submission, &case, cancel).await {
                Ok(result) => result,
                Err(CaseError::Cancelled) => return Ok(self.cancelled()),
                Err(CaseError::Internal(e)) => {
                    return Err(self.failed(ValidationError::Internal { msg: e.to_string() }));
                }
            };
            tracing::info!(
                "Case {}/{} {}: {} in {} ms",
                index + 1,
                total_cases,
                result.name,
                result.verdict,
                result.elapsed_ms
            );

            let finished = ValidationEvent::CaseFinished {
                index,
                total_cases,
                result,
            };
            if !emit(events, finished, cancel).await {
                return Ok(self.cancelled());
            }
        }

        self.change_state(RunState::Completed);
        if !emit(events, ValidationEvent::Completed { total_cases }, cancel).await {
            // Every case ran; only the completion notice was lost.
            tracing::debug!("Completion event not delivered");
        }
        Ok(RunOutcome::Completed)
    }

    fn cancelled(&mut self) -> RunOutcome {
        tracing::info!("Validation cancelled at {:?}", self.state);
        self.change_state(RunState::Cancelled);
        RunOutcome::Cancelled
    }

    fn failed(&mut self, error: ValidationError) -> ValidationError {
        tracing::error!("Validation failed: {}", error);
        self.change_state(RunState::Failed {
            msg: error.to_string(),
        });
        error
    }
}

/// Sends one event unless the request is cancelled first. Returns `false`
/// when the event was not delivered.
async fn emit(events: &Sender<ValidationEvent>, event: ValidationEvent, cancel: &CancelSignal) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        res = events.send(event) => res.is_ok(),
    }
}
