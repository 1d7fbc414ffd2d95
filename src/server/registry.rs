use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use uuid::Uuid;

use crate::core::cancel::CancelHandle;

#[derive(Debug)]
struct ActiveRun {
    problem: String,
    started_at: DateTime<Utc>,
    handle: CancelHandle,
}

/// Validation runs currently in flight, addressable by run id so they can be
/// cancelled from another connection.
#[derive(Clone, Debug, Default)]
pub struct ActiveRuns {
    runs: Arc<DashMap<Uuid, ActiveRun>>,
}

/// Keeps a run registered until dropped.
#[derive(Debug)]
pub struct RunGuard {
    runs: Arc<DashMap<Uuid, ActiveRun>>,
    id: Uuid,
}

impl ActiveRuns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a run. Returns `None` if the id is already taken.
    pub fn register(&self, id: Uuid, problem: &str, handle: CancelHandle) -> Option<RunGuard> {
        match self.runs.entry(id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(entry) => {
                entry.insert(ActiveRun {
                    problem: problem.to_string(),
                    started_at: Utc::now(),
                    handle,
                });
                Some(RunGuard {
                    runs: self.runs.clone(),
                    id,
                })
            }
        }
    }

    pub fn cancel(&self, id: &Uuid) -> bool {
        let Some(run) = self.runs.get(id) else {
            return false;
        };
        tracing::info!(
            "Cancelling run {} for problem {} started at {}",
            id,
            run.problem,
            run.started_at
        );
        run.handle.cancel();
        true
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Some((id, run)) = self.runs.remove(&self.id) {
            let elapsed = Utc::now() - run.started_at;
            tracing::debug!("Run {} finished after {} ms", id, elapsed.num_milliseconds());
        }
    }
}
