use crate::core::domain::{CaseRef, Problem, TestCase};

#[mockall::automock]
#[async_trait::async_trait]
pub trait DatasetSource: std::fmt::Debug + Send + Sync {
    /// Resolves the ordered case list of a problem. Fails when the problem's
    /// dataset directories are missing.
    async fn problem(&self, problem_id: &str) -> Result<Problem, DatasetError>;

    /// Reads the input and expected output of one listed case.
    async fn load_case(&self, problem_id: &str, case: &CaseRef) -> Result<TestCase, DatasetError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("invalid problem id: {id:?}")]
    InvalidProblemId { id: String },
    #[error("dataset directory not found: {path}")]
    MissingDirectory { path: String },
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl DatasetError {
    /// Whether the error means the dataset is misconfigured, as opposed to a
    /// failure while reading it.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            DatasetError::InvalidProblemId { .. } | DatasetError::MissingDirectory { .. }
        )
    }
}
