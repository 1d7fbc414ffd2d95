use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::{
    constants::{
        CASE_FILE_PREFIX, CASE_FILE_SUFFIX, DATASET_DIR, EXPECTED_DIR, EXPECTED_FILE_PREFIX,
    },
    core::{
        domain::{CaseRef, Problem, TestCase},
        traits::dataset::{DatasetError, DatasetSource},
    },
};

/// Reads problems from a contests directory laid out as
/// `{root}/{problem}/DataSet/datos*.txt` and
/// `{root}/{problem}/.Expected/Output_{case}`.
#[derive(Clone, Debug)]
pub struct FsDataset {
    root: PathBuf,
}

impl FsDataset {
    pub fn new<T: AsRef<Path>>(root: T) -> Self {
        Self {
            root: root.as_ref().into(),
        }
    }

    fn problem_dir(&self, problem_id: &str) -> Result<PathBuf, DatasetError> {
        let valid = !problem_id.is_empty()
            && problem_id != "."
            && problem_id != ".."
            && !problem_id.contains(['/', '\\', '\0']);
        if !valid {
            return Err(DatasetError::InvalidProblemId {
                id: problem_id.to_string(),
            });
        }
        Ok(self.root.join(problem_id))
    }
}

async fn require_dir(path: &Path) -> Result<(), DatasetError> {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(DatasetError::MissingDirectory {
            path: path.display().to_string(),
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(DatasetError::MissingDirectory {
            path: path.display().to_string(),
        }),
        Err(e) => Err(DatasetError::Io {
            path: path.display().to_string(),
            source: e,
        }),
    }
}

fn is_case_file(name: &str) -> bool {
    name.starts_with(CASE_FILE_PREFIX) && name.ends_with(CASE_FILE_SUFFIX)
}

#[async_trait::async_trait]
impl DatasetSource for FsDataset {
    async fn problem(&self, problem_id: &str) -> Result<Problem, DatasetError> {
        let dir = self.problem_dir(problem_id)?;
        let input_dir = dir.join(DATASET_DIR);
        require_dir(&input_dir).await?;
        require_dir(&dir.join(EXPECTED_DIR)).await?;

        let io_err = |source| DatasetError::Io {
            path: input_dir.display().to_string(),
            source,
        };
        let mut entries = fs::read_dir(&input_dir).await.map_err(io_err)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            if !entry.file_type().await.map_err(io_err)?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                tracing::warn!("Skipping non UTF-8 case file {:?}", entry.file_name());
                continue;
            };
            if is_case_file(&name) {
                names.push(name);
            }
        }
        names.sort();

        Ok(Problem {
            id: problem_id.to_string(),
            cases: names.into_iter().map(|name| CaseRef { name }).collect(),
        })
    }

    async fn load_case(&self, problem_id: &str, case: &CaseRef) -> Result<TestCase, DatasetError> {
        let dir = self.problem_dir(problem_id)?;
        let input_path = dir.join(DATASET_DIR).join(&case.name);
        let expected_path = dir
            .join(EXPECTED_DIR)
            .join(format!("{}{}", EXPECTED_FILE_PREFIX, case.name));

        let stdin = fs::read_to_string(&input_path)
            .await
            .map_err(|source| DatasetError::Io {
                path: input_path.display().to_string(),
                source,
            })?;
        let expected = match fs::read_to_string(&expected_path).await {
            Ok(expected) => expected,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(source) => {
                return Err(DatasetError::Io {
                    path: expected_path.display().to_string(),
                    source,
                });
            }
        };

        Ok(TestCase {
            name: case.name.clone(),
            stdin,
            expected,
        })
    }
}
