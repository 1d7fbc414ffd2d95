use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One request per connection, sent as a single JSON line.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Request {
    Validate(ValidateRequest),
    Run(RunRequest),
    Cancel(CancelRequest),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    pub problem: String,
    pub code: String,
    #[serde(default)]
    pub timeout_ms: Option<i64>,
    /// Content type the client wants, `text/event-stream` for live events.
    #[serde(default)]
    pub accept: Option<String>,
    /// Lets the client cancel the run from another connection.
    #[serde(default)]
    pub run_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub code: String,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub run_id: Uuid,
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    pub output: String,
    pub error: String,
    pub time_ms: u64,
    pub timed_out: bool,
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed request: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("code must not be empty")]
    EmptyCode,
    #[error("run {0} is already active")]
    DuplicateRun(Uuid),
}
