use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::Receiver;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};

use crate::{
    constants::{CLIENT_CLOSED_MSG, CLIENT_CLOSED_STATUS, EVENT_STREAM_MIME},
    core::{
        cancel::CancelHandle,
        domain::{CaseResult, ValidationEvent, Verdict},
        pipeline::validating::{RunOutcome, ValidationError},
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryMode {
    Streaming,
    Batch,
}

impl DeliveryMode {
    /// Picks the mode from the client's declared content type.
    pub fn negotiate(hint: Option<&str>) -> Self {
        match hint {
            Some(hint) if hint.to_ascii_lowercase().contains(EVENT_STREAM_MIME) => {
                DeliveryMode::Streaming
            }
            _ => DeliveryMode::Batch,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReportOutcome {
    Completed,
    ClientClosed,
    Failed { msg: String },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartData<'a> {
    total_cases: usize,
    problem: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CaseResultData<'a> {
    case_number: usize,
    total_cases: usize,
    case_name: &'a str,
    result: Verdict,
    time_ms: u64,
    diff: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    message: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteData {
    total_cases: usize,
    completed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BatchEntry {
    pub case: String,
    pub result: Verdict,
    #[serde(rename = "timeMs")]
    pub time_ms: u64,
    pub diff: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl From<CaseResult> for BatchEntry {
    fn from(result: CaseResult) -> Self {
        Self {
            case: result.name,
            result: result.verdict,
            time_ms: result.elapsed_ms,
            diff: result.diff,
            message: result.message,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

#[derive(Serialize)]
struct ClientClosed<'a> {
    status: u16,
    error: &'a str,
}

/// Renders one event in the text event stream format.
pub fn format_event(event: &ValidationEvent) -> Result<String, serde_json::Error> {
    let (kind, data) = match event {
        ValidationEvent::Started {
            problem,
            total_cases,
        } => (
            "start",
            serde_json::to_string(&StartData {
                total_cases: *total_cases,
                problem,
            })?,
        ),
        ValidationEvent::CaseFinished {
            index,
            total_cases,
            result,
        } => (
            "case-result",
            serde_json::to_string(&CaseResultData {
                case_number: index + 1,
                total_cases: *total_cases,
                case_name: &result.name,
                result: result.verdict,
                time_ms: result.elapsed_ms,
                diff: &result.diff,
                message: &result.message,
            })?,
        ),
        ValidationEvent::Completed { total_cases } => (
            "complete",
            serde_json::to_string(&CompleteData {
                total_cases: *total_cases,
                completed: true,
            })?,
        ),
    };
    Ok(format!("event: {}\ndata: {}\n\n", kind, data))
}

/// Request-level failure, written instead of any progress output.
pub fn error_line(msg: &str) -> Result<String, serde_json::Error> {
    serde_json::to_string(&ErrorBody { error: msg })
}

pub fn client_closed_signal() -> Result<String, serde_json::Error> {
    serde_json::to_string(&ClientClosed {
        status: CLIENT_CLOSED_STATUS,
        error: CLIENT_CLOSED_MSG,
    })
}

/// Writes validation progress to the client.
///
/// Streaming mode writes and flushes every event as it arrives. Batch mode
/// collects results and writes one JSON array once the run has completed;
/// a run that did not complete never produces an array.
#[derive(Debug)]
pub struct ProgressReporter<W> {
    mode: DeliveryMode,
    sink: W,
    batch: Vec<BatchEntry>,
    sent_events: usize,
    sink_closed: bool,
}

impl<W> ProgressReporter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(mode: DeliveryMode, sink: W) -> Self {
        Self {
            mode,
            sink,
            batch: Vec::new(),
            sent_events: 0,
            sink_closed: false,
        }
    }

    pub fn sent_events(&self) -> usize {
        self.sent_events
    }

    pub fn into_inner(self) -> W {
        self.sink
    }

    /// Consumes events until the run drops its sender.
    ///
    /// A failed write means the client is gone: the request is cancelled
    /// through `cancel` and remaining events are drained without writing.
    pub async fn forward(
        &mut self,
        events: Receiver<ValidationEvent>,
        cancel: &CancelHandle,
    ) -> Result<(), ReportError> {
        let mut events = ReceiverStream::new(events);
        while let Some(event) = events.next().await {
            if self.sink_closed {
                continue;
            }
            match self.mode {
                DeliveryMode::Streaming => {
                    let text = format_event(&event)?;
                    if let Err(e) = self.write(text.as_bytes()).await {
                        tracing::info!("Client stream closed: {}", e);
                        self.sink_closed = true;
                        cancel.cancel();
                        continue;
                    }
                    self.sent_events += 1;
                }
                DeliveryMode::Batch => {
                    if let ValidationEvent::CaseFinished { result, .. } = event {
                        self.batch.push(result.into());
                    }
                }
            }
        }
        Ok(())
    }

    /// Closes the response according to how the run ended.
    ///
    /// A failed run is reported on the error line unless progress events
    /// were already streamed, in which case the stream just ends.
    pub async fn finish(
        mut self,
        outcome: Result<RunOutcome, ValidationError>,
    ) -> Result<ReportOutcome, ReportError> {
        if self.sink_closed {
            return Ok(ReportOutcome::ClientClosed);
        }

        match (self.mode, outcome) {
            (DeliveryMode::Streaming, Ok(RunOutcome::Completed)) => Ok(ReportOutcome::Completed),
            (DeliveryMode::Batch, Ok(RunOutcome::Completed)) => {
                let mut body = serde_json::to_string(&self.batch)?;
                body.push('\n');
                match self.write(body.as_bytes()).await {
                    Ok(()) => Ok(ReportOutcome::Completed),
                    Err(e) => {
                        tracing::info!("Client closed before batch was written: {}", e);
                        Ok(ReportOutcome::ClientClosed)
                    }
                }
            }
            (DeliveryMode::Streaming, Ok(RunOutcome::Cancelled)) => Ok(ReportOutcome::ClientClosed),
            (DeliveryMode::Batch, Ok(RunOutcome::Cancelled)) => {
                let mut body = client_closed_signal()?;
                body.push('\n');
                // The client may already be gone.
                let _ = self.write(body.as_bytes()).await;
                Ok(ReportOutcome::ClientClosed)
            }
            (mode, Err(e)) => {
                let msg = e.to_string();
                if mode == DeliveryMode::Batch || self.sent_events == 0 {
                    let mut body = error_line(&msg)?;
                    body.push('\n');
                    let _ = self.write(body.as_bytes()).await;
                }
                Ok(ReportOutcome::Failed { msg })
            }
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.sink.write_all(bytes).await?;
        self.sink.flush().await
    }
}
