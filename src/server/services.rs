use std::sync::Arc;

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    sync::mpsc::channel,
};
use uuid::Uuid;

use crate::{
    constants::EVENTS_CHANNEL_SIZE,
    core::{
        cancel::{CancelHandle, cancellation},
        domain::Submission,
        pipeline::validating::{ValidationError, Validator},
        reporting::{DeliveryMode, ProgressReporter, ReportOutcome, error_line},
    },
    server::{
        models::{
            CancelRequest, CancelResponse, ProtocolError, Request, RunRequest, RunResponse,
            ValidateRequest,
        },
        registry::ActiveRuns,
    },
};

#[derive(Clone, Debug)]
pub struct ValidationService {
    validator: Validator,
    runs: ActiveRuns,
    default_timeout_ms: u64,
}

impl ValidationService {
    pub fn new(validator: Validator, default_timeout_ms: u64) -> Self {
        Self {
            validator,
            runs: ActiveRuns::new(),
            default_timeout_ms,
        }
    }

    pub fn runs(&self) -> &ActiveRuns {
        &self.runs
    }

    /// Serves the single request of one connection.
    ///
    /// The read half is watched after the request line. A read error means
    /// the client went away and cancels whatever is running. EOF is only a
    /// half-close: the client may still be reading the response, so the run
    /// goes on and a closed client is noticed when a write fails.
    pub async fn handle<R, W>(self: Arc<Self>, reader: R, mut writer: W)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send,
    {
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) => return,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Failed to read request: {}", e);
                return;
            }
        }

        let request = match serde_json::from_str::<Request>(line.trim()) {
            Ok(request) => request,
            Err(e) => {
                write_error(&mut writer, &ProtocolError::from(e).to_string()).await;
                return;
            }
        };

        let (handle, signal) = cancellation();
        let watcher = tokio::spawn(watch_disconnect(reader, handle.clone()));

        match request {
            Request::Validate(req) => self.validate(req, handle, writer).await,
            Request::Run(req) => {
                let res = tokio::select! {
                    biased;
                    _ = signal.cancelled() => None,
                    res = self.run(req) => Some(res),
                };
                match res {
                    Some(Ok(response)) => write_json(&mut writer, &response).await,
                    Some(Err(msg)) => write_error(&mut writer, &msg).await,
                    None => tracing::info!("Client left before the run finished"),
                }
            }
            Request::Cancel(req) => {
                let response = self.cancel(req);
                write_json(&mut writer, &response).await;
            }
        }

        watcher.abort();
    }

    #[tracing::instrument(skip_all, fields(problem = %req.problem))]
    async fn validate<W>(&self, req: ValidateRequest, handle: CancelHandle, mut writer: W)
    where
        W: AsyncWrite + Unpin + Send,
    {
        if req.code.trim().is_empty() {
            write_error(&mut writer, &ProtocolError::EmptyCode.to_string()).await;
            return;
        }

        let mode = DeliveryMode::negotiate(req.accept.as_deref());
        let submission = Submission::with_default_timeout(
            req.code,
            None,
            req.timeout_ms,
            self.default_timeout_ms,
        );

        let mut run = match self.validator.load(&req.problem).await {
            Ok(run) => run,
            Err(e) => {
                write_error(&mut writer, &e.to_string()).await;
                return;
            }
        };

        let run_id = req.run_id.unwrap_or_else(Uuid::new_v4);
        let Some(_guard) = self.runs.register(run_id, &req.problem, handle.clone()) else {
            write_error(&mut writer, &ProtocolError::DuplicateRun(run_id).to_string()).await;
            return;
        };
        tracing::info!(
            "Validation run {} started in {:?} mode with {} cases",
            run_id,
            mode,
            run.problem().cases.len()
        );

        let (events_tx, events_rx) = channel(EVENTS_CHANNEL_SIZE);
        let signal = handle.signal();
        let run_task = tokio::spawn(async move {
            run.run(&submission, &events_tx, &signal).await
        });

        let mut reporter = ProgressReporter::new(mode, writer);
        if let Err(e) = reporter.forward(events_rx, &handle).await {
            tracing::error!("Failed to report progress: {}", e);
            handle.cancel();
        }

        let outcome = run_task.await.unwrap_or_else(|e| {
            Err(ValidationError::Internal {
                msg: format!("validation task failed: {}", e),
            })
        });

        match reporter.finish(outcome).await {
            Ok(ReportOutcome::Completed) => tracing::info!("Validation run {} completed", run_id),
            Ok(ReportOutcome::ClientClosed) => {
                tracing::info!("Validation run {} closed by client", run_id)
            }
            Ok(ReportOutcome::Failed { msg }) => {
                tracing::error!("Validation run {} failed: {}", run_id, msg)
            }
            Err(e) => tracing::error!("Failed to finish response for {}: {}", run_id, e),
        }
    }

    /// Single-shot execution. This is the only path where the submission's
    /// own stdin is used.
    #[tracing::instrument(skip_all)]
    async fn run(&self, req: RunRequest) -> Result<RunResponse, String> {
        if req.code.trim().is_empty() {
            return Err(ProtocolError::EmptyCode.to_string());
        }
        let submission = Submission::with_default_timeout(
            req.code,
            req.stdin,
            req.timeout_ms,
            self.default_timeout_ms,
        );

        let outcome = self
            .validator
            .executor()
            .run(
                &submission.code,
                submission.stdin.as_deref().unwrap_or_default(),
                submission.timeout(),
            )
            .await
            .map_err(|e| e.to_string())?;

        Ok(RunResponse {
            output: outcome.stdout,
            error: outcome.stderr,
            time_ms: outcome.elapsed_ms,
            timed_out: outcome.timed_out,
        })
    }

    fn cancel(&self, req: CancelRequest) -> CancelResponse {
        CancelResponse {
            cancelled: self.runs.cancel(&req.run_id),
        }
    }
}

async fn watch_disconnect<R>(mut reader: BufReader<R>, handle: CancelHandle)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 256];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!("Client finished sending");
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!("Client disconnected: {}", e);
                handle.cancel();
                return;
            }
        }
    }
}

async fn write_json<W, T>(writer: &mut W, value: &T)
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    match serde_json::to_string(value) {
        Ok(mut body) => {
            body.push('\n');
            write_line(writer, &body).await;
        }
        Err(e) => tracing::error!("Failed to serialize response: {}", e),
    }
}

async fn write_error<W>(writer: &mut W, msg: &str)
where
    W: AsyncWrite + Unpin,
{
    tracing::info!("Request rejected: {}", msg);
    match error_line(msg) {
        Ok(mut body) => {
            body.push('\n');
            write_line(writer, &body).await;
        }
        Err(e) => tracing::error!("Failed to serialize error: {}", e),
    }
}

async fn write_line<W>(writer: &mut W, body: &str)
where
    W: AsyncWrite + Unpin,
{
    let res = async {
        writer.write_all(body.as_bytes()).await?;
        writer.flush().await
    };
    if let Err(e) = res.await {
        tracing::info!("Failed to write response: {}", e);
    }
}
