use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use tokio::{
    fs,
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::Command,
    sync::Notify,
    task::JoinHandle,
    time::{Instant, timeout_at},
};
use uuid::Uuid;

use crate::{
    constants::{OUTPUT_LIMIT_BYTES, OUTPUT_LIMIT_MSG, TIME_LIMIT_MSG},
    core::{
        domain::ExecutionOutcome,
        traits::executor::{Executor, ExecutorError},
    },
};

/// How long output readers may keep draining pipes after the child is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(100);

/// Compiles GNU C++ submissions and runs them as child processes.
///
/// Every call gets its own work directory and its own process, so nothing a
/// submission does in one call can be seen by the next one.
#[derive(Clone, Debug)]
pub struct NativeExecutor {
    dir: PathBuf,
    gnucpp_path: PathBuf,
    output_limit: usize,
}

impl NativeExecutor {
    pub fn new<T, U>(dir: T, gnucpp_path: U) -> Self
    where
        T: AsRef<Path>,
        U: AsRef<Path>,
    {
        NativeExecutor {
            dir: dir.as_ref().into(),
            gnucpp_path: gnucpp_path.as_ref().into(),
            output_limit: OUTPUT_LIMIT_BYTES,
        }
    }

    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit = bytes;
        self
    }

    async fn compile(
        &self,
        work: &WorkDir,
        code: &str,
        entry_point: bool,
        deadline: Instant,
    ) -> Result<Compiled, ExecutorError> {
        let source_path = work.path().join("main.cpp");
        fs::write(&source_path, code).await.map_err(internal)?;

        let artifact_path = work.path().join(if entry_point { "main" } else { "main.o" });
        let mut cmd = Command::new(&self.gnucpp_path);
        if !entry_point {
            cmd.arg("-c");
        }
        cmd.arg("-o")
            .arg(&artifact_path)
            .arg(&source_path)
            .arg("-std=c++17")
            .arg("-O2")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match timeout_at(deadline, cmd.output()).await {
            Ok(output) => output.map_err(|e| ExecutorError::Internal {
                msg: format!("failed to run {}: {}", self.gnucpp_path.display(), e),
            })?,
            Err(_) => return Ok(Compiled::TimedOut),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let msg = if stderr.is_empty() {
                format!("compilation failed with {}", output.status)
            } else {
                stderr
            };
            return Ok(Compiled::Failed { msg });
        }

        Ok(Compiled::Artifact(artifact_path))
    }

    async fn execute(
        &self,
        work: &WorkDir,
        binary: &Path,
        stdin: &str,
        deadline: Instant,
    ) -> Result<Executed, ExecutorError> {
        let mut child = Command::new(binary)
            .current_dir(work.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutorError::Internal {
                msg: format!("failed to spawn submission: {}", e),
            })?;

        if let Some(mut pipe) = child.stdin.take() {
            let stdin = stdin.to_string();
            tokio::spawn(async move {
                // The program may exit without reading its input.
                let _ = pipe.write_all(stdin.as_bytes()).await;
            });
        }

        let overflow = Arc::new(Notify::new());
        let stdout = Capture::start(child.stdout.take(), self.output_limit, overflow.clone());
        let stderr = Capture::start(child.stderr.take(), self.output_limit, overflow.clone());

        let mut termination = tokio::select! {
            res = timeout_at(deadline, child.wait()) => match res {
                Ok(status) => Termination::Exited(status.map_err(internal)?),
                Err(_) => Termination::TimedOut,
            },
            _ = overflow.notified() => Termination::OutputLimit,
        };
        if !matches!(termination, Termination::Exited(_)) {
            tracing::debug!("Killing submission: {:?}", termination);
            if let Err(e) = child.kill().await {
                tracing::warn!("Failed to kill submission: {}", e);
            }
        }

        let (stdout, stderr) = futures::future::join(stdout.finish(), stderr.finish()).await;
        if (stdout.truncated || stderr.truncated) && !matches!(termination, Termination::TimedOut)
        {
            termination = Termination::OutputLimit;
        }
        Ok(Executed {
            termination,
            stdout: stdout.bytes,
            stderr: stderr.bytes,
        })
    }
}

#[async_trait::async_trait]
impl Executor for NativeExecutor {
    #[tracing::instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64))]
    async fn run(
        &self,
        code: &str,
        stdin: &str,
        timeout: Duration,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let elapsed_ms = || started.elapsed().as_millis() as u64;

        let work = WorkDir::create(&self.dir).await?;
        let entry_point = defines_entry_point(code);

        let binary = match self.compile(&work, code, entry_point, deadline).await? {
            Compiled::Artifact(path) => path,
            Compiled::TimedOut => {
                return Ok(ExecutionOutcome {
                    stderr: TIME_LIMIT_MSG.to_string(),
                    elapsed_ms: elapsed_ms(),
                    timed_out: true,
                    ..Default::default()
                });
            }
            Compiled::Failed { msg } => {
                tracing::debug!("Compilation failed: {}", msg);
                return Ok(ExecutionOutcome {
                    stderr: msg,
                    elapsed_ms: elapsed_ms(),
                    ..Default::default()
                });
            }
        };

        if !entry_point {
            tracing::debug!("No entry point defined, nothing to invoke");
            return Ok(ExecutionOutcome {
                elapsed_ms: elapsed_ms(),
                ..Default::default()
            });
        }

        let executed = self.execute(&work, &binary, stdin, deadline).await?;
        let stderr = match executed.termination {
            Termination::TimedOut => TIME_LIMIT_MSG.to_string(),
            Termination::OutputLimit => OUTPUT_LIMIT_MSG.to_string(),
            Termination::Exited(status) if status.success() => String::new(),
            Termination::Exited(status) => failure_message(status, &executed.stderr),
        };

        Ok(ExecutionOutcome {
            stdout: String::from_utf8_lossy(&executed.stdout).into_owned(),
            stderr,
            elapsed_ms: elapsed_ms(),
            timed_out: matches!(executed.termination, Termination::TimedOut),
            entry_point_invoked: true,
        })
    }
}

enum Compiled {
    Artifact(PathBuf),
    Failed { msg: String },
    TimedOut,
}

#[derive(Debug)]
enum Termination {
    Exited(ExitStatus),
    TimedOut,
    OutputLimit,
}

struct Executed {
    termination: Termination,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// Per-call scratch directory, removed when dropped.
struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    async fn create(base: &Path) -> Result<Self, ExecutorError> {
        let path = base.join(Uuid::new_v4().to_string());
        fs::create_dir_all(&path).await.map_err(internal)?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            tracing::warn!("Failed to remove {}: {}", self.path.display(), e);
        }
    }
}

/// Output pipe drained into a shared buffer, so whatever was produced before
/// a kill is kept even if the pipe never reaches EOF.
///
/// At most `limit` bytes are kept. The reader stops at the limit and wakes
/// `overflow` so the child can be killed.
struct Capture {
    buf: Arc<Mutex<Vec<u8>>>,
    truncated: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

impl Capture {
    fn start<R>(pipe: Option<R>, limit: usize, overflow: Arc<Notify>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let truncated = Arc::new(AtomicBool::new(false));
        let reader = pipe.map(|mut pipe| {
            let (buf, truncated) = (buf.clone(), truncated.clone());
            tokio::spawn(async move {
                let mut chunk = [0u8; 4096];
                loop {
                    let n = match pipe.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    let Ok(mut buf) = buf.lock() else {
                        break;
                    };
                    let room = limit.saturating_sub(buf.len());
                    buf.extend_from_slice(&chunk[..n.min(room)]);
                    if n > room {
                        truncated.store(true, Ordering::Release);
                        overflow.notify_one();
                        break;
                    }
                }
            })
        });
        Self {
            buf,
            truncated,
            reader,
        }
    }

    async fn finish(self) -> Captured {
        if let Some(mut reader) = self.reader {
            if tokio::time::timeout(DRAIN_GRACE, &mut reader).await.is_err() {
                reader.abort();
            }
        }
        let bytes = self
            .buf
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();
        Captured {
            bytes,
            truncated: self.truncated.load(Ordering::Acquire),
        }
    }
}

fn internal(e: std::io::Error) -> ExecutorError {
    ExecutorError::Internal { msg: e.to_string() }
}

fn failure_message(status: ExitStatus, stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr).trim().to_string();
    if !stderr.is_empty() {
        return stderr;
    }
    match status.code() {
        Some(code) => format!("process exited with status {}", code),
        None => format!("process terminated: {}", status),
    }
}

/// Whether the source defines a `main` function. Comments and literals are
/// ignored.
fn defines_entry_point(code: &str) -> bool {
    let code = strip_comments_and_literals(code);
    let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '_';
    code.match_indices("main").any(|(idx, _)| {
        let before = code[..idx].chars().next_back();
        let after = code[idx + "main".len()..].trim_start().chars().next();
        !before.is_some_and(is_ident) && after == Some('(')
    })
}

/// Replaces comments with a space and drops the contents of string and
/// character literals. A quote after a digit or letter is a digit separator
/// (`1'000`), not a literal.
fn strip_comments_and_literals(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut chars = code.chars().peekable();
    let mut prev = ' ';
    while let Some(c) = chars.next() {
        match c {
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
                out.push('\n');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut star = false;
                for c in chars.by_ref() {
                    if star && c == '/' {
                        break;
                    }
                    star = c == '*';
                }
                out.push(' ');
            }
            '"' | '\'' if !(c == '\'' && prev.is_ascii_alphanumeric()) => {
                let mut escaped = false;
                for inner in chars.by_ref() {
                    if escaped {
                        escaped = false;
                    } else if inner == '\\' {
                        escaped = true;
                    } else if inner == c || inner == '\n' {
                        break;
                    }
                }
                out.push(c);
                out.push(c);
            }
            _ => out.push(c),
        }
        prev = out.chars().next_back().unwrap_or(' ');
    }
    out
}
