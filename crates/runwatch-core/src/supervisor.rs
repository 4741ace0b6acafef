//! Child process supervision.
//!
//! One producer task reads stdout and stderr and pushes every line into the
//! transport queue. The supervising future waits for exit or cancellation and
//! reports exactly one [`RunOutcome`] on a oneshot channel. A panic in the
//! supervising future or in the output pump is caught and reported as a
//! failed run.

use crate::error::RunError;
use crate::record::LineRecord;
use crate::transport::{transport_queue, LineReceiver, LineSender, OverflowPolicy, DEFAULT_QUEUE_CAPACITY};
use futures_util::FutureExt;
use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const READ_BUFFER_CAPACITY: usize = 1024 * 1024;
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Canceled,
    Failed(RunError),
}

/// A fully resolved invocation, produced by preflight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy)]
pub struct SupervisorOptions {
    pub queue_capacity: usize,
    pub diagnostic_overflow: OverflowPolicy,
    /// How long pending reads may drain after a cancel kill.
    pub drain_grace: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            diagnostic_overflow: OverflowPolicy::default(),
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }
}

#[derive(Debug)]
pub struct RunHandle {
    pub lines: LineReceiver,
    pub result: oneshot::Receiver<RunOutcome>,
    pub cancel: CancellationToken,
    pub pid: Option<u32>,
}

/// Spawns the child and its supervisor. Must be called within a tokio
/// runtime.
pub fn start_run(request: &RunRequest, options: &SupervisorOptions) -> Result<RunHandle, RunError> {
    let mut command = Command::new(&request.executable);
    command
        .args(&request.args)
        .envs(&request.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &request.working_dir {
        command.current_dir(dir);
    }

    let child = command.spawn().map_err(|err| {
        error!(executable = %request.executable.display(), error = %err, "run_spawn_failed");
        RunError::Spawn(err.to_string())
    })?;
    let pid = child.id();
    info!(
        pid = pid.unwrap_or_default(),
        executable = %request.executable.display(),
        args = ?request.args,
        "run_spawned"
    );

    let options = *options;
    let handle = spawn_supervised(&options, move |sender, cancel| drive_child(child, sender, cancel, options));
    Ok(RunHandle { pid, ..handle })
}

/// Runs `body` as the supervising future with panic containment. The body
/// receives the producer handle of a fresh transport queue; the queue closes
/// when the body and the containment wrapper have both released it.
pub fn spawn_supervised<F, Fut>(options: &SupervisorOptions, body: F) -> RunHandle
where
    F: FnOnce(LineSender, CancellationToken) -> Fut,
    Fut: Future<Output = RunOutcome> + Send + 'static,
{
    let (sender, lines) = transport_queue(options.queue_capacity);
    let (result_tx, result) = oneshot::channel();
    let cancel = CancellationToken::new();
    let panic_sender = sender.clone();
    let supervised = body(sender, cancel.clone());

    tokio::spawn(async move {
        let outcome = match AssertUnwindSafe(supervised).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(%message, "supervisor_panicked");
                panic_sender
                    .push_critical(LineRecord::error(format!("supervisor panic: {message}")))
                    .await;
                RunOutcome::Failed(RunError::Panic(message))
            }
        };
        panic_sender.close();
        if result_tx.send(outcome).is_err() {
            debug!("run_result_unclaimed");
        }
    });

    RunHandle {
        lines,
        result,
        cancel,
        pid: None,
    }
}

async fn drive_child(
    mut child: Child,
    sender: LineSender,
    cancel: CancellationToken,
    options: SupervisorOptions,
) -> RunOutcome {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let diagnostics = sender.clone();
    let pump = pump_output(stdout, stderr, sender, options.diagnostic_overflow);
    supervise_child(child, pump, diagnostics, cancel, options).await
}

/// Waits for the child and the output pump. The cancel token is honoured
/// until both have finished, including while a grandchild keeps the pipes
/// open after the child itself has exited.
async fn supervise_child<P>(
    mut child: Child,
    pump: P,
    diagnostics: LineSender,
    cancel: CancellationToken,
    options: SupervisorOptions,
) -> RunOutcome
where
    P: Future<Output = ()> + Send + 'static,
{
    let mut pump = tokio::spawn(pump);

    let waited = tokio::select! {
        status = child.wait() => Some(status),
        _ = cancel.cancelled() => None,
    };

    let (outcome, joined) = match waited {
        Some(Ok(status)) if !cancel.is_cancelled() => {
            let drained = tokio::select! {
                joined = &mut pump => Some(joined),
                _ = cancel.cancelled() => None,
            };
            match drained {
                Some(joined) => (outcome_from_status(status), joined),
                None => {
                    info!(status = %status, "run_cancel_during_drain");
                    let joined = drain_with_grace(&mut pump, options.drain_grace).await;
                    (RunOutcome::Canceled, joined)
                }
            }
        }
        Some(Ok(status)) => {
            debug!(status = %status, "run_exited_after_cancel");
            let joined = drain_with_grace(&mut pump, options.drain_grace).await;
            (RunOutcome::Canceled, joined)
        }
        Some(Err(err)) => {
            error!(error = %err, "run_wait_failed");
            let joined = drain_with_grace(&mut pump, options.drain_grace).await;
            (RunOutcome::Failed(RunError::Wait(err.to_string())), joined)
        }
        None => {
            if let Err(err) = child.start_kill() {
                warn!(error = %err, "run_kill_failed");
            }
            match child.wait().await {
                Ok(status) => info!(status = %status, "run_killed"),
                Err(err) => warn!(error = %err, "run_wait_after_kill_failed"),
            }
            let joined = drain_with_grace(&mut pump, options.drain_grace).await;
            (RunOutcome::Canceled, joined)
        }
    };

    match joined {
        Ok(()) => outcome,
        Err(err) if err.is_panic() => {
            let message = panic_message(err.into_panic().as_ref());
            error!(%message, "output_pump_panicked");
            diagnostics
                .push_critical(LineRecord::error(format!("output reader panic: {message}")))
                .await;
            RunOutcome::Failed(RunError::Panic(message))
        }
        Err(err) => {
            warn!(error = %err, "output_pump_failed");
            outcome
        }
    }
}

fn outcome_from_status(status: ExitStatus) -> RunOutcome {
    if status.success() {
        info!("run_succeeded");
        return RunOutcome::Succeeded;
    }
    match status.code() {
        Some(code) => {
            warn!(code, "run_exited_nonzero");
            RunOutcome::Failed(RunError::ExitCode(code))
        }
        None => {
            warn!(status = %status, "run_signaled");
            RunOutcome::Failed(RunError::Signaled)
        }
    }
}

/// An abandoned pump is aborted and counts as finished.
async fn drain_with_grace(pump: &mut JoinHandle<()>, grace: Duration) -> Result<(), JoinError> {
    match tokio::time::timeout(grace, &mut *pump).await {
        Ok(joined) => joined,
        Err(_) => {
            warn!(grace_ms = grace.as_millis() as u64, "output_drain_abandoned");
            pump.abort();
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn as_str(self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

/// Reads both pipes as one stream in arrival order. The line buffers persist
/// across `select!` iterations so a read interrupted by the other pipe keeps
/// its partial bytes.
async fn pump_output(
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    sender: LineSender,
    overflow: OverflowPolicy,
) {
    let mut stdout = stdout.map(|pipe| BufReader::with_capacity(READ_BUFFER_CAPACITY, pipe));
    let mut stderr = stderr.map(|pipe| BufReader::with_capacity(READ_BUFFER_CAPACITY, pipe));
    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();

    while stdout.is_some() || stderr.is_some() {
        let (stream, read) = tokio::select! {
            read = next_chunk(stdout.as_mut(), &mut stdout_buf) => (Stream::Stdout, read),
            read = next_chunk(stderr.as_mut(), &mut stderr_buf) => (Stream::Stderr, read),
        };
        let buf = match stream {
            Stream::Stdout => &mut stdout_buf,
            Stream::Stderr => &mut stderr_buf,
        };

        let finished = match read {
            Ok(0) => true,
            Ok(_) => false,
            Err(err) => {
                warn!(stream = stream.as_str(), error = %err, "output_read_failed");
                let record = LineRecord::error(format!("{} read failed: {err}", stream.as_str()));
                sender.push_diagnostic(record, overflow).await;
                true
            }
        };

        if !buf.is_empty() {
            let record = LineRecord::new(decode_line(buf));
            buf.clear();
            if sender.push(record).await.is_err() {
                debug!("output_consumer_gone");
                return;
            }
        }

        if finished {
            debug!(stream = stream.as_str(), "output_stream_closed");
            match stream {
                Stream::Stdout => stdout = None,
                Stream::Stderr => stderr = None,
            }
        }
    }
}

async fn next_chunk<R>(reader: Option<&mut R>, buf: &mut Vec<u8>) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    match reader {
        Some(reader) => reader.read_until(b'\n', buf).await,
        None => std::future::pending().await,
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
