//! Run state machine: `Idle -> Starting -> Running -> (Cancelling) -> Finishing -> Idle`.
//!
//! Every transition that reacts to async work carries the run id it was
//! issued for, so results from an earlier run are ignored.

use crate::error::LifecycleError;
use crate::supervisor::RunOutcome;
use std::fmt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Starting,
    Running,
    Cancelling,
    Finishing,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunState::Idle => "idle",
            RunState::Starting => "starting",
            RunState::Running => "running",
            RunState::Cancelling => "cancelling",
            RunState::Finishing => "finishing",
        };
        f.write_str(label)
    }
}

/// User-facing status line. The last outcome stays visible after returning
/// to idle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Idle,
    Starting,
    Running,
    Cancelling,
    Canceled,
    Failed(String),
    Succeeded,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Idle => f.write_str("Idle"),
            RunStatus::Starting => f.write_str("Starting…"),
            RunStatus::Running => f.write_str("Running"),
            RunStatus::Cancelling => f.write_str("Cancelling…"),
            RunStatus::Canceled => f.write_str("Run canceled"),
            RunStatus::Failed(reason) => write!(f, "Run failed: {reason}"),
            RunStatus::Succeeded => f.write_str("Run finished successfully"),
        }
    }
}

#[derive(Debug)]
pub struct RunLifecycle {
    state: RunState,
    status: RunStatus,
    run_id: u64,
    cancel: Option<CancellationToken>,
    result: Option<oneshot::Receiver<RunOutcome>>,
    outcome: Option<RunOutcome>,
    stream_closed: bool,
    last_error: Option<String>,
}

impl Default for RunLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl RunLifecycle {
    pub fn new() -> Self {
        Self {
            state: RunState::Idle,
            status: RunStatus::Idle,
            run_id: 0,
            cancel: None,
            result: None,
            outcome: None,
            stream_closed: false,
            last_error: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// True from the start request until the run has fully settled.
    pub fn running(&self) -> bool {
        self.state != RunState::Idle
    }

    pub fn cancelling(&self) -> bool {
        self.state == RunState::Cancelling
    }

    /// Claims the single run slot. Rejected, not queued, while another run
    /// is in any non-idle state.
    pub fn begin(&mut self) -> Result<u64, LifecycleError> {
        if self.state != RunState::Idle {
            warn!(state = %self.state, run_id = self.run_id, "run_start_rejected");
            return Err(LifecycleError::Busy(self.state));
        }
        self.run_id += 1;
        self.state = RunState::Starting;
        self.status = RunStatus::Starting;
        self.outcome = None;
        self.stream_closed = false;
        info!(run_id = self.run_id, "run_starting");
        Ok(self.run_id)
    }

    /// Preflight or spawn failed; no process is running.
    pub fn abort_start(&mut self, run_id: u64, reason: impl fmt::Display) -> bool {
        if !self.is_current(run_id) || !matches!(self.state, RunState::Starting | RunState::Cancelling) {
            return false;
        }
        let reason = reason.to_string();
        warn!(run_id, %reason, "run_start_failed");
        self.last_error = Some(reason.clone());
        self.status = RunStatus::Failed(reason);
        self.clear();
        true
    }

    /// Attaches the per-run cancel token and completion channel. A cancel
    /// requested while starting is forwarded to the token right away.
    pub fn mark_running(
        &mut self,
        run_id: u64,
        cancel: CancellationToken,
        result: oneshot::Receiver<RunOutcome>,
    ) -> bool {
        if !self.is_current(run_id) {
            cancel.cancel();
            return false;
        }
        match self.state {
            RunState::Starting => {
                self.state = RunState::Running;
                self.status = RunStatus::Running;
            }
            RunState::Cancelling => {
                debug!(run_id, "run_cancel_forwarded");
                cancel.cancel();
            }
            _ => {
                cancel.cancel();
                return false;
            }
        }
        self.cancel = Some(cancel);
        self.result = Some(result);
        true
    }

    /// Hands the completion channel to whoever awaits the result. Yields it
    /// once per run.
    pub fn take_result(&mut self) -> Option<oneshot::Receiver<RunOutcome>> {
        self.result.take()
    }

    pub fn request_cancel(&mut self) -> bool {
        match self.state {
            RunState::Starting | RunState::Running => {
                if let Some(cancel) = &self.cancel {
                    cancel.cancel();
                }
                self.state = RunState::Cancelling;
                self.status = RunStatus::Cancelling;
                info!(run_id = self.run_id, "run_cancel_requested");
                true
            }
            _ => false,
        }
    }

    /// Records the completion result. Settles to idle once the line stream
    /// has also reported closure.
    pub fn finish(&mut self, run_id: u64, outcome: RunOutcome) -> bool {
        if !self.is_current(run_id)
            || !matches!(self.state, RunState::Running | RunState::Cancelling)
        {
            debug!(run_id, current = self.run_id, "stale_run_result");
            return false;
        }
        info!(run_id, outcome = ?outcome, "run_finished");
        self.status = match &outcome {
            RunOutcome::Succeeded => RunStatus::Succeeded,
            RunOutcome::Canceled => RunStatus::Canceled,
            RunOutcome::Failed(err) => {
                self.last_error = Some(err.to_string());
                RunStatus::Failed(err.to_string())
            }
        };
        self.outcome = Some(outcome);
        self.state = RunState::Finishing;
        self.cancel = None;
        self.settle_if_done();
        true
    }

    pub fn mark_stream_closed(&mut self, run_id: u64) -> bool {
        if !self.is_current(run_id) || self.state == RunState::Idle {
            return false;
        }
        debug!(run_id, "run_stream_closed");
        self.stream_closed = true;
        self.settle_if_done();
        true
    }

    pub fn outcome(&self) -> Option<&RunOutcome> {
        self.outcome.as_ref()
    }

    fn settle_if_done(&mut self) {
        if self.state == RunState::Finishing && self.stream_closed {
            debug!(run_id = self.run_id, "run_settled");
            self.clear();
        }
    }

    fn clear(&mut self) {
        self.state = RunState::Idle;
        self.cancel = None;
        self.result = None;
        self.stream_closed = false;
    }

    fn is_current(&self, run_id: u64) -> bool {
        run_id == self.run_id
    }
}
