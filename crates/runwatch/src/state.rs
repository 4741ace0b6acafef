use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use runwatch_core::batch::Batch;
use runwatch_core::feed::{format_feed_line, strip_ansi};
use runwatch_core::log_sink::{LogSink, LogSummary};
use runwatch_core::supervisor::{RunHandle, RunOutcome, RunRequest, SupervisorOptions};
use runwatch_core::{
    DashboardState, FeedViewport, FlushController, FlushPolicy, FlushSignal, LineReceiver,
    RunConfig, RunFeed, RunLifecycle,
};
use std::io;
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct RunLog {
    pub sink: LogSink,
    pub writer: JoinHandle<io::Result<LogSummary>>,
}

pub struct StartedRun {
    pub handle: RunHandle,
    pub log: Option<RunLog>,
}

pub enum AppMessage {
    Key(KeyEvent),
    Resize,
    Tick,
    RunStarted {
        run_id: u64,
        result: Result<StartedRun, String>,
    },
    Batch {
        run_id: u64,
        batch: Batch,
        lines: LineReceiver,
    },
    RunFinished {
        run_id: u64,
        outcome: RunOutcome,
    },
    LogPersisted {
        run_id: u64,
        result: Result<LogSummary, String>,
    },
}

/// Async work requested by [`App::update`]. Each command runs as its own task
/// and reports back with exactly one message.
pub enum Command {
    StartRun {
        run_id: u64,
        request: RunRequest,
        options: SupervisorOptions,
        log_dir: PathBuf,
    },
    ReadBatch {
        run_id: u64,
        lines: LineReceiver,
        max_batch_size: usize,
    },
    AwaitResult {
        run_id: u64,
        result: oneshot::Receiver<RunOutcome>,
    },
    AwaitLog {
        run_id: u64,
        writer: JoinHandle<io::Result<LogSummary>>,
    },
}

pub struct App {
    pub config: RunConfig,
    pub lifecycle: RunLifecycle,
    pub dashboard: DashboardState,
    pub feed: RunFeed,
    pub viewport: FeedViewport,
    pub flush: FlushController,
    pub show_help: bool,
    pub should_quit: bool,
    pub needs_redraw: bool,
    pub note: Option<String>,
    pub received: u64,
    pub queue_dropped: u64,
    pub critical_dropped: u64,
    log_sink: Option<LogSink>,
    quit_after_run: bool,
}

impl App {
    pub fn new(config: RunConfig, policy: FlushPolicy, now: Instant) -> Self {
        let feed = RunFeed::new(config.feed.capacity);
        Self {
            config,
            lifecycle: RunLifecycle::new(),
            dashboard: DashboardState::default(),
            feed,
            viewport: FeedViewport::new(),
            flush: FlushController::new(policy, now),
            show_help: false,
            should_quit: false,
            needs_redraw: true,
            note: None,
            received: 0,
            queue_dropped: 0,
            critical_dropped: 0,
            log_sink: None,
            quit_after_run: false,
        }
    }

    pub fn update(&mut self, message: AppMessage, now: Instant) -> Vec<Command> {
        match message {
            AppMessage::Key(key) => {
                self.needs_redraw = true;
                self.handle_key(key)
            }
            AppMessage::Resize => {
                self.needs_redraw = true;
                Vec::new()
            }
            AppMessage::Tick => {
                if self.flush.should_flush_stale(self.feed.dirty(), now) {
                    self.flush_feed(now);
                }
                Vec::new()
            }
            AppMessage::RunStarted { run_id, result } => self.on_run_started(run_id, result, now),
            AppMessage::Batch {
                run_id,
                batch,
                lines,
            } => self.on_batch(run_id, batch, lines, now),
            AppMessage::RunFinished { run_id, outcome } => {
                if self.lifecycle.finish(run_id, outcome) {
                    self.needs_redraw = true;
                    self.check_quit();
                }
                Vec::new()
            }
            AppMessage::LogPersisted { run_id, result } => {
                match result {
                    Ok(summary) => {
                        info!(
                            run_id,
                            path = %summary.path.display(),
                            written = summary.written,
                            dropped = summary.dropped,
                            "run_log_persisted"
                        );
                        if summary.dropped > 0 {
                            self.note = Some(format!(
                                "log {} missed {} lines",
                                summary.path.display(),
                                summary.dropped
                            ));
                        } else {
                            self.note = Some(format!("log saved to {}", summary.path.display()));
                        }
                    }
                    Err(err) => {
                        warn!(run_id, error = %err, "run_log_failed");
                        self.note = Some(format!("log write failed: {err}"));
                    }
                }
                self.needs_redraw = true;
                Vec::new()
            }
        }
    }

    /// Claims the run slot and runs preflight. Returns the spawn command on
    /// success; failures land in the status line.
    pub fn start_run(&mut self) -> Vec<Command> {
        let run_id = match self.lifecycle.begin() {
            Ok(run_id) => run_id,
            Err(err) => {
                self.note = Some(err.to_string());
                return Vec::new();
            }
        };
        self.note = None;
        self.needs_redraw = true;
        match self.config.preflight() {
            Ok(request) => vec![Command::StartRun {
                run_id,
                request,
                options: self.config.supervisor_options(),
                log_dir: self.config.log_dir.clone(),
            }],
            Err(err) => {
                self.lifecycle.abort_start(run_id, err);
                Vec::new()
            }
        }
    }

    pub fn cancel_run(&mut self) {
        if self.lifecycle.request_cancel() {
            self.needs_redraw = true;
        }
    }

    fn on_run_started(
        &mut self,
        run_id: u64,
        result: Result<StartedRun, String>,
        now: Instant,
    ) -> Vec<Command> {
        let started = match result {
            Ok(started) => started,
            Err(err) => {
                self.lifecycle.abort_start(run_id, err);
                self.needs_redraw = true;
                self.check_quit();
                return Vec::new();
            }
        };
        let StartedRun { handle, log } = started;
        if !self
            .lifecycle
            .mark_running(run_id, handle.cancel.clone(), handle.result)
        {
            debug!(run_id, "stale_run_started");
            return Vec::new();
        }

        self.feed.clear();
        self.viewport.reset();
        self.dashboard = DashboardState::default();
        self.flush.reset(now);
        self.received = 0;
        self.queue_dropped = 0;
        self.critical_dropped = 0;
        self.needs_redraw = true;
        info!(run_id, pid = handle.pid.unwrap_or_default(), "run_attached");

        let mut commands = Vec::new();
        if let Some(result) = self.lifecycle.take_result() {
            commands.push(Command::AwaitResult { run_id, result });
        }
        commands.push(Command::ReadBatch {
            run_id,
            lines: handle.lines,
            max_batch_size: self.config.feed.batch_size,
        });
        match log {
            Some(RunLog { sink, writer }) => {
                self.log_sink = Some(sink);
                commands.push(Command::AwaitLog { run_id, writer });
            }
            None => {
                self.log_sink = None;
                self.note = Some("run log unavailable".to_string());
            }
        }
        commands
    }

    fn on_batch(
        &mut self,
        run_id: u64,
        batch: Batch,
        lines: LineReceiver,
        now: Instant,
    ) -> Vec<Command> {
        if run_id != self.lifecycle.run_id() {
            debug!(run_id, current = self.lifecycle.run_id(), "stale_batch");
            return Vec::new();
        }
        self.queue_dropped = lines.dropped();
        self.critical_dropped = lines.critical_dropped();
        let closed = batch.closed;
        self.apply_batch(batch, now);

        if closed {
            if self.feed.dirty() > 0 {
                self.flush_feed(now);
            }
            if let Some(sink) = self.log_sink.take() {
                sink.close();
            }
            self.lifecycle.mark_stream_closed(run_id);
            self.needs_redraw = true;
            self.check_quit();
            return Vec::new();
        }
        vec![Command::ReadBatch {
            run_id,
            lines,
            max_batch_size: self.config.feed.batch_size,
        }]
    }

    fn apply_batch(&mut self, batch: Batch, now: Instant) {
        if batch.is_empty() {
            return;
        }
        let count = batch.lines.len();
        let was_empty = self.feed.is_empty();
        let mut display = Vec::with_capacity(count);
        for record in batch.lines {
            self.dashboard.observe(&strip_ansi(&record.text));
            display.push(format_feed_line(&record));
            if let Some(sink) = &self.log_sink {
                sink.record(record);
            }
        }
        let trimmed = self.feed.extend(display);
        self.received += count as u64;
        self.flush.record(count, now);
        self.needs_redraw = true;

        let signal = FlushSignal {
            was_empty,
            trimmed,
            dirty: self.feed.dirty(),
            len: self.feed.len(),
            capacity: self.feed.capacity(),
        };
        if self.flush.should_flush(signal) {
            self.flush_feed(now);
        }
    }

    fn flush_feed(&mut self, now: Instant) {
        self.viewport.set_content(self.feed.render());
        self.feed.clear_dirty();
        self.flush.mark_flushed(now);
        self.needs_redraw = true;
    }

    fn check_quit(&mut self) {
        if self.quit_after_run && !self.lifecycle.running() {
            self.should_quit = true;
        }
    }

    fn request_quit(&mut self) {
        if !self.lifecycle.running() || self.quit_after_run {
            self.should_quit = true;
            return;
        }
        self.quit_after_run = true;
        self.note = Some("waiting for run to stop; press q again to force quit".to_string());
        self.cancel_run();
    }

    fn handle_key(&mut self, key: KeyEvent) -> Vec<Command> {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.request_quit();
            return Vec::new();
        }
        if matches!(key.code, KeyCode::Char('?') | KeyCode::F(1)) {
            self.show_help = !self.show_help;
            return Vec::new();
        }
        if key.code == KeyCode::Esc && self.show_help {
            self.show_help = false;
            return Vec::new();
        }

        match key.code {
            KeyCode::Char('q') => self.request_quit(),
            KeyCode::Char('s') | KeyCode::Char('r') => return self.start_run(),
            KeyCode::Char('c') => self.cancel_run(),
            KeyCode::Char('f') => self.viewport.toggle_follow(),
            KeyCode::Up | KeyCode::Char('k') => self.viewport.scroll_up(1),
            KeyCode::Down | KeyCode::Char('j') => self.viewport.scroll_down(1),
            KeyCode::PageUp => self.viewport.page_up(),
            KeyCode::PageDown | KeyCode::Char(' ') => self.viewport.page_down(),
            KeyCode::Home | KeyCode::Char('g') => self.viewport.goto_top(),
            KeyCode::End | KeyCode::Char('G') => self.viewport.goto_bottom(),
            _ => {}
        }
        Vec::new()
    }
}
