mod state;
mod theme;
mod ui;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use crossterm::{
    event::{Event, EventStream, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use runwatch_core::batch::read_batch;
use runwatch_core::config::DEFAULT_CONFIG_FILE;
use runwatch_core::log_sink::open_run_log;
use runwatch_core::supervisor::{start_run, RunOutcome, RunRequest, SupervisorOptions};
use runwatch_core::{FlushPolicy, RunConfig, RunError};
use state::{App, AppMessage, Command, RunLog, StartedRun};
use std::{
    env,
    fs::{self, OpenOptions},
    io::{self, Stdout, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use tokio::{sync::mpsc, time::MissedTickBehavior};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

const MESSAGE_QUEUE_CAPACITY: usize = 256;
const TICK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Parser)]
#[command(
    name = "runwatch",
    version,
    about = "Launch an automation run and watch its output live"
)]
struct Args {
    /// YAML config file (defaults to ./runwatch.yaml when present).
    #[arg(long, env = "RUNWATCH_CONFIG")]
    config: Option<PathBuf>,
    /// Task file passed to the automation as --prd.
    #[arg(long)]
    task: Option<PathBuf>,
    #[arg(long)]
    executable: Option<String>,
    #[arg(long)]
    script: Option<PathBuf>,
    #[arg(long)]
    log_dir: Option<PathBuf>,
    #[arg(long)]
    batch_size: Option<usize>,
    /// Start a run immediately instead of waiting for `s`.
    #[arg(long)]
    start: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_logging(&config.log_dir);
    info!(
        executable = %config.executable,
        script = %config.script.display(),
        log_dir = %config.log_dir.display(),
        "runwatch_starting"
    );

    let (msg_tx, mut msg_rx) = mpsc::channel(MESSAGE_QUEUE_CAPACITY);
    let mut app = App::new(config, FlushPolicy::default(), Instant::now());
    if args.start {
        for command in app.start_run() {
            dispatch(command, &msg_tx);
        }
    }

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, &mut app, &msg_tx, &mut msg_rx).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    info!(status = %app.lifecycle.status(), "runwatch_exiting");
    result
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut App,
    msg_tx: &mpsc::Sender<AppMessage>,
    msg_rx: &mut mpsc::Receiver<AppMessage>,
) -> Result<()> {
    let mut events = EventStream::new();
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if app.needs_redraw {
            terminal.draw(|frame| ui::render(frame, app))?;
            app.needs_redraw = false;
        }
        if app.should_quit {
            return Ok(());
        }

        let message = tokio::select! {
            _ = ticker.tick() => AppMessage::Tick,
            Some(message) = msg_rx.recv() => message,
            maybe_event = events.next() => match maybe_event {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => AppMessage::Key(key),
                Some(Ok(Event::Resize(_, _))) => AppMessage::Resize,
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    warn!(error = %err, "terminal_event_failed");
                    continue;
                }
                None => return Ok(()),
            },
        };

        for command in app.update(message, Instant::now()) {
            dispatch(command, msg_tx);
        }
    }
}

/// Runs one command as a task that reports back with a single message.
fn dispatch(command: Command, tx: &mpsc::Sender<AppMessage>) {
    let tx = tx.clone();
    match command {
        Command::StartRun {
            run_id,
            request,
            options,
            log_dir,
        } => {
            tokio::spawn(async move {
                let result = launch(&request, &options, &log_dir).await;
                send(&tx, AppMessage::RunStarted { run_id, result }).await;
            });
        }
        Command::ReadBatch {
            run_id,
            mut lines,
            max_batch_size,
        } => {
            tokio::spawn(async move {
                let batch = read_batch(&mut lines, max_batch_size).await;
                send(
                    &tx,
                    AppMessage::Batch {
                        run_id,
                        batch,
                        lines,
                    },
                )
                .await;
            });
        }
        Command::AwaitResult { run_id, result } => {
            tokio::spawn(async move {
                let outcome = result.await.unwrap_or_else(|_| {
                    warn!(run_id, "run_result_channel_closed");
                    RunOutcome::Failed(RunError::Wait("completion channel closed".to_string()))
                });
                send(&tx, AppMessage::RunFinished { run_id, outcome }).await;
            });
        }
        Command::AwaitLog { run_id, writer } => {
            tokio::spawn(async move {
                let result = match writer.await {
                    Ok(Ok(summary)) => Ok(summary),
                    Ok(Err(err)) => Err(err.to_string()),
                    Err(err) => Err(err.to_string()),
                };
                send(&tx, AppMessage::LogPersisted { run_id, result }).await;
            });
        }
    }
}

async fn send(tx: &mpsc::Sender<AppMessage>, message: AppMessage) {
    if tx.send(message).await.is_err() {
        debug!("app_message_dropped");
    }
}

async fn launch(
    request: &RunRequest,
    options: &SupervisorOptions,
    log_dir: &Path,
) -> Result<StartedRun, String> {
    let handle = start_run(request, options).map_err(|err| err.to_string())?;
    let log = match open_run_log(log_dir, Local::now()).await {
        Ok((sink, writer)) => Some(RunLog { sink, writer }),
        Err(err) => {
            warn!(log_dir = %log_dir.display(), error = %err, "run_log_open_failed");
            None
        }
    };
    Ok(StartedRun { handle, log })
}

fn load_config(args: &Args) -> Result<RunConfig> {
    let path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let mut config = RunConfig::load(&path)?;
    config
        .apply_env_overrides()
        .context("invalid RUNWATCH_* environment override")?;

    if let Some(task) = &args.task {
        config.task_file = Some(task.clone());
    }
    if let Some(executable) = &args.executable {
        config.executable = executable.clone();
    }
    if let Some(script) = &args.script {
        config.script = script.clone();
    }
    if let Some(log_dir) = &args.log_dir {
        config.log_dir = log_dir.clone();
    }
    if let Some(batch_size) = args.batch_size {
        config.feed.batch_size = batch_size;
    }
    config.validate()?;
    Ok(config)
}

struct MultiWriter {
    stderr_enabled: bool,
    file: Option<Arc<Mutex<fs::File>>>,
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.stderr_enabled {
            let _ = io::stderr().write_all(buf);
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                file.flush()?;
            }
        }
        Ok(())
    }
}

fn open_log_file(log_dir: &Path) -> io::Result<fs::File> {
    fs::create_dir_all(log_dir)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("runwatch.log"))
}

/// Logs go to `<log_dir>/runwatch.log`; stdout belongs to the terminal UI.
fn init_logging(log_dir: &Path) {
    let level = env::var("RUNWATCH_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let file = match open_log_file(log_dir) {
        Ok(file) => Some(Arc::new(Mutex::new(file))),
        Err(err) => {
            eprintln!("log_file_error: {err}");
            None
        }
    };
    let stderr_enabled = matches!(
        env::var("RUNWATCH_LOG_STDERR").ok().as_deref(),
        Some("1") | Some("true") | Some("TRUE") | Some("yes") | Some("YES")
    );
    let make_writer = BoxMakeWriter::new(move || MultiWriter {
        stderr_enabled,
        file: file.clone(),
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(make_writer)
        .try_init();
}
