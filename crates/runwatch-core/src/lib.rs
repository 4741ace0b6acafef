//! Process supervision and live-feed streaming for the runwatch dashboard.

pub mod batch;
pub mod config;
pub mod error;
pub mod feed;
pub mod flush;
pub mod lifecycle;
pub mod log_sink;
pub mod markers;
pub mod record;
pub mod supervisor;
pub mod transport;

pub use batch::{read_batch, Batch, DEFAULT_MAX_BATCH_SIZE};
pub use config::RunConfig;
pub use error::{ConfigError, LifecycleError, PreflightError, QueueClosed, RunError};
pub use feed::{format_feed_line, FeedViewport, RunFeed};
pub use flush::{FlushController, FlushPolicy, FlushSignal};
pub use lifecycle::{RunLifecycle, RunState, RunStatus};
pub use log_sink::{open_run_log, LogSink, LogSummary};
pub use markers::{DashboardState, IterationIndex, IterationTotal, LineKind};
pub use record::{LineRecord, LogLevel};
pub use supervisor::{start_run, RunHandle, RunOutcome, RunRequest, SupervisorOptions};
pub use transport::{transport_queue, LineReceiver, LineSender, OverflowPolicy, PushOutcome};
