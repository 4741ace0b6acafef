use std::path::PathBuf;
use thiserror::Error;

/// Raised before any process is spawned; the run never starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PreflightError {
    #[error("executable not found: {0}")]
    MissingExecutable(String),
    #[error("script not found: {}", .0.display())]
    MissingScript(PathBuf),
    #[error("no task file selected")]
    MissingSelection,
    #[error("task file not found: {}", .0.display())]
    MissingTaskFile(PathBuf),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("failed to spawn process: {0}")]
    Spawn(String),
    #[error("process exited with code {0}")]
    ExitCode(i32),
    #[error("process terminated by signal")]
    Signaled,
    #[error("failed to wait for process: {0}")]
    Wait(String),
    #[error("supervisor panicked: {0}")]
    Panic(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("transport queue closed")]
pub struct QueueClosed;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("a run is already active ({0})")]
    Busy(crate::lifecycle::RunState),
}
