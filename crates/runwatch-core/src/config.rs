use crate::batch::DEFAULT_MAX_BATCH_SIZE;
use crate::error::{ConfigError, PreflightError};
use crate::feed::DEFAULT_FEED_CAPACITY;
use crate::supervisor::{RunRequest, SupervisorOptions, DEFAULT_DRAIN_GRACE};
use crate::transport::{OverflowPolicy, DEFAULT_QUEUE_CAPACITY};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DEFAULT_CONFIG_FILE: &str = "runwatch.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub executable: String,
    pub script: PathBuf,
    pub task_file: Option<PathBuf>,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub timing: TimingParameters,
    pub executors: ExecutorChoices,
    pub phases: PhaseFlags,
    pub extra_args: Vec<String>,
    pub feed: FeedSettings,
    pub log_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            executable: "python3".to_string(),
            script: PathBuf::from("loop.py"),
            task_file: None,
            working_dir: None,
            env: BTreeMap::new(),
            timing: TimingParameters::default(),
            executors: ExecutorChoices::default(),
            phases: PhaseFlags::default(),
            extra_args: Vec::new(),
            feed: FeedSettings::default(),
            log_dir: PathBuf::from(".runwatch/logs"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingParameters {
    pub max_iterations: Option<u32>,
    pub sleep_seconds: Option<u64>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorChoices {
    pub implementer: Option<String>,
    pub reviewer: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseFlags {
    pub skip_plan: bool,
    pub skip_review: bool,
    pub no_pr: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub batch_size: usize,
    pub capacity: usize,
    pub queue_capacity: usize,
    pub diagnostic_overflow: OverflowPolicy,
    pub drain_grace_ms: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_MAX_BATCH_SIZE,
            capacity: DEFAULT_FEED_CAPACITY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            diagnostic_overflow: OverflowPolicy::default(),
            drain_grace_ms: DEFAULT_DRAIN_GRACE.as_millis() as u64,
        }
    }
}

impl RunConfig {
    /// Loads `path`, or returns defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "config_missing_using_defaults");
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "config_loaded");
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if let Some(executable) = value("RUNWATCH_EXECUTABLE") {
            self.executable = executable;
        }
        if let Some(script) = value("RUNWATCH_SCRIPT") {
            self.script = PathBuf::from(script);
        }
        if let Some(task) = value("RUNWATCH_TASK") {
            self.task_file = Some(PathBuf::from(task));
        }
        if let Some(dir) = value("RUNWATCH_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
        if let Some(raw) = value("RUNWATCH_BATCH_SIZE") {
            self.feed.batch_size = raw.parse().map_err(|_| ConfigError::Invalid {
                key: "RUNWATCH_BATCH_SIZE",
                value: raw.clone(),
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("feed.batch_size", self.feed.batch_size),
            ("feed.capacity", self.feed.capacity),
            ("feed.queue_capacity", self.feed.queue_capacity),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn supervisor_options(&self) -> SupervisorOptions {
        SupervisorOptions {
            queue_capacity: self.feed.queue_capacity,
            diagnostic_overflow: self.feed.diagnostic_overflow,
            drain_grace: std::time::Duration::from_millis(self.feed.drain_grace_ms),
        }
    }

    /// `script --prd <task> [flags…] [extra…]`; the executable is not included.
    pub fn build_args(&self, task_file: &Path) -> Vec<String> {
        let mut args = vec![
            self.script.display().to_string(),
            "--prd".to_string(),
            task_file.display().to_string(),
        ];
        if let Some(implementer) = &self.executors.implementer {
            args.push("--implementer".to_string());
            args.push(implementer.clone());
        }
        if let Some(reviewer) = &self.executors.reviewer {
            args.push("--reviewer".to_string());
            args.push(reviewer.clone());
        }
        if let Some(max) = self.timing.max_iterations {
            args.push("--max-iterations".to_string());
            args.push(max.to_string());
        }
        if let Some(sleep) = self.timing.sleep_seconds {
            args.push("--sleep".to_string());
            args.push(sleep.to_string());
        }
        if let Some(timeout) = self.timing.timeout_seconds {
            args.push("--timeout".to_string());
            args.push(timeout.to_string());
        }
        if self.phases.skip_plan {
            args.push("--skip-plan".to_string());
        }
        if self.phases.skip_review {
            args.push("--skip-review".to_string());
        }
        if self.phases.no_pr {
            args.push("--no-pr".to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Checks everything a run needs before any process is spawned.
    pub fn preflight(&self) -> Result<RunRequest, PreflightError> {
        let base = self.working_dir.clone().unwrap_or_else(|| PathBuf::from("."));
        let executable = resolve_executable(&self.executable, &base)
            .ok_or_else(|| PreflightError::MissingExecutable(self.executable.clone()))?;

        let script = resolve_relative(&self.script, &base);
        if !script.is_file() {
            return Err(PreflightError::MissingScript(self.script.clone()));
        }

        let task_file = self.task_file.as_ref().ok_or(PreflightError::MissingSelection)?;
        if task_file.as_os_str().is_empty() {
            return Err(PreflightError::MissingSelection);
        }
        if !resolve_relative(task_file, &base).is_file() {
            return Err(PreflightError::MissingTaskFile(task_file.clone()));
        }

        Ok(RunRequest {
            executable,
            args: self.build_args(task_file),
            working_dir: self.working_dir.clone(),
            env: self.env.clone(),
        })
    }
}

fn resolve_relative(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Paths with a directory component are checked on disk; bare names are
/// searched on `PATH`.
pub fn resolve_executable(name: &str, base: &Path) -> Option<PathBuf> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return None;
    }

    let direct = PathBuf::from(trimmed);
    if direct.components().count() > 1 {
        let candidate = resolve_relative(&direct, base);
        return is_file(&candidate).then_some(candidate);
    }

    let path_os = env::var_os("PATH")?;
    env::split_paths(&path_os)
        .map(|dir| dir.join(trimmed))
        .find(|candidate| is_file(candidate))
}

fn is_file(path: &Path) -> bool {
    fs::metadata(path).map(|meta| meta.is_file()).unwrap_or(false)
}
