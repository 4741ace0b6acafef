#![cfg(unix)]

use chrono::Local;
use runwatch_core::batch::read_batch;
use runwatch_core::log_sink::open_run_log;
use runwatch_core::supervisor::{start_run, RunHandle, RunOutcome, RunRequest, SupervisorOptions};
use runwatch_core::{DashboardState, LineRecord, PreflightError, RunConfig, RunError};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

fn shell(script: &str) -> RunRequest {
    RunRequest {
        executable: PathBuf::from("/bin/sh"),
        args: vec!["-c".to_string(), script.to_string()],
        working_dir: None,
        env: BTreeMap::new(),
    }
}

async fn drain(handle: &mut RunHandle, batch_size: usize) -> Vec<LineRecord> {
    let mut lines = Vec::new();
    loop {
        let batch = read_batch(&mut handle.lines, batch_size).await;
        assert!(batch.lines.len() <= batch_size.max(1));
        lines.extend(batch.lines);
        if batch.closed {
            return lines;
        }
    }
}

fn texts(lines: &[LineRecord]) -> Vec<&str> {
    lines.iter().map(|record| record.text.as_str()).collect()
}

#[tokio::test]
async fn lines_arrive_in_order_and_exit_is_reported_separately() {
    let mut handle = start_run(
        &shell("i=0; while [ $i -lt 300 ]; do echo \"line $i\"; i=$((i+1)); done"),
        &SupervisorOptions::default(),
    )
    .expect("spawn");
    assert!(handle.pid.is_some());

    let lines = drain(&mut handle, 25).await;
    let expected: Vec<String> = (0..300).map(|i| format!("line {i}")).collect();
    assert_eq!(texts(&lines), expected);
    assert!(lines.iter().all(|record| !record.is_error));
    assert_eq!(handle.result.await.expect("result"), RunOutcome::Succeeded);
}

#[tokio::test]
async fn small_queue_applies_backpressure_without_loss() {
    let options = SupervisorOptions {
        queue_capacity: 4,
        ..SupervisorOptions::default()
    };
    let mut handle = start_run(
        &shell("i=0; while [ $i -lt 200 ]; do echo $i; i=$((i+1)); done"),
        &options,
    )
    .expect("spawn");

    let mut seen = Vec::new();
    loop {
        let batch = read_batch(&mut handle.lines, 3).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        seen.extend(batch.lines.into_iter().map(|record| record.text));
        if batch.closed {
            break;
        }
    }
    let expected: Vec<String> = (0..200).map(|i| i.to_string()).collect();
    assert_eq!(seen, expected);
    assert_eq!(handle.lines.dropped(), 0);
}

#[tokio::test]
async fn stderr_is_part_of_the_same_stream() {
    let mut handle = start_run(
        &shell("echo out; echo err 1>&2; printf 'no newline'"),
        &SupervisorOptions::default(),
    )
    .expect("spawn");
    let lines = drain(&mut handle, 25).await;
    let mut seen = texts(&lines);
    seen.sort_unstable();
    assert_eq!(seen, vec!["err", "no newline", "out"]);
    assert!(lines.iter().all(|record| !record.is_error));
}

#[tokio::test]
async fn long_lines_are_not_truncated() {
    let mut handle = start_run(
        &shell("head -c 1500000 /dev/zero | tr '\\000' 'a'; echo; echo after"),
        &SupervisorOptions::default(),
    )
    .expect("spawn");
    let lines = drain(&mut handle, 25).await;
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].text.len(), 1_500_000);
    assert!(lines[0].text.bytes().all(|b| b == b'a'));
    assert_eq!(lines[1].text, "after");
}

#[tokio::test]
async fn crlf_endings_are_trimmed() {
    let mut handle = start_run(&shell("printf 'one\\r\\ntwo\\r\\n'"), &SupervisorOptions::default())
        .expect("spawn");
    let lines = drain(&mut handle, 25).await;
    assert_eq!(texts(&lines), vec!["one", "two"]);
}

#[tokio::test]
async fn non_zero_exit_is_a_failure() {
    let mut handle = start_run(&shell("echo working; exit 3"), &SupervisorOptions::default())
        .expect("spawn");
    let lines = drain(&mut handle, 25).await;
    assert_eq!(texts(&lines), vec!["working"]);
    assert_eq!(
        handle.result.await.expect("result"),
        RunOutcome::Failed(RunError::ExitCode(3))
    );
}

#[tokio::test]
async fn missing_executable_fails_to_spawn() {
    let request = RunRequest {
        executable: PathBuf::from("/nonexistent/runwatch-test-binary"),
        ..shell("true")
    };
    let err = start_run(&request, &SupervisorOptions::default()).expect_err("spawn should fail");
    assert!(matches!(err, RunError::Spawn(_)));
}

#[tokio::test]
async fn cancel_kills_the_child_and_reports_canceled() {
    let options = SupervisorOptions {
        drain_grace: Duration::from_millis(500),
        ..SupervisorOptions::default()
    };
    let mut handle = start_run(&shell("echo started; exec sleep 30"), &options).expect("spawn");

    let first = read_batch(&mut handle.lines, 25).await;
    assert_eq!(texts(&first.lines), vec!["started"]);

    let started = Instant::now();
    handle.cancel.cancel();
    let outcome = tokio::time::timeout(Duration::from_secs(10), handle.result)
        .await
        .expect("result in time")
        .expect("result");
    assert_eq!(outcome, RunOutcome::Canceled);
    assert!(started.elapsed() < Duration::from_secs(10));

    let rest = read_batch(&mut handle.lines, 25).await;
    assert!(rest.closed);
}

#[tokio::test]
async fn cancel_abandons_reads_held_open_by_grandchildren() {
    let options = SupervisorOptions {
        drain_grace: Duration::from_millis(200),
        ..SupervisorOptions::default()
    };
    let mut handle = start_run(&shell("echo started; sleep 30 & wait"), &options).expect("spawn");
    let first = read_batch(&mut handle.lines, 25).await;
    assert_eq!(texts(&first.lines), vec!["started"]);

    handle.cancel.cancel();
    let outcome = tokio::time::timeout(Duration::from_secs(5), handle.result)
        .await
        .expect("result in time")
        .expect("result");
    assert_eq!(outcome, RunOutcome::Canceled);
    let rest = tokio::time::timeout(Duration::from_secs(5), read_batch(&mut handle.lines, 25))
        .await
        .expect("queue closes");
    assert!(rest.closed);
}

#[tokio::test]
async fn cancel_after_child_exit_stops_waiting_on_inherited_pipes() {
    let options = SupervisorOptions {
        drain_grace: Duration::from_millis(200),
        ..SupervisorOptions::default()
    };
    let mut handle = start_run(&shell("echo hi; sleep 20 &"), &options).expect("spawn");
    let first = read_batch(&mut handle.lines, 25).await;
    assert_eq!(texts(&first.lines), vec!["hi"]);

    tokio::time::sleep(Duration::from_millis(500)).await;
    handle.cancel.cancel();
    let outcome = tokio::time::timeout(Duration::from_secs(5), handle.result)
        .await
        .expect("result after cancel")
        .expect("result");
    assert_eq!(outcome, RunOutcome::Canceled);

    let rest = tokio::time::timeout(Duration::from_secs(5), read_batch(&mut handle.lines, 25))
        .await
        .expect("queue closes");
    assert!(rest.closed);
}

#[tokio::test]
async fn structural_markers_from_a_real_run() {
    let mut handle = start_run(
        &shell(
            "echo '=== Iteration 1/3: Plan ==='; echo '▶ Writing plan'; echo '✓ Plan written'; \
             echo '2024-05-01 10:00:00,001 INFO loop: === Iteration 2/3: Build ==='; echo 'Opened PR #7'",
        ),
        &SupervisorOptions::default(),
    )
    .expect("spawn");

    let mut state = DashboardState::default();
    for record in drain(&mut handle, 2).await {
        state.observe(&record.text);
    }
    assert_eq!(state.phase.as_deref(), Some("Iteration 2/3"));
    assert_eq!(state.last_completed_action.as_deref(), Some("Plan written"));
    assert_eq!(state.previous_action.as_deref(), Some("Build"));
    assert_eq!(state.current_action.as_deref(), Some("Opened PR #7"));
}

#[tokio::test]
async fn run_log_mirrors_the_stream() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (sink, writer) = open_run_log(dir.path(), Local::now()).await.expect("open log");
    let mut handle = start_run(
        &shell("echo hello; echo '⚠ careful'; echo '✅ done'"),
        &SupervisorOptions::default(),
    )
    .expect("spawn");

    for record in drain(&mut handle, 25).await {
        assert!(sink.record(record));
    }
    sink.close();
    let summary = writer.await.expect("join").expect("write");
    assert_eq!(summary.written, 3);

    let name = summary
        .path
        .file_name()
        .and_then(|name| name.to_str())
        .expect("file name");
    assert!(name.starts_with("run-") && name.ends_with(".log"));

    let contents = std::fs::read_to_string(&summary.path).expect("read log");
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with('['));
    assert!(lines[0].ends_with("] INFO: hello"));
    assert!(lines[1].ends_with("] WARN: ⚠ careful"));
    assert!(lines[2].ends_with("] SUCCESS: ✅ done"));
}

#[tokio::test]
async fn preflight_then_run_with_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("loop.sh"), "echo \"args: $*\"\n").expect("script");
    std::fs::write(dir.path().join("prd.md"), "# task\n").expect("task");

    let mut config = RunConfig {
        executable: "sh".to_string(),
        script: PathBuf::from("loop.sh"),
        working_dir: Some(dir.path().to_path_buf()),
        ..RunConfig::default()
    };
    assert_eq!(config.preflight(), Err(PreflightError::MissingSelection));

    config.task_file = Some(PathBuf::from("prd.md"));
    config.phases.no_pr = true;
    let request = config.preflight().expect("preflight");
    let mut handle = start_run(&request, &config.supervisor_options()).expect("spawn");
    let lines = drain(&mut handle, 25).await;
    assert_eq!(texts(&lines), vec!["args: --prd prd.md --no-pr"]);
    assert_eq!(handle.result.await.expect("result"), RunOutcome::Succeeded);
}
