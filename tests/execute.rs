// tests/execute.rs

#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use common::{CallLog, TestResult, executor, init_tracing, sh, with_timeout};
use taskrail::exec::{ExecuteOptions, Stdin};
use taskrail::types::LogLayout;
use tempfile::tempdir;

#[tokio::test]
async fn captures_trimmed_stdout_and_stderr() -> TestResult {
    init_tracing();

    let out = with_timeout(executor().execute(sh("echo '  hello  '; echo warn >&2"))).await?;

    assert_eq!(out.stdout, "hello");
    assert_eq!(out.stderr, "warn");
    assert_eq!(out.exit_code, Some(0));
    assert!(out.pid.is_some());
    Ok(())
}

#[tokio::test]
async fn failed_attempts_accumulate_in_the_error_log() -> TestResult {
    init_tracing();

    let err = with_timeout(
        executor().execute(sh("echo out; echo err >&2; exit 1").retries(1)),
    )
    .await
    .unwrap_err();

    assert_eq!(err.message, "Command failed after 2 attempts");
    assert_eq!(err.logs.matches("out").count(), 2, "logs: {:?}", err.logs);
    assert_eq!(err.logs.matches("err").count(), 2, "logs: {:?}", err.logs);
    assert!(err.command.starts_with("sh -c"));
    assert!(err.detailed_message().contains("Subprocess Logs:"));
    Ok(())
}

#[tokio::test]
async fn retries_are_bounded_and_reported_after_each_failure() -> TestResult {
    init_tracing();
    let attempts = CallLog::new();
    let seen = attempts.clone();

    let err = with_timeout(executor().execute(
        sh("exit 3")
            .retries(2)
            .retry_callback(move |attempt, out| {
                seen.push(format!("attempt {attempt} exit {:?}", out.exit_code))
            }),
    ))
    .await
    .unwrap_err();

    assert_eq!(
        attempts.entries(),
        vec!["attempt 1 exit Some(3)", "attempt 2 exit Some(3)", "attempt 3 exit Some(3)"]
    );
    assert_eq!(err.message, "Command failed after 3 attempts");
    Ok(())
}

#[tokio::test]
async fn succeeds_on_a_later_attempt() -> TestResult {
    init_tracing();
    let dir = tempdir()?;

    // Fails until the marker exists; the first attempt creates it.
    let script = "if [ -f marker ]; then echo ready; else touch marker; exit 1; fi";
    let out = with_timeout(executor().execute(sh(script).working_dir(dir.path()).retries(2))).await?;

    assert_eq!(out.stdout, "ready");
    Ok(())
}

#[tokio::test]
async fn line_callbacks_receive_every_line_with_the_attempt_index() -> TestResult {
    init_tracing();
    let lines = CallLog::new();
    let out_lines = lines.clone();
    let err_lines = lines.clone();

    let _ = with_timeout(executor().execute(
        sh("printf 'a\\nb\\n'; echo e >&2; exit 1")
            .retries(1)
            .on_stdout_line(move |line, attempt| out_lines.push(format!("out {attempt} {line}")))
            .on_stderr_line(move |line, attempt| err_lines.push(format!("err {attempt} {line}"))),
    ))
    .await;

    let mut entries = lines.entries();
    entries.sort();
    assert_eq!(
        entries,
        vec!["err 0 e", "err 1 e", "out 0 a", "out 0 b", "out 1 a", "out 1 b"]
    );
    Ok(())
}

#[tokio::test]
async fn spawn_failure_is_not_retried() -> TestResult {
    init_tracing();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);

    let err = with_timeout(executor().execute(
        ExecuteOptions::new(["taskrail-definitely-missing-binary"])
            .retries(5)
            .retry_delay(Duration::from_secs(5))
            .retry_callback(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
    ))
    .await
    .unwrap_err();

    assert_eq!(err.message, "Failed to start command");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn environment_overrides_and_removals_apply() -> TestResult {
    init_tracing();

    let out = with_timeout(executor().execute(
        sh("echo \"${TASKRAIL_TEST_SET}-${HOME:-unset}\"")
            .env("TASKRAIL_TEST_SET", "value")
            .env_remove("HOME"),
    ))
    .await?;

    assert_eq!(out.stdout, "value-unset");
    Ok(())
}

#[tokio::test]
async fn runs_in_the_requested_working_directory() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    std::fs::write(dir.path().join("marker.txt"), "found")?;

    let out = with_timeout(executor().execute(sh("cat marker.txt").working_dir(dir.path()))).await?;

    assert_eq!(out.stdout, "found");
    Ok(())
}

#[tokio::test]
async fn custom_success_predicate_overrides_the_exit_code() -> TestResult {
    init_tracing();

    let out = with_timeout(executor().execute(
        sh("echo 'done with warnings'; exit 2").is_success(|out| out.stdout.contains("done")),
    ))
    .await?;
    assert_eq!(out.exit_code, Some(2));

    let err = with_timeout(executor().execute(
        sh("echo 'Error: boom'").is_success(|out| !out.stdout.contains("Error")),
    ))
    .await
    .unwrap_err();
    assert!(err.logs.contains("Error: boom"));
    Ok(())
}

#[tokio::test]
async fn stdin_bytes_are_fed_to_the_child() -> TestResult {
    init_tracing();

    let out = with_timeout(executor().execute(
        ExecuteOptions::new(["cat"]).stdin(Stdin::Bytes(Arc::from(&b"piped input\n"[..]))),
    ))
    .await?;

    assert_eq!(out.stdout, "piped input");
    Ok(())
}

#[tokio::test]
async fn grouped_layout_puts_stdout_before_stderr() -> TestResult {
    init_tracing();

    let err = with_timeout(executor().execute(
        sh("echo first-err >&2; sleep 0.05; echo then-out; exit 1").log_layout(LogLayout::Grouped),
    ))
    .await
    .unwrap_err();

    let out_at = err.logs.find("then-out").ok_or("missing stdout in logs")?;
    let err_at = err.logs.find("first-err").ok_or("missing stderr in logs")?;
    assert!(out_at < err_at, "logs: {:?}", err.logs);
    Ok(())
}

#[tokio::test]
async fn error_message_override_is_used() -> TestResult {
    init_tracing();

    let err = with_timeout(executor().execute(sh("exit 1").error_message("Migration failed"))).await.unwrap_err();

    assert_eq!(err.message, "Migration failed");
    assert_eq!(err.to_string(), "Migration failed (command: `sh -c \"exit 1\"`)");
    Ok(())
}

#[tokio::test]
async fn background_process_is_registered_until_it_exits() -> TestResult {
    init_tracing();
    let executor = executor();

    let out = executor
        .execute(sh("sleep 0.2").background(Some("short sleeper".into())))
        .await?;
    let pid = out.pid.ok_or("background run returns a pid")?;

    assert_eq!(out.stdout, "");
    let tracked = executor.processes().find(pid).ok_or("pid is registered")?;
    assert_eq!(tracked.description.as_deref(), Some("short sleeper"));

    with_timeout(async {
        while executor.processes().find(pid).is_some() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    Ok(())
}

#[tokio::test]
async fn background_process_can_be_killed_through_the_manager() -> TestResult {
    init_tracing();
    let executor = executor();

    let out = executor.execute(sh("sleep 30").background(None)).await?;
    let pid = out.pid.ok_or("background run returns a pid")?;
    assert_eq!(executor.processes().count(), 1);

    let attempted = with_timeout(executor.processes().kill_all()).await;

    assert_eq!(attempted, 1);
    assert_eq!(executor.processes().count(), 0);
    Ok(())
}
