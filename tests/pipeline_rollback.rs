// tests/pipeline_rollback.rs

mod common;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use common::{CallLog, TestResult, init_tracing};
use taskrail::pipeline::{Pipeline, StepOptions};

type Fields = BTreeMap<String, u32>;

fn set(key: &str, value: u32) -> Fields {
    Fields::from([(key.to_string(), value)])
}

/// Step that adds `key` and records its rollback in `log`.
fn tracked(
    pipeline: Pipeline<Fields, Fields>,
    key: &'static str,
    log: &CallLog,
) -> Pipeline<Fields, Fields> {
    let rollback_log = log.clone();
    pipeline.add_step(
        key,
        move |_, _| async move { Ok(set(key, 1)) },
        StepOptions::new().rollback(move |snapshot: Arc<Fields>, _| {
            let log = rollback_log.clone();
            async move {
                log.push(format!("rollback {key} keys={}", snapshot.len()));
                Ok(())
            }
        }),
    )
}

fn failing(pipeline: Pipeline<Fields, Fields>, name: &str, message: &'static str) -> Pipeline<Fields, Fields> {
    pipeline.add_step(
        name,
        move |_, _| async move { anyhow::Result::<Fields>::Err(anyhow!(message)) },
        StepOptions::new(),
    )
}

#[tokio::test]
async fn rollbacks_run_in_strict_reverse_order_with_pre_step_snapshots() -> TestResult {
    init_tracing();
    let log = CallLog::new();

    let mut pipeline = Pipeline::new("order");
    for key in ["a", "b", "c"] {
        pipeline = tracked(pipeline, key, &log);
    }
    let err = failing(pipeline, "d", "d exploded")
        .run(Fields::new())
        .await
        .expect_err("d fails");

    assert_eq!(err.step, "d");
    assert_eq!(
        log.entries(),
        vec!["rollback c keys=2", "rollback b keys=1", "rollback a keys=0"]
    );
    Ok(())
}

#[tokio::test]
async fn failing_rollback_neither_masks_the_error_nor_stops_earlier_rollbacks() -> TestResult {
    init_tracing();
    let log = CallLog::new();

    let pipeline = tracked(Pipeline::new("isolation"), "a", &log);
    let pipeline = tracked(pipeline, "b", &log);
    let pipeline = pipeline.add_step(
        "c",
        |_, _| async { Ok(set("c", 1)) },
        StepOptions::new().rollback(|_, _| async { Err(anyhow!("rollback of c broke")) }),
    );

    let err = failing(pipeline, "d", "original failure")
        .run(Fields::new())
        .await
        .expect_err("d fails");

    assert_eq!(err.step, "d");
    assert!(err.to_string().ends_with("original failure"));
    assert_eq!(log.entries(), vec!["rollback b keys=1", "rollback a keys=0"]);
    Ok(())
}

#[tokio::test]
async fn failing_step_rolls_back_itself_first() -> TestResult {
    init_tracing();
    let log = CallLog::new();

    let pipeline = tracked(Pipeline::new("self"), "a", &log);
    let step_log = log.clone();
    let err = pipeline
        .add_step(
            "half-done",
            |_, _| async { anyhow::Result::<Fields>::Err(anyhow!("partial")) },
            StepOptions::new().rollback(move |_, handle| {
                let log = step_log.clone();
                async move {
                    log.push(format!("rollback {}", handle.step()));
                    Ok(())
                }
            }),
        )
        .run(Fields::new())
        .await
        .expect_err("step fails");

    assert_eq!(err.step, "half-done");
    assert_eq!(log.entries(), vec!["rollback half-done", "rollback a keys=0"]);
    Ok(())
}

#[tokio::test]
async fn skipped_steps_are_not_rolled_back() -> TestResult {
    init_tracing();
    let log = CallLog::new();

    let pipeline = tracked(Pipeline::new("skip"), "a", &log);
    let skipped_log = log.clone();
    let pipeline = pipeline.add_conditional_step(
        "never",
        |_| false,
        |_, _| async { Ok(set("never", 1)) },
        StepOptions::new().rollback(move |_, _| {
            let log = skipped_log.clone();
            async move {
                log.push("rollback never");
                Ok(())
            }
        }),
    );

    failing(pipeline, "z", "late failure")
        .run(Fields::new())
        .await
        .expect_err("z fails");

    assert_eq!(log.entries(), vec!["rollback a keys=0"]);
    Ok(())
}

/// Context holding shared mutable state, like a client handle.
#[derive(Debug, Clone, Default)]
struct Shared {
    items: Arc<Mutex<Vec<String>>>,
}

#[tokio::test]
async fn snapshot_override_isolates_rollback_from_later_mutation() -> TestResult {
    init_tracing();
    let seen = CallLog::new();
    let seen_in_rollback = seen.clone();

    let deep_copy = |ctx: &Shared| Shared {
        items: Arc::new(Mutex::new(ctx.items.lock().unwrap().clone())),
    };

    let err = Pipeline::<Shared, Shared>::new("snapshots")
        .add_step(
            "mutate-then-fail",
            |ctx: Arc<Shared>, _| async move {
                ctx.items.lock().unwrap().push("mutated".to_string());
                anyhow::Result::<()>::Err(anyhow!("fail after mutation"))
            },
            StepOptions::new()
                .snapshot_with(deep_copy)
                .rollback(move |snapshot: Arc<Shared>, _| {
                    let seen = seen_in_rollback.clone();
                    async move {
                        let items = snapshot.items.lock().unwrap().clone();
                        seen.push(format!("{items:?}"));
                        Ok(())
                    }
                }),
        )
        .run(Shared {
            items: Arc::new(Mutex::new(vec!["original".to_string()])),
        })
        .await
        .expect_err("step fails");

    assert_eq!(seen.entries(), vec![r#"["original"]"#]);
    let restored = err.restored_context::<Shared>().expect("snapshot");
    assert_eq!(*restored.items.lock().unwrap(), vec!["original".to_string()]);
    Ok(())
}

#[tokio::test]
async fn nested_rollbacks_run_before_parent_rollbacks() -> TestResult {
    init_tracing();
    let log = CallLog::new();

    let outer = tracked(Pipeline::new("outer"), "before", &log);
    let nested_log = log.clone();
    let group_log = log.clone();

    let err = outer
        .add_subsequence(
            "group",
            move |_, nested| {
                let nested = tracked(nested, "inner-a", &nested_log);
                let nested = tracked(nested, "inner-b", &nested_log);
                failing(nested, "inner-fail", "inner failure")
            },
            StepOptions::new().rollback(move |_, _| {
                let log = group_log.clone();
                async move {
                    log.push("rollback group");
                    Ok(())
                }
            }),
        )
        .run(Fields::new())
        .await
        .expect_err("group fails");

    assert_eq!(err.step, "group");
    assert_eq!(err.root_step(), "inner-fail");
    assert_eq!(
        log.entries(),
        vec![
            "rollback inner-b keys=2",
            "rollback inner-a keys=1",
            "rollback group",
            "rollback before keys=0",
        ]
    );
    Ok(())
}

#[tokio::test]
async fn disabled_subsequence_is_neither_built_nor_rolled_back() -> TestResult {
    init_tracing();
    let log = CallLog::new();

    let subsequence = |enabled: bool, log: &CallLog| {
        let build_log = log.clone();
        let rollback_log = log.clone();
        let label = if enabled { "on" } else { "off" };
        move |pipeline: Pipeline<Fields, Fields>| {
            pipeline.add_conditional_subsequence(
                label,
                move |_: &Fields| enabled,
                move |_, nested| {
                    build_log.push(format!("build {label}"));
                    tracked(nested, label, &build_log)
                },
                StepOptions::new().rollback(move |_, _| {
                    let log = rollback_log.clone();
                    async move {
                        log.push(format!("rollback group {label}"));
                        Ok(())
                    }
                }),
            )
        }
    };

    let pipeline = tracked(Pipeline::new("gated"), "before", &log);
    let pipeline = subsequence(true, &log)(pipeline);
    let pipeline = subsequence(false, &log)(pipeline);
    let err = failing(pipeline, "after", "after failed")
        .run(Fields::new())
        .await
        .expect_err("after fails");

    assert_eq!(err.step, "after");
    let restored = err.restored_context::<Fields>().ok_or("snapshot")?;
    assert_eq!(restored.keys().collect::<Vec<_>>(), vec!["before", "on"]);
    assert_eq!(
        log.entries(),
        vec![
            "build on",
            "rollback group on",
            "rollback before keys=0",
        ]
    );
    Ok(())
}

#[tokio::test]
async fn disabled_subsequence_passes_the_context_through() -> TestResult {
    init_tracing();

    let out = tracked(Pipeline::new("skip"), "a", &CallLog::new())
        .add_conditional_subsequence(
            "never",
            |ctx: &Fields| ctx.contains_key("missing"),
            |_, nested| nested.add_step("x", |_, _| async { Ok(set("x", 1)) }, StepOptions::new()),
            StepOptions::new(),
        )
        .run(Fields::new())
        .await?;

    assert_eq!(out, set("a", 1));
    Ok(())
}

#[tokio::test]
async fn step_retry_reinvokes_the_action_before_rolling_back() -> TestResult {
    init_tracing();
    let calls = Arc::new(AtomicU32::new(0));
    let attempts = CallLog::new();

    let counter = Arc::clone(&calls);
    let seen = attempts.clone();
    let done = Pipeline::<Fields, Fields>::new("retry")
        .add_step(
            "flaky",
            move |_, handle| {
                let counter = Arc::clone(&counter);
                let seen = seen.clone();
                async move {
                    seen.push(format!("attempt {}", handle.attempt()));
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        return Err(anyhow!("not yet"));
                    }
                    Ok(set("flaky", 1))
                }
            },
            StepOptions::new().retry(2, Duration::from_millis(5)),
        )
        .run(Fields::new())
        .await?;

    assert_eq!(done["flaky"], 1);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(attempts.entries(), vec!["attempt 0", "attempt 1", "attempt 2"]);
    Ok(())
}

#[tokio::test]
async fn exhausted_step_retry_fails_the_pipeline() -> TestResult {
    init_tracing();
    let calls = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&calls);
    let err = Pipeline::<Fields, Fields>::new("retry")
        .add_step(
            "always-fails",
            move |_, _| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    anyhow::Result::<Fields>::Err(anyhow!("still broken"))
                }
            },
            StepOptions::new().retry(1, Duration::from_millis(5)),
        )
        .run(Fields::new())
        .await
        .expect_err("retries exhausted");

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(err.to_string().contains("still broken"));
    Ok(())
}
