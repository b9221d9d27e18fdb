// tests/process_tree_fake.rs

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{FakeProcessTable, TestResult, fast_settings, init_tracing, with_timeout};
use taskrail::errors::EngineError;
use taskrail::process::{KillOptions, ProcessManager, collect_tree};
use taskrail::types::KillSignal;

fn manager(table: &FakeProcessTable) -> ProcessManager {
    ProcessManager::with_backend(Arc::new(table.clone()), fast_settings())
}

fn quick(graceful: u64) -> KillOptions {
    KillOptions {
        graceful_timeout: Duration::from_millis(graceful),
        ..KillOptions::default()
    }
}

#[tokio::test]
async fn tree_is_signalled_newest_first() -> TestResult {
    init_tracing();
    let table = FakeProcessTable::new();
    table.spawn(100, 1).spawn(101, 100).spawn(102, 100).spawn(103, 101);

    assert_eq!(collect_tree(&table, 100).await, vec![100, 101, 102, 103]);

    let manager = manager(&table);
    with_timeout(manager.kill_tree(100, quick(500))).await?;

    assert_eq!(
        table.signals(),
        vec![
            (103, KillSignal::Term),
            (102, KillSignal::Term),
            (101, KillSignal::Term),
            (100, KillSignal::Term),
        ]
    );
    for pid in [100, 101, 102, 103] {
        assert!(!table.is_running(pid));
    }
    Ok(())
}

#[tokio::test]
async fn critical_pids_are_never_signalled() -> TestResult {
    init_tracing();
    let table = FakeProcessTable::new();
    table.spawn(1, 0).spawn(2, 0);

    let manager = manager(&table);
    for pid in [0, 1, 2] {
        manager.kill_tree(pid, KillOptions::default()).await?;
    }

    assert!(table.signals().is_empty());
    assert!(table.is_running(1));
    Ok(())
}

#[tokio::test]
async fn negative_and_oversized_pids_are_rejected() -> TestResult {
    init_tracing();
    let manager = manager(&FakeProcessTable::new());

    for pid in [-5_i64, i64::from(i32::MAX) + 1] {
        match manager.kill_tree(pid, KillOptions::default()).await {
            Err(EngineError::InvalidPid(got)) => assert_eq!(got, pid),
            other => panic!("expected InvalidPid, got {other:?}"),
        }
    }
    Ok(())
}

#[tokio::test]
async fn missing_process_resolves_and_is_deregistered() -> TestResult {
    init_tracing();
    let table = FakeProcessTable::new();
    let manager = manager(&table);
    manager.register(4242, "sleep 100", None);

    manager.kill_tree(4242, KillOptions::default()).await?;

    assert!(table.signals().is_empty());
    assert_eq!(manager.count(), 0);
    Ok(())
}

#[tokio::test]
async fn stubborn_root_is_escalated_to_sigkill() -> TestResult {
    init_tracing();
    let table = FakeProcessTable::new();
    table.spawn_stubborn(200, 1).spawn_stubborn(201, 200);

    let manager = manager(&table);
    manager.register(200, "server", Some("api server".into()));
    with_timeout(manager.kill_tree(200, quick(50))).await?;

    let signals = table.signals();
    assert_eq!(&signals[..2], &[(201, KillSignal::Term), (200, KillSignal::Term)]);
    assert!(signals.contains(&(200, KillSignal::Kill)));
    assert!(signals.contains(&(201, KillSignal::Kill)));
    assert!(!table.is_running(200));
    assert!(!table.is_running(201));
    assert!(manager.find(200).is_none());
    Ok(())
}

#[tokio::test]
async fn unkillable_root_is_dropped_after_the_settle_deadline() -> TestResult {
    init_tracing();
    let table = FakeProcessTable::new();
    table.spawn_unkillable(300, 1);

    let manager = manager(&table);
    manager.register(300, "zombie-ish", None);
    with_timeout(manager.kill_tree(300, quick(30))).await?;

    assert!(table.is_running(300));
    assert_eq!(manager.count(), 0);
    Ok(())
}

#[tokio::test]
async fn kill_children_false_signals_only_the_root() -> TestResult {
    init_tracing();
    let table = FakeProcessTable::new();
    table.spawn(400, 1).spawn(401, 400);

    let options = KillOptions {
        kill_children: false,
        ..quick(200)
    };
    with_timeout(manager(&table).kill_tree(400, options)).await?;

    assert_eq!(table.signalled_pids(), vec![400]);
    assert!(table.is_running(401));
    Ok(())
}

#[tokio::test]
async fn native_tree_kill_is_used_when_available() -> TestResult {
    init_tracing();
    let table = FakeProcessTable::with_native_tree_kill();
    table.spawn(500, 1).spawn(501, 500);

    with_timeout(manager(&table).kill_tree(500, quick(200))).await?;

    assert_eq!(table.signalled_pids(), vec![500, 501]);
    assert!(!table.is_running(501));
    Ok(())
}

#[tokio::test]
async fn kill_all_tolerates_failures_and_clears_the_registry() -> TestResult {
    init_tracing();
    let table = FakeProcessTable::new();
    table.spawn(600, 1).spawn(601, 1).spawn_unkillable(602, 1);

    let manager = manager(&table);
    manager.register(600, "a", None);
    manager.register(601, "b", None);
    manager.register(602, "c", None);
    manager.register(603, "already gone", None);

    let attempted = with_timeout(manager.kill_all()).await;

    assert_eq!(attempted, 4);
    assert_eq!(manager.count(), 0);
    assert!(!table.is_running(600));
    assert!(!table.is_running(601));
    Ok(())
}

#[tokio::test]
async fn kill_all_overlaps_slow_liveness_checks() -> TestResult {
    init_tracing();
    let latency = Duration::from_millis(150);
    let table = FakeProcessTable::with_liveness_latency(latency);
    let manager = manager(&table);
    for pid in 800..806 {
        table.spawn(pid, 1);
        manager.register(pid, format!("worker {pid}"), None);
    }

    let started = Instant::now();
    let attempted = with_timeout(manager.kill_all()).await;
    let elapsed = started.elapsed();

    assert_eq!(attempted, 6);
    assert!((800..806).all(|pid| !table.is_running(pid)));
    // Each kill checks liveness twice; run one after another they would
    // take at least 12 round trips.
    assert!(elapsed < latency * 6, "kill_all took {elapsed:?}");
    Ok(())
}

#[tokio::test]
async fn prune_drops_only_exited_processes() -> TestResult {
    init_tracing();
    let table = FakeProcessTable::with_liveness_latency(Duration::from_millis(5));
    table.spawn(900, 1).spawn(901, 1).spawn(902, 1);
    let manager = manager(&table);
    for pid in 900..903 {
        manager.register(pid, "job", None);
    }

    table.exit(900);
    table.exit(902);
    let pruned: Vec<u32> = manager.prune().await.into_iter().map(|p| p.pid).collect();

    assert_eq!(pruned, vec![900, 902]);
    assert_eq!(manager.list().into_iter().map(|p| p.pid).collect::<Vec<_>>(), vec![901]);
    Ok(())
}

#[tokio::test]
async fn registry_operations() -> TestResult {
    init_tracing();
    let table = FakeProcessTable::new();
    table.spawn(700, 1).spawn(701, 1);
    let manager = manager(&table);

    manager.register(700, "first", None);
    manager.register(701, "second", Some("described".into()));
    manager.register(700, "first again", None);

    let snapshot = manager.list();
    manager.deregister(701);
    assert_eq!(snapshot.len(), 2);
    assert_eq!(manager.count(), 1);
    assert_eq!(manager.find(700).map(|p| p.command), Some("first again".to_string()));

    table.exit(700);
    let pruned = manager.prune().await;
    assert_eq!(pruned.len(), 1);
    assert_eq!(manager.count(), 0);

    manager.register(701, "second", None);
    manager.clear();
    assert!(manager.list().is_empty());
    assert!(table.is_running(701));
    Ok(())
}
