// tests/process_tree_unix.rs

#![cfg(unix)]

mod common;

use std::time::Duration;

use common::{TestResult, fast_settings, init_tracing, with_timeout};
use taskrail::process::{KillOptions, ProcessManager, collect_tree, platform_backend};
use tokio::process::Command;

#[tokio::test]
async fn kills_a_real_shell_and_its_children() -> TestResult {
    init_tracing();

    let mut child = Command::new("sh")
        .args(["-c", "sleep 30 & sleep 30 & wait"])
        .kill_on_drop(true)
        .spawn()?;
    let root = child.id().ok_or("child has a pid")?;

    let backend = platform_backend();
    let tree = with_timeout(async {
        loop {
            let tree = collect_tree(backend.as_ref(), root).await;
            if tree.len() >= 3 {
                return tree;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert_eq!(tree[0], root);

    let manager = ProcessManager::new(fast_settings());
    manager.register(root, "sh -c sleepers", None);
    let options = KillOptions {
        graceful_timeout: Duration::from_secs(2),
        ..KillOptions::default()
    };
    with_timeout(manager.kill_tree(i64::from(root), options)).await?;

    let status = with_timeout(child.wait()).await?;
    assert!(!status.success());
    assert_eq!(manager.count(), 0);

    with_timeout(async {
        for &pid in &tree {
            while backend.is_alive(pid).await {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    })
    .await;
    Ok(())
}

#[tokio::test]
async fn killing_an_exited_process_is_a_no_op() -> TestResult {
    init_tracing();

    let mut child = Command::new("true").spawn()?;
    let pid = child.id().ok_or("child has a pid")?;
    child.wait().await?;

    let manager = ProcessManager::new(fast_settings());
    with_timeout(manager.kill_tree(i64::from(pid), KillOptions::default())).await?;
    Ok(())
}
