// tests/process_backends.rs

#![cfg(unix)]

mod common;

use common::TestResult;
use taskrail::process::unix::children_from_ps_table;
use taskrail::types::KillSignal;

#[test]
fn ps_table_is_filtered_by_parent() {
    let table = "    1     0\n  200     1\n  201   200\n  202   200\n garbage\n  203   201\n";

    assert_eq!(children_from_ps_table(table, 200), vec![201, 202]);
    assert_eq!(children_from_ps_table(table, 999), Vec::<u32>::new());
}

#[test]
fn kill_signal_parses_and_displays() -> TestResult {
    assert_eq!("SIGTERM".parse::<KillSignal>()?, KillSignal::Term);
    assert_eq!("kill".parse::<KillSignal>()?, KillSignal::Kill);
    assert!("SIGHUP".parse::<KillSignal>().is_err());
    assert_eq!(KillSignal::Kill.to_string(), "SIGKILL");
    Ok(())
}

#[cfg(target_os = "linux")]
mod procfs {
    use std::fs;
    use std::path::Path;

    use super::TestResult;
    use taskrail::process::ProcessBackend;
    use taskrail::process::linux::{ProcfsBackend, StatLine, parse_stat};
    use tempfile::tempdir;

    fn write_stat(root: &Path, pid: u32, comm: &str, state: char, ppid: u32) -> std::io::Result<()> {
        let dir = root.join(pid.to_string());
        fs::create_dir_all(&dir)?;
        fs::write(
            dir.join("stat"),
            format!("{pid} ({comm}) {state} {ppid} {pid} {pid} 0 -1 4194560 100 0"),
        )
    }

    #[test]
    fn stat_parsing_survives_odd_command_names() {
        assert_eq!(
            parse_stat("42 (my (weird) cmd) S 7 42 42 0"),
            Some(StatLine { state: 'S', ppid: 7 })
        );
        assert_eq!(parse_stat("42 (zombie) Z 1 0"), Some(StatLine { state: 'Z', ppid: 1 }));
        assert_eq!(parse_stat("truncated"), None);
        assert_eq!(parse_stat("42 (x) R notanumber"), None);
    }

    #[tokio::test]
    async fn fixture_tree_lists_children_and_liveness() -> TestResult {
        let root = tempdir()?;
        write_stat(root.path(), 10, "parent", 'S', 1)?;
        write_stat(root.path(), 12, "child b", 'R', 10)?;
        write_stat(root.path(), 11, "child a", 'S', 10)?;
        write_stat(root.path(), 13, "reaped soon", 'Z', 10)?;
        write_stat(root.path(), 20, "unrelated", 'S', 1)?;
        fs::create_dir_all(root.path().join("self"))?;

        let backend = ProcfsBackend::with_root(root.path());

        assert_eq!(backend.children(10).await?, vec![11, 12, 13]);
        assert!(backend.children(11).await?.is_empty());

        assert!(backend.is_alive(10).await);
        assert!(!backend.is_alive(13).await);
        assert!(!backend.is_alive(99).await);
        Ok(())
    }
}
