// src/exec/attempt.rs

//! One spawn-to-exit attempt of a command.

use std::io;
use std::process::Stdio;

use futures::stream::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::{debug, trace};

use super::options::{ExecuteOptions, ExecuteOutput, LineCallback, Stdin};
use crate::stream::{self, ChunkStream};
use crate::types::LogLayout;

/// Output of one finished attempt plus its diagnostic log.
pub(crate) struct AttemptOutcome {
    pub output: ExecuteOutput,
    pub log: String,
}

/// Build the `Command` for `opts`. `opts.command` must be non-empty.
pub(crate) fn build_command(opts: &ExecuteOptions) -> io::Result<Command> {
    let (program, args) = opts
        .command
        .split_first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;

    let mut cmd = Command::new(program);
    cmd.args(args).current_dir(&opts.working_dir);
    for (key, value) in &opts.env {
        match value {
            Some(value) => cmd.env(key, value),
            None => cmd.env_remove(key),
        };
    }
    Ok(cmd)
}

/// Spawn a supervised (foreground) child with piped output.
pub(crate) fn spawn_foreground(opts: &ExecuteOptions) -> io::Result<Child> {
    let mut cmd = build_command(opts)?;
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(match opts.stdin {
            Stdin::Null => Stdio::null(),
            Stdin::Inherit => Stdio::inherit(),
            Stdin::Bytes(_) => Stdio::piped(),
        })
        .kill_on_drop(true);
    cmd.spawn()
}

/// The per-stream views an attempt consumes concurrently.
struct Views {
    capture: ChunkStream,
    log: ChunkStream,
    lines: Option<ChunkStream>,
}

fn fan_out(source: ChunkStream, with_lines: bool) -> Views {
    let mut views = stream::tee(source, 2 + usize::from(with_lines)).into_iter();
    let mut next = || views.next().unwrap_or_else(|| futures::stream::empty().boxed());
    Views {
        capture: next(),
        log: next(),
        lines: with_lines.then(next),
    }
}

fn piped(reader: Option<impl tokio::io::AsyncRead + Send + Unpin + 'static>) -> ChunkStream {
    match reader {
        Some(reader) => stream::from_reader(reader),
        None => futures::stream::empty().boxed(),
    }
}

async fn drain_lines(
    view: Option<ChunkStream>,
    callback: Option<&LineCallback>,
    attempt: u32,
) -> io::Result<()> {
    match (view, callback) {
        (Some(view), Some(cb)) => stream::for_each_line(view, |line| cb(line, attempt)).await,
        _ => Ok(()),
    }
}

/// Drive `child` to completion: capture both streams, assemble the log,
/// feed line callbacks and wait for exit, all concurrently.
pub(crate) async fn supervise(
    mut child: Child,
    opts: &ExecuteOptions,
    attempt: u32,
) -> io::Result<AttemptOutcome> {
    let pid = child.id();

    let out = fan_out(piped(child.stdout.take()), opts.on_stdout_line.is_some());
    let err = fan_out(piped(child.stderr.take()), opts.on_stderr_line.is_some());

    let log_stream = match opts.log_layout {
        LogLayout::Interleaved => stream::merge(vec![out.log, err.log]),
        LogLayout::Grouped => stream::concat(vec![out.log, err.log]),
    };

    let stdin = child.stdin.take();
    let feed_stdin = async {
        if let (Some(mut pipe), Stdin::Bytes(bytes)) = (stdin, &opts.stdin) {
            // The child may exit without reading its input.
            if let Err(err) = pipe.write_all(bytes).await {
                trace!(error = %err, "stdin write interrupted");
            }
        }
        Ok::<(), io::Error>(())
    };

    let (status, stdout, stderr, log, (), (), ()) = tokio::try_join!(
        child.wait(),
        stream::collect_text(out.capture),
        stream::collect_text(err.capture),
        stream::collect_text(log_stream),
        drain_lines(out.lines, opts.on_stdout_line.as_ref(), attempt),
        drain_lines(err.lines, opts.on_stderr_line.as_ref(), attempt),
        feed_stdin,
    )?;

    debug!(pid, attempt, exit_code = ?status.code(), "attempt finished");

    Ok(AttemptOutcome {
        output: ExecuteOutput {
            stdout: stdout.trim().to_string(),
            stderr: stderr.trim().to_string(),
            exit_code: status.code(),
            pid,
        },
        log,
    })
}
