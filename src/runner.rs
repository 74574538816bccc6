//! Async external-process execution.
//!
//! Every external invocation in lavarun goes through [`Runner::run`]: the
//! child's stdout and stderr are drained concurrently line by line while the
//! process runs, so a chatty child can never block on a full pipe buffer
//! before we reap it. Stdout is captured and returned to the caller, stderr
//! only goes to the log.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Result, bail};
use log::{debug, error, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Executes external commands with cancellation support.
///
/// The runner holds a [`CancellationToken`] shared with the top-level
/// interrupt handler; a Ctrl-C cancels every in-flight invocation, which
/// kills its child and surfaces as a single "interrupted" error.
pub struct Runner {
    cancel: CancellationToken,
}

/// Which child stream a reader task drains.
#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Read a child pipe line by line until EOF.
///
/// Stdout lines are logged at debug and accumulated; stderr lines are logged
/// at error and discarded. Lines that are not valid UTF-8 are dropped with a
/// warning rather than failing the whole invocation.
async fn read_stream<R: AsyncRead + Unpin>(stream: R, which: Stream) -> String {
    let mut segments = BufReader::new(stream).split(b'\n');
    let mut captured = String::new();

    loop {
        match segments.next_segment().await {
            Ok(Some(bytes)) => match String::from_utf8(bytes) {
                Ok(line) => match which {
                    Stream::Stdout => {
                        debug!("{line}");
                        captured.push_str(&line);
                        captured.push('\n');
                    }
                    Stream::Stderr => error!("{line}"),
                },
                Err(err) => warn!("could not decode line from child stream: {err}"),
            },
            Ok(None) => break,
            Err(err) => {
                warn!("error reading child stream: {err}");
                break;
            }
        }
    }

    captured
}

impl Runner {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Whether the shared interrupt token has fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run `cmd` (an argv vector) and return its exit code and captured stdout.
    ///
    /// A failure to launch the process is reported as a synthetic exit code 1
    /// with the error text as output, not as an `Err`; a non-zero exit from
    /// the command itself is logged and returned as data. The only `Err` this
    /// produces is the clean "interrupted" error after cancellation.
    pub async fn run(&self, cmd: &[String], cwd: Option<&Path>) -> Result<(i32, String)> {
        let cmdstr = cmd.join(" ");
        debug!("$ {cmdstr}");

        let Some((program, args)) = cmd.split_first() else {
            return Ok((1, "empty command".to_string()));
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                error!("failed to launch command {cmdstr}: {err}");
                return Ok((1, err.to_string()));
            }
        };

        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(read_stream(out, Stream::Stdout)));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(read_stream(err, Stream::Stderr)));

        // Drain both pipes to EOF, then reap the exit status. On cancellation
        // the child is killed; the detached reader tasks hit EOF and finish
        // on their own.
        let drained = tokio::select! {
            out = async {
                let captured = match stdout_task {
                    Some(task) => task.await.unwrap_or_default(),
                    None => String::new(),
                };
                if let Some(task) = stderr_task {
                    let _ = task.await;
                }
                captured
            } => Some(out),
            _ = self.cancel.cancelled() => None,
        };

        let Some(output) = drained else {
            if let Err(err) = child.kill().await {
                warn!("failed to kill interrupted child: {err}");
            }
            let _ = child.wait().await;
            bail!("interrupted");
        };

        let status = tokio::select! {
            status = child.wait() => status,
            _ = self.cancel.cancelled() => {
                let _ = child.kill().await;
                let _ = child.wait().await;
                bail!("interrupted");
            }
        };

        let code = match status {
            Ok(status) => status.code().unwrap_or(-1),
            Err(err) => {
                error!("failed to wait for command {cmdstr}: {err}");
                return Ok((1, err.to_string()));
            }
        };

        if code != 0 {
            error!("command failed: {cmdstr} (exit code {code})");
        }

        Ok((code, output))
    }
}
