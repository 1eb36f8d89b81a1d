use crate::error::{ErrorKind, Result};
use crate::toolchain::Invocation;
use exn::ResultExt;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

pub type RunnerHandle = Arc<dyn ToolRunner + Send + Sync>;

/// Longest stretch of tool stderr that makes it into the logs.
const STDERR_LOG_LIMIT: usize = 200;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs external tools on behalf of the pipeline.
///
/// Implementations must block until the tool exits or `timeout` passes; a
/// tool still running at the deadline is killed and reported as
/// [`ErrorKind::ToolTimeout`].
pub trait ToolRunner {
    fn execute(&self, invocation: &Invocation, timeout: Duration) -> Result<()>;
}

/// Spawns real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;
impl ToolRunner for ProcessRunner {
    fn execute(&self, invocation: &Invocation, timeout: Duration) -> Result<()> {
        let tool = invocation.tool.to_string();
        let started = Instant::now();
        tracing::debug!(%tool, program = %invocation.program.display(), args = ?invocation.args, "Running external tool");
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .or_raise(|| ErrorKind::ToolUnavailable(tool.clone()))?;
        let stderr = drain_stderr(&mut child);

        let deadline = started + timeout;
        let status = loop {
            match child.try_wait().map_err(ErrorKind::Io)? {
                Some(status) => break status,
                None if Instant::now() >= deadline => {
                    // Killing only reaches the direct child; anything it forked
                    // may keep the stderr pipe open, so the reader is abandoned.
                    let _ = child.kill();
                    let _ = child.wait();
                    tracing::warn!(%tool, elapsed = ?started.elapsed(), "External tool timed out; killed");
                    exn::bail!(ErrorKind::ToolTimeout(tool));
                },
                None => thread::sleep(POLL_INTERVAL),
            }
        };

        // Helpers the tool left running in the background may hold stderr open
        // long after it exits; the deadline still applies to collecting it.
        let remaining = deadline.saturating_duration_since(Instant::now());
        let stderr = match stderr.map(|rx| rx.recv_timeout(remaining)) {
            Some(Ok(bytes)) => Some(truncate(&String::from_utf8_lossy(&bytes))),
            Some(Err(_)) => {
                tracing::debug!(%tool, "Tool stderr still held open; not waiting for it");
                None
            },
            None => None,
        };
        if status.success() {
            tracing::debug!(%tool, elapsed = ?started.elapsed(), "External tool finished");
            return Ok(());
        }
        tracing::warn!(%tool, code = ?status.code(), stderr = stderr.as_deref().unwrap_or_default(), "External tool failed");
        exn::bail!(ErrorKind::ToolFailed { tool, code: status.code() });
    }
}

/// Read the child's stderr to the end on a detached thread.
fn drain_stderr(child: &mut Child) -> Option<Receiver<Vec<u8>>> {
    let mut pipe = child.stderr.take()?;
    let (sender, receiver) = mpsc::channel();
    thread::Builder::new()
        .name("tool-stderr".to_string())
        .spawn(move || {
            let mut buffer = Vec::new();
            let _ = pipe.read_to_end(&mut buffer);
            let _ = sender.send(buffer);
        })
        .ok()?;
    Some(receiver)
}

fn truncate(text: &str) -> String {
    let text = text.trim();
    match text.char_indices().nth(STDERR_LOG_LIMIT) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::toolchain::Tool;
    use rstest::rstest;

    fn sh(script: &str) -> Invocation {
        Invocation::new(Tool::Converter, "sh").arg("-c").arg(script)
    }

    #[test]
    fn test_success() {
        ProcessRunner.execute(&sh("exit 0"), Duration::from_secs(5)).unwrap();
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    fn test_non_zero_exit(#[case] code: i32) {
        let err = ProcessRunner.execute(&sh(&format!("echo nope >&2; exit {code}")), Duration::from_secs(5)).unwrap_err();
        assert!(matches!(&*err, ErrorKind::ToolFailed { code: Some(c), .. } if *c == code));
    }

    #[test]
    fn test_timeout_kills() {
        let started = Instant::now();
        let err = ProcessRunner.execute(&sh("exec sleep 10"), Duration::from_millis(200)).unwrap_err();
        assert!(matches!(&*err, ErrorKind::ToolTimeout(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_background_helper_does_not_outlive_timeout() {
        let started = Instant::now();
        ProcessRunner.execute(&sh("sleep 6 & exit 0"), Duration::from_secs(1)).unwrap();
        assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
    }

    #[test]
    fn test_background_helper_failure_still_reported() {
        let started = Instant::now();
        let err = ProcessRunner.execute(&sh("sleep 6 & exit 2"), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(&*err, ErrorKind::ToolFailed { code: Some(2), .. }));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_missing_program() {
        let inv = Invocation::new(Tool::Rasterizer, "/nonexistent/kiosk-tool");
        let err = ProcessRunner.execute(&inv, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(&*err, ErrorKind::ToolUnavailable(_)));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("  short  "), "short");
        let long = "é".repeat(300);
        let cut = truncate(&long);
        assert_eq!(cut.chars().count(), STDERR_LOG_LIMIT + 3);
        assert!(cut.ends_with("..."));
    }
}
