use crate::{EngineError, Result};
use std::ffi::OsStr;
use std::io::Read;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL_MS: u64 = 200;

pub fn command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    configure_for_background(&mut cmd);
    cmd
}

#[cfg(windows)]
fn configure_for_background(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;

    // Prevent console windows from stealing focus on Windows while running tools.
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn configure_for_background(_cmd: &mut Command) {}

#[derive(Debug)]
pub enum CommandRunError {
    Spawn(std::io::Error),
    Wait(std::io::Error),
    TimedOut(u64),
}

impl CommandRunError {
    /// Maps a run failure onto the crate error for `tool`.
    pub fn into_engine_error(self, tool: &str) -> EngineError {
        match self {
            CommandRunError::Spawn(e) if e.kind() == std::io::ErrorKind::NotFound => {
                EngineError::ExternalToolMissing {
                    tool: tool.to_string(),
                }
            }
            CommandRunError::Spawn(e) | CommandRunError::Wait(e) => EngineError::Io(e),
            CommandRunError::TimedOut(secs) => EngineError::ExternalToolTimedOut {
                tool: tool.to_string(),
                secs,
            },
        }
    }
}

fn kill_child_process_tree(child: &mut std::process::Child) {
    #[cfg(windows)]
    {
        let pid = child.id().to_string();
        let _ = command("taskkill").args(["/PID", &pid, "/T", "/F"]).status();
    }

    let _ = child.kill();
    let _ = child.wait();
}

/// Runs `cmd` to completion, killing it once `timeout_secs` elapses (0 disables the limit).
pub fn run_with_timeout(
    cmd: &mut Command,
    timeout_secs: u64,
) -> std::result::Result<Output, CommandRunError> {
    use std::io::ErrorKind;

    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(CommandRunError::Spawn)?;

    let mut stdout = child.stdout.take().ok_or_else(|| {
        CommandRunError::Wait(std::io::Error::new(ErrorKind::Other, "stdout pipe missing"))
    })?;
    let mut stderr = child.stderr.take().ok_or_else(|| {
        CommandRunError::Wait(std::io::Error::new(ErrorKind::Other, "stderr pipe missing"))
    })?;

    let stdout_handle = thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stdout.read_to_end(&mut buf);
        buf
    });
    let stderr_handle = thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf);
        buf
    });

    let started = Instant::now();
    let mut timed_out = false;

    loop {
        if !timed_out && timeout_secs > 0 && started.elapsed() >= Duration::from_secs(timeout_secs)
        {
            kill_child_process_tree(&mut child);
            timed_out = true;
        }

        match child.try_wait() {
            Ok(Some(status)) => {
                let stdout = stdout_handle.join().unwrap_or_default();
                let stderr = stderr_handle.join().unwrap_or_default();
                if timed_out {
                    return Err(CommandRunError::TimedOut(timeout_secs));
                }
                return Ok(Output {
                    status,
                    stdout,
                    stderr,
                });
            }
            Ok(None) => {
                thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
            }
            Err(err) => {
                kill_child_process_tree(&mut child);
                let _ = stdout_handle.join();
                let _ = stderr_handle.join();
                return Err(CommandRunError::Wait(err));
            }
        }
    }
}

/// Like [`run_with_timeout`] but treats a non-zero exit as [`EngineError::ExternalToolFailed`].
pub fn run_checked(cmd: &mut Command, tool: &str, timeout_secs: u64) -> Result<Output> {
    let output = run_with_timeout(cmd, timeout_secs).map_err(|e| e.into_engine_error(tool))?;
    if !output.status.success() {
        return Err(EngineError::ExternalToolFailed {
            tool: tool.to_string(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn run_checked_reports_missing_tool() {
        let mut cmd = command("definitely-not-a-real-tool-7f3a");
        let err = run_checked(&mut cmd, "fake", 5).expect_err("missing tool");
        assert!(matches!(err, EngineError::ExternalToolMissing { .. }), "err={err:?}");
    }

    #[test]
    fn run_checked_surfaces_nonzero_exit() {
        let mut cmd = command("sh");
        cmd.args(["-c", "echo boom >&2; exit 3"]);
        match run_checked(&mut cmd, "sh", 5) {
            Err(EngineError::ExternalToolFailed { code, stderr, .. }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn run_with_timeout_kills_slow_child() {
        let mut cmd = command("sleep");
        cmd.arg("30");
        let started = Instant::now();
        let err = run_with_timeout(&mut cmd, 1).expect_err("timeout");
        assert!(matches!(err, CommandRunError::TimedOut(1)));
        assert!(started.elapsed() < Duration::from_secs(20));
    }
}
