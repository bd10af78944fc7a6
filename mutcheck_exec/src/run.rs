//! Timed subprocess execution with subprocess-tree cleanup.

use std::{
    os::unix::process::{CommandExt, ExitStatusExt},
    process::{Child, Command},
    time::{Duration, Instant},
};

use nix::{
    sys::signal::{killpg, Signal},
    unistd::Pid,
};
use wait_timeout::ChildExt;

use crate::Error;

/// How a timed invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Exited with status 0
    Ok,
    /// Exited with a non-zero status
    Failure(i32),
    /// Terminated by a signal
    Crash(i32),
    /// Hit the wall-clock deadline; the subprocess tree was killed
    Timeout,
}

impl ExitKind {
    /// Did the invocation exit cleanly?
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Was this a timeout?
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// Result of one timed invocation.
#[derive(Debug, Clone, Copy)]
pub struct RunResult {
    /// How the invocation ended
    pub kind: ExitKind,
    /// Elapsed wall-clock time; `None` on timeout
    pub time: Option<Duration>,
}

impl RunResult {
    /// Elapsed time in nanoseconds, the unit the timing artifacts use.
    pub fn time_ns(&self) -> Option<u64> {
        self.time
            .map(|t| u64::try_from(t.as_nanos()).unwrap_or(u64::MAX))
    }
}

fn kill_tree(child: &mut Child) {
    let pid = Pid::from_raw(i32::try_from(child.id()).unwrap_or(i32::MAX));
    // the child was spawned as its own process group leader; take the
    // whole group down with it
    if let Err(e) = killpg(pid, Signal::SIGKILL) {
        log::debug!("killpg({pid}) failed: {e}");
        drop(child.kill());
    }
}

/// Run a command under a wall-clock deadline.
///
/// The child is put in its own process group; on timeout the whole group is
/// killed and reaped. A missing binary is a [`Error::MissingArtifact`];
/// everything else, including non-zero exits and signals, is a normal
/// [`RunResult`] for the caller to record.
pub fn run_timed(cmd: &mut Command, timeout: Duration) -> Result<RunResult, Error> {
    cmd.process_group(0);

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::missing_artifact(format!("{:?}: {e}", cmd.get_program()))
        } else {
            Error::from(e)
        }
    })?;

    match child.wait_timeout(timeout)? {
        Some(status) => {
            let time = start.elapsed();
            let kind = match (status.code(), status.signal()) {
                (Some(0), _) => ExitKind::Ok,
                (Some(code), _) => ExitKind::Failure(code),
                (None, Some(sig)) => ExitKind::Crash(sig),
                (None, None) => ExitKind::Crash(0),
            };
            Ok(RunResult {
                kind,
                time: Some(time),
            })
        }
        None => {
            kill_tree(&mut child);
            // reap, so the zombie does not outlive the deadline
            drop(child.wait());
            Ok(RunResult {
                kind: ExitKind::Timeout,
                time: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{process::Command, time::Duration};

    use super::{run_timed, ExitKind};
    use crate::Error;

    #[test]
    fn test_clean_exit() {
        let res = run_timed(&mut Command::new("true"), Duration::from_secs(5)).unwrap();
        assert_eq!(res.kind, ExitKind::Ok);
        assert!(res.time.is_some());
        assert!(res.time_ns().unwrap() > 0);
    }

    #[test]
    fn test_failure_exit_code_is_recorded() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "exit 3"]);
        let res = run_timed(&mut cmd, Duration::from_secs(5)).unwrap();
        assert_eq!(res.kind, ExitKind::Failure(3));
    }

    #[test]
    fn test_timeout_kills_and_reports() {
        let mut cmd = Command::new("sleep");
        cmd.arg("10");
        let res = run_timed(&mut cmd, Duration::from_millis(100)).unwrap();
        assert_eq!(res.kind, ExitKind::Timeout);
        assert!(res.time.is_none());
    }

    #[test]
    fn test_missing_binary() {
        let err = run_timed(
            &mut Command::new("/nonexistent/mutcheck-binary"),
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, Error::MissingArtifact(_)));
    }
}
