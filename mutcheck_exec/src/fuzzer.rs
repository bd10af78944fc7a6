//! Invocation of the compiled fuzz drivers.
//!
//! Each mutant's fuzz binary runs until it finds an assertion-violating
//! input (written to the exact artifact path) or hits its deadline.

use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    run::{run_timed, ExitKind},
    Error,
};

/// Result record of one fuzzer invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuzzerRun {
    /// Raw exit code; `None` on timeout
    pub retcode: Option<i32>,
    /// Elapsed time in nanoseconds; `None` on timeout
    pub time_ns: Option<u64>,
    /// The crash artifact, when the fuzzer produced a non-empty one
    pub artifact: Option<PathBuf>,
}

/// Runs compiled fuzz drivers with an exact artifact path.
#[derive(Debug, Clone, TypedBuilder)]
pub struct FuzzerExecutor {
    /// Wall-clock deadline per mutant. A fuzzer that finds nothing within
    /// the deadline counts as a surviving mutant, so this bounds round-2
    /// cost directly.
    #[builder(default = Duration::from_secs(90))]
    timeout: Duration,
}

impl FuzzerExecutor {
    /// Run one mutant's fuzz binary; a crashing input is written to
    /// `artifact_path`.
    pub fn run(&self, mutant_bin: &Path, artifact_path: &Path) -> Result<FuzzerRun, Error> {
        let mut cmd = Command::new(mutant_bin);
        cmd.arg(format!("-exact_artifact_path={}", artifact_path.display()));

        log::info!("{}: fuzzing", mutant_bin.display());
        let res = run_timed(&mut cmd, self.timeout)?;
        match res.kind {
            ExitKind::Timeout => {
                log::info!("{}: fuzzing timed out", mutant_bin.display());
            }
            kind => log::info!(
                "{}: total fuzzing time {} ms, {kind:?}",
                mutant_bin.display(),
                res.time.unwrap_or_default().as_millis()
            ),
        }

        let retcode = match res.kind {
            ExitKind::Ok => Some(0),
            ExitKind::Failure(code) => Some(code),
            ExitKind::Crash(sig) => Some(-sig),
            ExitKind::Timeout => None,
        };

        Ok(FuzzerRun {
            retcode,
            time_ns: res.time_ns(),
            artifact: read_artifact(artifact_path)?.map(|_| artifact_path.to_path_buf()),
        })
    }
}

/// Read a crash artifact. `None` when there is no artifact, or when it is
/// zero bytes — the fuzzer crashed for a non-input reason.
pub fn read_artifact(path: &Path) -> Result<Option<Vec<u8>>, Error> {
    match fs::read(path) {
        Ok(data) if data.is_empty() => {
            log::warn!(
                "{}: 0-byte artifact, most likely the fuzzer crashed due to non-input reasons",
                path.display()
            );
            Ok(None)
        }
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::from(e)),
    }
}
