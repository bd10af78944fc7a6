/*!
Executors for `mutcheck`'s external collaborators: the symbolic verifier,
the coverage-guided fuzzer binaries, the compiled regression tests, and a
bounded worker pool to dispatch one `(instruction, mutant)` task at a time.

Every invocation runs under a hard wall-clock deadline; a timeout kills the
subprocess tree and is recorded as a distinguished terminal outcome, never
retried. I/O and subprocess errors are caught at the task boundary and
returned as structured results so one bad mutant cannot abort a batch.
*/
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate
)]
#![cfg_attr(not(debug_assertions), deny(missing_docs))]
#![cfg_attr(debug_assertions, warn(missing_docs))]

pub use mutcheck::Error;

pub mod pool;

#[cfg(unix)]
pub mod fuzzer;
#[cfg(unix)]
pub mod regression;
#[cfg(unix)]
pub mod run;
#[cfg(unix)]
pub mod verifier;

#[cfg(unix)]
pub use fuzzer::{FuzzerExecutor, FuzzerRun};
pub use pool::{TaskHandle, TaskPool};
#[cfg(unix)]
pub use regression::{RegressionExecutor, TestCase};
#[cfg(unix)]
pub use run::{run_timed, ExitKind, RunResult};
#[cfg(unix)]
pub use verifier::{VerifierExecutor, VerifierRun};

/// Resolve an external tool binary on `PATH`, up front, so a missing tool
/// is a [`Error::MissingArtifact`] before any task is dispatched.
pub fn locate_tool(name: &str) -> Result<std::path::PathBuf, Error> {
    which::which(name)
        .map_err(|e| Error::missing_artifact(format!("tool `{name}` not found on PATH: {e}")))
}

#[cfg(test)]
mod tests {
    use super::{locate_tool, Error};

    #[test]
    fn test_locate_tool() {
        // `sh` exists on any unix-ish CI box
        assert!(locate_tool("sh").is_ok());
        assert!(matches!(
            locate_tool("definitely-not-a-tool-mutcheck"),
            Err(Error::MissingArtifact(_))
        ));
    }
}
