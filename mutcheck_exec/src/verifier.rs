//! Invocation of the symbolic equivalence checker.
//!
//! The verifier gets the generated driver unit and writes its structured
//! trace to a per-mutant JSON file; the exit code carries the verdict.

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use mutcheck::{insn::Insn, survivors::EqvVerdict};

use crate::{
    run::{run_timed, ExitKind},
    Error,
};

/// Verifier exit code: verification succeeded, the functions are equivalent.
pub const VERIFIER_RC_OK: i32 = 0;
/// Verifier exit code: the driver unit failed to parse.
pub const VERIFIER_RC_PARSE_ERROR: i32 = 2;
/// Verifier exit code: conversion error.
pub const VERIFIER_RC_CONV_ERROR: i32 = 6;
/// Verifier exit code: verification unsafe, a counterexample trace exists.
pub const VERIFIER_RC_UNSAFE: i32 = 10;

/// Result record of one verifier invocation, persisted into the timing
/// artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierRun {
    /// The derived verdict
    pub verdict: EqvVerdict,
    /// Raw exit code; `None` on timeout
    pub retcode: Option<i32>,
    /// Elapsed time in nanoseconds; `None` on timeout
    pub time_ns: Option<u64>,
}

/// Runs the equivalence checker on generated driver units.
#[derive(Debug, Clone, TypedBuilder)]
pub struct VerifierExecutor {
    /// The verifier binary
    #[builder(default = PathBuf::from("cbmc"))]
    verifier: PathBuf,
    /// Loop unwinding bound; one more than the loops in the semantics
    /// execute, so unwinding assertions cannot fire spuriously
    #[builder(default = 65)]
    unwind: u32,
    /// Wall-clock deadline per mutant
    #[builder(default = Duration::from_secs(90))]
    timeout: Duration,
    /// Include directories for the driver unit
    #[builder(default)]
    include_dirs: Vec<PathBuf>,
}

impl VerifierExecutor {
    /// Run the verifier on one driver unit, writing the JSON trace to
    /// `trace_out`.
    pub fn run(&self, insn: &Insn, driver: &Path, trace_out: &Path) -> Result<VerifierRun, Error> {
        let mut cmd = Command::new(&self.verifier);
        cmd.arg("--unwind")
            .arg(self.unwind.to_string())
            .arg("--unwinding-assertions")
            .arg("--z3")
            .arg("--json-ui")
            .arg("--trace");
        for dir in &self.include_dirs {
            cmd.arg("-I").arg(dir);
        }
        cmd.arg(driver);
        cmd.stdout(Stdio::from(File::create(trace_out)?));
        cmd.stderr(Stdio::null());

        let res = run_timed(&mut cmd, self.timeout)?;
        let (verdict, retcode) = match res.kind {
            ExitKind::Ok => (EqvVerdict::ProvedEquivalent, Some(VERIFIER_RC_OK)),
            ExitKind::Failure(VERIFIER_RC_UNSAFE) => {
                (EqvVerdict::NotEquivalent, Some(VERIFIER_RC_UNSAFE))
            }
            ExitKind::Failure(code) => (EqvVerdict::Failed, Some(code)),
            ExitKind::Crash(sig) => (EqvVerdict::Failed, Some(-sig)),
            ExitKind::Timeout => (EqvVerdict::TimedOut, None),
        };

        match verdict {
            EqvVerdict::TimedOut => {
                log::info!("{insn}:{}: equivalence checker timed out", driver.display());
            }
            _ => log::info!(
                "{insn}:{}: equivalence checker took {} ms, retcode={retcode:?}",
                driver.display(),
                res.time.unwrap_or_default().as_millis()
            ),
        }

        Ok(VerifierRun {
            verdict,
            retcode,
            time_ns: res.time_ns(),
        })
    }
}

/// Persist the equivalence-stage artifacts for one instruction: the list of
/// not-equivalent mutants (the round-2 input) and the per-mutant timing
/// records.
pub fn write_stage_artifacts(
    workdir: &Path,
    experiment: &str,
    runs: &[(String, VerifierRun)],
) -> Result<(), Error> {
    let not_equivalent: Vec<&str> = runs
        .iter()
        .filter(|(_, r)| r.verdict == EqvVerdict::NotEquivalent)
        .map(|(src, _)| src.as_str())
        .collect();

    fs::write(
        workdir.join(format!("eqvcheck_results.{experiment}.json")),
        serde_json::to_string_pretty(&not_equivalent)?,
    )?;

    let timing: Vec<(&str, &VerifierRun)> =
        runs.iter().map(|(src, r)| (src.as_str(), r)).collect();
    fs::write(
        workdir.join(format!("eqvcheck_timing.{experiment}.json")),
        serde_json::to_string_pretty(&timing)?,
    )?;
    Ok(())
}

/// Load the not-equivalent mutant list a previous equivalence stage wrote.
/// Missing artifact means the stage has not run; round 2 must not start.
pub fn load_not_equivalent(workdir: &Path, experiment: &str) -> Result<Vec<String>, Error> {
    let path = workdir.join(format!("eqvcheck_results.{experiment}.json"));
    let text = fs::read_to_string(&path)
        .map_err(|e| Error::missing_artifact(format!("{}: {e}", path.display())))?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use std::{fs, path::PathBuf, time::Duration};

    use mutcheck::{insn::Insn, survivors::EqvVerdict};

    use super::{load_not_equivalent, write_stage_artifacts, VerifierExecutor, VerifierRun};
    use crate::Error;

    fn fake_verifier(dir: &std::path::Path, exit: i32) -> PathBuf {
        let path = dir.join(format!("fake_verifier_{exit}"));
        fs::write(&path, format!("#!/bin/sh\necho '[]'\nexit {exit}\n")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    #[test]
    fn test_exit_codes_map_to_verdicts() {
        let dir = std::env::temp_dir().join(format!("mutcheck_verif_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let insn = Insn::new("add_rn_f32");
        let driver = dir.join("driver.c");
        fs::write(&driver, "int main(void) { return 0; }\n").unwrap();

        for (exit, verdict) in [
            (0, EqvVerdict::ProvedEquivalent),
            (10, EqvVerdict::NotEquivalent),
            (6, EqvVerdict::Failed),
        ] {
            let exec = VerifierExecutor::builder()
                .verifier(fake_verifier(&dir, exit))
                .timeout(Duration::from_secs(10))
                .build();
            let run = exec.run(&insn, &driver, &dir.join("trace.json")).unwrap();
            assert_eq!(run.verdict, verdict, "exit code {exit}");
            assert_eq!(run.retcode, Some(exit));
            assert!(run.time_ns.is_some());
        }

        // the JSON trace went to the output file
        assert_eq!(fs::read_to_string(dir.join("trace.json")).unwrap(), "[]\n");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_stage_artifacts_roundtrip() {
        let dir = std::env::temp_dir().join(format!("mutcheck_stage_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let runs = vec![
            (
                "a.MUT0.c".to_string(),
                VerifierRun {
                    verdict: EqvVerdict::NotEquivalent,
                    retcode: Some(10),
                    time_ns: Some(1_000_000),
                },
            ),
            (
                "a.MUT1.c".to_string(),
                VerifierRun {
                    verdict: EqvVerdict::ProvedEquivalent,
                    retcode: Some(0),
                    time_ns: Some(2_000_000),
                },
            ),
            (
                "a.MUT2.c".to_string(),
                VerifierRun {
                    verdict: EqvVerdict::TimedOut,
                    retcode: None,
                    time_ns: None,
                },
            ),
        ];
        write_stage_artifacts(&dir, "expt1", &runs).unwrap();

        // only the counterexample-bearing mutant flows into round 2
        assert_eq!(load_not_equivalent(&dir, "expt1").unwrap(), vec!["a.MUT0.c"]);

        fs::remove_dir_all(&dir).unwrap();
        assert!(matches!(
            load_not_equivalent(&dir, "expt1").unwrap_err(),
            Error::MissingArtifact(_)
        ));
    }
}
