//! Regression-test runs: a compiled binary (oracle or mutant) is run over
//! the test inputs and its output byte-compared against the gold output.
//!
//! Used three ways: round 1 (pre-existing suite vs every mutant), round 2
//! (witness-derived suites vs the round-2 eligible mutants), and the oracle
//! self-check that shakes out nondeterministic semantics.

use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
    time::Duration,
};

use typed_builder::TypedBuilder;

use mutcheck::{
    survivors::{RoundOutcome, SurvivorRecord},
    witness::TestcaseRegistry,
};

use crate::{
    run::{run_timed, ExitKind},
    Error,
};

/// One regression test: an inputs file and the gold output to match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    /// Inputs file passed to the binary
    pub input: PathBuf,
    /// File holding the expected output bytes
    pub gold_output: PathBuf,
}

impl TestCase {
    /// The test cases of one experiment, from the test-case registry.
    pub fn from_registry(registry: &TestcaseRegistry, experiment: &str) -> Vec<Self> {
        registry
            .tests_for_experiment(experiment)
            .map(|t| Self {
                input: PathBuf::from(&t.input),
                gold_output: PathBuf::from(&t.output),
            })
            .collect()
    }
}

/// A unique scratch path for one binary's test output.
pub fn scratch_output(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("output_{tag}_{}", std::process::id()))
}

/// Runs binaries over regression tests and compares against gold outputs.
#[derive(Debug, Clone, TypedBuilder)]
pub struct RegressionExecutor {
    /// Wall-clock deadline per test
    #[builder(default = Duration::from_secs(10))]
    timeout: Duration,
}

impl RegressionExecutor {
    /// Run one test. Missing binary, non-zero exit, crash or output
    /// mismatch all kill the mutant; only a timeout is reported as its own
    /// outcome.
    pub fn run_one(
        &self,
        binary: &Path,
        test: &TestCase,
        output: &Path,
    ) -> Result<(RoundOutcome, Option<u64>), Error> {
        let mut cmd = Command::new(binary);
        cmd.arg(&test.input).arg(output);

        let res = match run_timed(&mut cmd, self.timeout) {
            Ok(res) => res,
            Err(Error::MissingArtifact(m)) => {
                // a mutant whose binary never built is dead, not an error
                log::warn!("missing binary: {m}");
                return Ok((RoundOutcome::Killed, None));
            }
            Err(e) => return Err(e),
        };

        match res.kind {
            ExitKind::Timeout => return Ok((RoundOutcome::TimedOut, None)),
            ExitKind::Ok => {}
            ExitKind::Failure(_) | ExitKind::Crash(_) => {
                return Ok((RoundOutcome::Killed, res.time_ns()));
            }
        }

        let gold = fs::read(&test.gold_output).map_err(|e| {
            Error::missing_artifact(format!("gold output {}: {e}", test.gold_output.display()))
        })?;
        let got = fs::read(output)?;
        let outcome = if got == gold {
            RoundOutcome::Survived
        } else {
            RoundOutcome::Killed
        };
        Ok((outcome, res.time_ns()))
    }

    /// Run a binary through a whole suite, stopping at the first kill. The
    /// returned record carries the summed elapsed time.
    pub fn run_suite(
        &self,
        binary: &Path,
        tests: &[TestCase],
        output: &Path,
    ) -> Result<SurvivorRecord, Error> {
        let mut total_ns: u64 = 0;
        for test in tests {
            let (outcome, time_ns) = self.run_one(binary, test, output)?;
            total_ns += time_ns.unwrap_or(0);
            match outcome {
                RoundOutcome::Survived => {}
                RoundOutcome::TimedOut => return Ok(SurvivorRecord::timed_out()),
                _ => return Ok(SurvivorRecord::killed(total_ns)),
            }
        }
        Ok(SurvivorRecord::survived(total_ns))
    }

    /// Replay a suite against the oracle itself; the oracle must survive
    /// its own tests. Returns the gold outputs it failed, for the
    /// `oracle_check` artifact.
    pub fn oracle_check(
        &self,
        oracle: &Path,
        tests: &[TestCase],
        output: &Path,
    ) -> Result<Vec<String>, Error> {
        let mut failed = Vec::new();
        for test in tests {
            let (outcome, _) = self.run_one(oracle, test, output)?;
            if outcome != RoundOutcome::Survived {
                log::warn!(
                    "oracle failed its own test with gold output {}",
                    test.gold_output.display()
                );
                failed.push(test.gold_output.display().to_string());
            }
        }
        Ok(failed)
    }
}
