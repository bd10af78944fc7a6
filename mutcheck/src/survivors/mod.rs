//! The survivor state machine: per-mutant verdicts across rounds, and the
//! reconciliation check that catches pipeline defects.
//!
//! Round 1 runs the pre-existing regression suite. The equivalence stage
//! then splits the round-1 survivors into proved-equivalent, not-equivalent
//! (witness in hand) and timed-out. Round 2 replays harvested witnesses,
//! once per witness source, and only on mutants the checker proved
//! not-equivalent; the ordering is a hard precondition and enforced here.

use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};

use crate::{witness::WitnessSource, Error};

/// Outcome of running one mutant through one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundOutcome {
    /// The round has not run for this mutant
    NotRun,
    /// Every test passed; the mutant is still standing
    Survived,
    /// A test mismatched, the binary was missing, or it exited non-zero
    Killed,
    /// The run hit its wall-clock deadline: terminal, but neither killed
    /// nor survived, and excluded from later rounds until rerun
    TimedOut,
}

/// Outcome and elapsed time of one (mutant, round) run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurvivorRecord {
    /// The verdict
    pub outcome: RoundOutcome,
    /// Elapsed wall-clock time; `None` for timeouts and skipped runs
    pub time_ns: Option<u64>,
}

impl SurvivorRecord {
    /// A survived verdict.
    pub fn survived(time_ns: u64) -> Self {
        Self {
            outcome: RoundOutcome::Survived,
            time_ns: Some(time_ns),
        }
    }

    /// A killed verdict.
    pub fn killed(time_ns: u64) -> Self {
        Self {
            outcome: RoundOutcome::Killed,
            time_ns: Some(time_ns),
        }
    }

    /// A timed-out verdict.
    pub fn timed_out() -> Self {
        Self {
            outcome: RoundOutcome::TimedOut,
            time_ns: None,
        }
    }
}

/// Verdict of the equivalence checker for one mutant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EqvVerdict {
    /// The checker proved oracle and mutant equivalent
    ProvedEquivalent,
    /// The checker found a counterexample witness
    NotEquivalent,
    /// The checker hit its deadline; the mutant stays out of round 2
    TimedOut,
    /// The checker failed for a non-verdict reason (recorded, not retried)
    Failed,
}

/// Per-source round totals; the terms of the reconciliation identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundTotals {
    /// All mutants of the instruction
    pub total: usize,
    /// Killed by the round-1 regression suite
    pub killed1: usize,
    /// Proved equivalent to the oracle
    pub same: usize,
    /// Killed by this source's round-2 witnesses
    pub killed2: usize,
    /// Still standing after this source's round 2
    pub left: usize,
}

/// The per-instruction verdict ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurvivorLedger {
    mutants: Vec<String>,
    round1: HashMap<String, SurvivorRecord>,
    eqv: HashMap<String, EqvVerdict>,
    round2: HashMap<WitnessSource, HashMap<String, SurvivorRecord>>,
}

impl SurvivorLedger {
    /// A ledger for the given mutant population.
    pub fn new(mutants: Vec<String>) -> Result<Self, Error> {
        let mut seen = HashSet::with_capacity(mutants.len());
        for m in &mutants {
            if !seen.insert(m.as_str()) {
                return Err(Error::illegal_argument(format!("duplicate mutant `{m}`")));
            }
        }
        drop(seen);
        Ok(Self {
            mutants,
            round1: HashMap::new(),
            eqv: HashMap::new(),
            round2: HashMap::new(),
        })
    }

    /// The mutant population, in input order.
    pub fn mutants(&self) -> &[String] {
        &self.mutants
    }

    fn check_known(&self, mutant: &str) -> Result<(), Error> {
        if self.mutants.iter().any(|m| m == mutant) {
            Ok(())
        } else {
            Err(Error::key_not_found(format!("mutant `{mutant}`")))
        }
    }

    /// Record the round-1 verdict for a mutant. Each verdict is written
    /// exactly once per round.
    pub fn record_round1(&mut self, mutant: &str, record: SurvivorRecord) -> Result<(), Error> {
        self.check_known(mutant)?;
        if self.round1.contains_key(mutant) {
            return Err(Error::illegal_state(format!(
                "round-1 verdict for `{mutant}` already recorded"
            )));
        }
        self.round1.insert(mutant.to_string(), record);
        Ok(())
    }

    /// Record the equivalence-check verdict. Only round-1 survivors reach
    /// the equivalence stage.
    pub fn record_equivalence(&mut self, mutant: &str, verdict: EqvVerdict) -> Result<(), Error> {
        self.check_known(mutant)?;
        if self.round1_outcome(mutant) != RoundOutcome::Survived {
            return Err(Error::illegal_state(format!(
                "equivalence verdict for `{mutant}`, which did not survive round 1"
            )));
        }
        if self.eqv.contains_key(mutant) {
            return Err(Error::illegal_state(format!(
                "equivalence verdict for `{mutant}` already recorded"
            )));
        }
        self.eqv.insert(mutant.to_string(), verdict);
        Ok(())
    }

    /// The round-1 outcome for a mutant.
    pub fn round1_outcome(&self, mutant: &str) -> RoundOutcome {
        self.round1
            .get(mutant)
            .map_or(RoundOutcome::NotRun, |r| r.outcome)
    }

    /// The equivalence verdict for a mutant, if the stage ran on it.
    pub fn equivalence(&self, mutant: &str) -> Option<EqvVerdict> {
        self.eqv.get(mutant).copied()
    }

    /// The round-2 outcome for a mutant under one witness source.
    pub fn round2_outcome(&self, source: WitnessSource, mutant: &str) -> RoundOutcome {
        self.round2
            .get(&source)
            .and_then(|m| m.get(mutant))
            .map_or(RoundOutcome::NotRun, |r| r.outcome)
    }

    /// The mutants eligible for round 2: round-1 survivors the checker
    /// classified as not provably equivalent. Timed-out and failed
    /// equivalence checks keep their mutants out until rerun.
    pub fn round2_eligible(&self) -> Vec<&str> {
        self.mutants
            .iter()
            .filter(|m| {
                self.round1_outcome(m) == RoundOutcome::Survived
                    && self.equivalence(m) == Some(EqvVerdict::NotEquivalent)
            })
            .map(String::as_str)
            .collect()
    }

    /// Record one source's round-2 verdict. The equivalence-stage ordering
    /// is enforced: recording a verdict for an ineligible mutant is a
    /// pipeline defect.
    pub fn record_round2(
        &mut self,
        source: WitnessSource,
        mutant: &str,
        record: SurvivorRecord,
    ) -> Result<(), Error> {
        self.check_known(mutant)?;
        if !self
            .round2_eligible()
            .iter()
            .any(|m| *m == mutant)
        {
            return Err(Error::illegal_state(format!(
                "round-2 verdict for `{mutant}`, which is not round-2 eligible"
            )));
        }
        let per_source = self.round2.entry(source).or_default();
        if per_source.contains_key(mutant) {
            return Err(Error::illegal_state(format!(
                "round-2 verdict for `{mutant}` ({source}) already recorded"
            )));
        }
        per_source.insert(mutant.to_string(), record);
        Ok(())
    }

    /// The mutants still standing after one source's round 2: round-1
    /// survivors neither proved equivalent nor killed by that source.
    pub fn left_after(&self, source: WitnessSource) -> Vec<&str> {
        self.mutants
            .iter()
            .filter(|m| {
                self.round1_outcome(m) == RoundOutcome::Survived
                    && self.equivalence(m) != Some(EqvVerdict::ProvedEquivalent)
                    && self.round2_outcome(source, m) != RoundOutcome::Killed
            })
            .map(String::as_str)
            .collect()
    }

    /// Count the per-source buckets, each from its own record set.
    pub fn totals(&self, source: WitnessSource) -> RoundTotals {
        let killed1 = self
            .mutants
            .iter()
            .filter(|m| self.round1_outcome(m) == RoundOutcome::Killed)
            .count();
        let same = self
            .mutants
            .iter()
            .filter(|m| self.equivalence(m) == Some(EqvVerdict::ProvedEquivalent))
            .count();
        let killed2 = self
            .mutants
            .iter()
            .filter(|m| self.round2_outcome(source, m) == RoundOutcome::Killed)
            .count();
        RoundTotals {
            total: self.mutants.len(),
            killed1,
            same,
            killed2,
            left: self.left_after(source).len(),
        }
    }

    /// Check the reconciliation identity
    /// `total == killed1 + same + killed2 + left` for one source.
    ///
    /// A violation means records overlap or a mutant fell through the
    /// buckets (say, a round-1 timeout that was never rerun); either way
    /// the pipeline is defective and the caller must not trust the totals.
    pub fn reconcile(&self, source: WitnessSource) -> Result<RoundTotals, Error> {
        let totals = self.totals(source);
        let sum = totals.killed1 + totals.same + totals.killed2 + totals.left;
        if totals.total != sum {
            return Err(Error::consistency_violation(format!(
                "{source}: {} mutant(s) != {} killed1 + {} same + {} killed2 + {} left",
                totals.total, totals.killed1, totals.same, totals.killed2, totals.left
            )));
        }
        Ok(totals)
    }
}
